//! Streaming-related error types.
//!
//! This module defines the failures a relay can surface while opening an
//! upstream event stream, reading it, and decoding its lines.

use std::fmt;
use std::time::Duration;

use super::category::ErrorClass;
use crate::traits::HttpError;

/// The single message shown to users for any surfaced stream failure.
pub const CONNECTION_TROUBLE_MESSAGE: &str = "Connection trouble, please try again.";

/// Stream-specific error variants.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamError {
    /// The upstream request could not be initiated (refused, DNS, TLS).
    UpstreamConnect {
        url: String,
        message: String,
    },

    /// No line arrived within the inactivity window, or the overall
    /// wall-clock cap expired.
    UpstreamTimeout {
        window_secs: u64,
        overall: bool,
    },

    /// The upstream answered with a non-success status or broke framing.
    UpstreamProtocol {
        status: Option<u16>,
        message: String,
    },

    /// A line could not be interpreted.
    Decode {
        message: String,
    },
}

impl StreamError {
    /// Inactivity timeout for the given window.
    pub fn inactivity(window: Duration) -> Self {
        StreamError::UpstreamTimeout {
            window_secs: window.as_secs(),
            overall: false,
        }
    }

    /// Overall wall-clock cap for the given duration.
    pub fn overall(cap: Duration) -> Self {
        StreamError::UpstreamTimeout {
            window_secs: cap.as_secs(),
            overall: true,
        }
    }

    /// Classify a transport error raised while opening the stream, before
    /// any response bytes were read.
    pub fn from_connect(err: HttpError, url: &str) -> Self {
        match err {
            HttpError::ConnectionFailed(message)
            | HttpError::Timeout(message)
            | HttpError::Io(message) => StreamError::UpstreamConnect {
                url: url.to_string(),
                message,
            },
            HttpError::ServerError { status, message } => StreamError::UpstreamProtocol {
                status: Some(status),
                message,
            },
            HttpError::Decode(message) => StreamError::Decode { message },
            other => StreamError::UpstreamProtocol {
                status: None,
                message: other.to_string(),
            },
        }
    }

    /// Classify a transport error raised while reading the response body.
    ///
    /// Once bytes have been delivered a retry would duplicate content, so
    /// every body failure is fatal.
    pub fn from_body(err: HttpError) -> Self {
        StreamError::UpstreamProtocol {
            status: None,
            message: format!("stream interrupted: {}", err),
        }
    }

    /// Retry classification of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            StreamError::UpstreamConnect { .. } => ErrorClass::Transient,
            StreamError::UpstreamTimeout { .. } => ErrorClass::Timeout,
            StreamError::UpstreamProtocol { .. } | StreamError::Decode { .. } => ErrorClass::Fatal,
        }
    }

    /// Check if this error is likely transient and can be retried.
    pub fn is_retryable(&self) -> bool {
        self.class().is_retryable()
    }

    /// User-facing message. Raw detail never reaches the UI.
    pub fn user_message(&self) -> String {
        CONNECTION_TROUBLE_MESSAGE.to_string()
    }

    /// Get a short error code for logging.
    pub fn error_code(&self) -> &'static str {
        match self {
            StreamError::UpstreamConnect { .. } => "E_UPSTREAM_CONN",
            StreamError::UpstreamTimeout { overall: false, .. } => "E_UPSTREAM_IDLE",
            StreamError::UpstreamTimeout { overall: true, .. } => "E_UPSTREAM_CAP",
            StreamError::UpstreamProtocol { .. } => "E_UPSTREAM_PROTO",
            StreamError::Decode { .. } => "E_STREAM_DECODE",
        }
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::UpstreamConnect { url, message } => {
                write!(f, "Upstream connection to '{}' failed: {}", url, message)
            }
            StreamError::UpstreamTimeout {
                window_secs,
                overall: false,
            } => write!(f, "No upstream data for {} seconds", window_secs),
            StreamError::UpstreamTimeout {
                window_secs,
                overall: true,
            } => write!(f, "Stream exceeded the {} second cap", window_secs),
            StreamError::UpstreamProtocol { status, message } => match status {
                Some(s) => write!(f, "Upstream returned HTTP {}: {}", s, message),
                None => write!(f, "Upstream protocol error: {}", message),
            },
            StreamError::Decode { message } => write!(f, "Failed to decode stream line: {}", message),
        }
    }
}

impl std::error::Error for StreamError {}

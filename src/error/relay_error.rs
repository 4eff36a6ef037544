//! Unified error type for the relay.
//!
//! `RelayError` wraps the stream taxonomy together with the few
//! lifecycle misuses the relay can report, so callers deal with one type.

use std::fmt;

use super::category::ErrorClass;
use super::stream::{StreamError, CONNECTION_TROUBLE_MESSAGE};
use crate::config::ConfigError;

/// Unified error type for relay operations.
#[derive(Debug)]
pub enum RelayError {
    /// A stream failure surfaced without retry (Timeout or Fatal).
    Stream(StreamError),

    /// Transient failures kept happening until the retry ceiling.
    RetriesExhausted { attempts: u32, last: StreamError },

    /// `start` was called a second time on the same session.
    AlreadyStarted { session_id: String },

    /// Invalid configuration.
    Config(ConfigError),

    /// The relay is shutting down and accepts no new turns.
    Shutdown,
}

impl RelayError {
    /// Class of the underlying stream failure, if any.
    pub fn class(&self) -> Option<ErrorClass> {
        match self {
            RelayError::Stream(err) => Some(err.class()),
            RelayError::RetriesExhausted { last, .. } => Some(last.class()),
            _ => None,
        }
    }

    /// The stream error behind this failure, if any.
    pub fn stream_error(&self) -> Option<&StreamError> {
        match self {
            RelayError::Stream(err) | RelayError::RetriesExhausted { last: err, .. } => Some(err),
            _ => None,
        }
    }

    /// Get a user-friendly error message.
    pub fn user_message(&self) -> String {
        match self {
            RelayError::Stream(_) | RelayError::RetriesExhausted { .. } => {
                CONNECTION_TROUBLE_MESSAGE.to_string()
            }
            RelayError::AlreadyStarted { .. } => {
                "This response is already being generated.".to_string()
            }
            RelayError::Config(_) => "The relay is misconfigured.".to_string(),
            RelayError::Shutdown => "The service is shutting down.".to_string(),
        }
    }

    /// Get a short error code for logging.
    pub fn error_code(&self) -> &'static str {
        match self {
            RelayError::Stream(err) => err.error_code(),
            RelayError::RetriesExhausted { .. } => "E_RETRY_EXHAUSTED",
            RelayError::AlreadyStarted { .. } => "E_SESSION_STARTED",
            RelayError::Config(_) => "E_CONFIG",
            RelayError::Shutdown => "E_SHUTDOWN",
        }
    }
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::Stream(err) => write!(f, "{}", err),
            RelayError::RetriesExhausted { attempts, last } => {
                write!(f, "Gave up after {} attempts: {}", attempts, last)
            }
            RelayError::AlreadyStarted { session_id } => {
                write!(f, "Session '{}' was already started", session_id)
            }
            RelayError::Config(err) => write!(f, "Configuration error: {}", err),
            RelayError::Shutdown => write!(f, "Relay is shutting down"),
        }
    }
}

impl std::error::Error for RelayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RelayError::Stream(err) | RelayError::RetriesExhausted { last: err, .. } => Some(err),
            RelayError::Config(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StreamError> for RelayError {
    fn from(err: StreamError) -> Self {
        RelayError::Stream(err)
    }
}

impl From<ConfigError> for RelayError {
    fn from(err: ConfigError) -> Self {
        RelayError::Config(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausted_reports_last_error() {
        let last = StreamError::UpstreamConnect {
            url: "http://x".to_string(),
            message: "refused".to_string(),
        };
        let err = RelayError::RetriesExhausted {
            attempts: 3,
            last: last.clone(),
        };
        assert_eq!(err.class(), Some(ErrorClass::Transient));
        assert_eq!(err.stream_error(), Some(&last));
        assert_eq!(err.error_code(), "E_RETRY_EXHAUSTED");
        assert!(err.to_string().starts_with("Gave up after 3 attempts"));
        assert_eq!(err.user_message(), CONNECTION_TROUBLE_MESSAGE);
    }

    #[test]
    fn test_from_stream_error() {
        let err: RelayError = StreamError::Decode {
            message: "bad".to_string(),
        }
        .into();
        assert!(matches!(err, RelayError::Stream(_)));
        assert_eq!(err.class(), Some(ErrorClass::Fatal));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_lifecycle_errors_have_no_class() {
        let err = RelayError::AlreadyStarted {
            session_id: "s1".to_string(),
        };
        assert_eq!(err.class(), None);
        assert_eq!(err.to_string(), "Session 's1' was already started");
        assert_eq!(RelayError::Shutdown.error_code(), "E_SHUTDOWN");
    }
}

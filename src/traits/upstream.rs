//! Upstream client trait abstraction.
//!
//! Provides a trait-based abstraction over the chat backend, enabling
//! dependency injection and mocking in tests.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

use crate::models::{ChatCompletion, TurnRequest};

/// Incremental response body of a streaming request.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, HttpError>> + Send>>;

/// HTTP client errors.
#[derive(Debug, Clone, PartialEq)]
pub enum HttpError {
    /// Connection failed
    ConnectionFailed(String),
    /// Request timeout
    Timeout(String),
    /// Server returned an error status
    ServerError { status: u16, message: String },
    /// Request was cancelled
    Cancelled,
    /// IO error
    Io(String),
    /// Invalid URL
    InvalidUrl(String),
    /// Response body could not be decoded
    Decode(String),
    /// Other error
    Other(String),
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpError::ConnectionFailed(msg) => write!(f, "Connection failed: {}", msg),
            HttpError::Timeout(msg) => write!(f, "Request timeout: {}", msg),
            HttpError::ServerError { status, message } => {
                write!(f, "Server error ({}): {}", status, message)
            }
            HttpError::Cancelled => write!(f, "Request cancelled"),
            HttpError::Io(msg) => write!(f, "IO error: {}", msg),
            HttpError::InvalidUrl(msg) => write!(f, "Invalid URL: {}", msg),
            HttpError::Decode(msg) => write!(f, "Decode error: {}", msg),
            HttpError::Other(msg) => write!(f, "HTTP error: {}", msg),
        }
    }
}

impl std::error::Error for HttpError {}

/// Trait for the chat backend.
///
/// Implementations include the production reqwest-based client and the
/// scripted mock used in tests.
///
/// # Example
///
/// ```ignore
/// use chat_relay::traits::UpstreamClient;
///
/// async fn first_chunk<C: UpstreamClient>(client: &C, request: &TurnRequest) {
///     let mut body = client.open_stream(request).await?;
///     let chunk = body.next().await;
/// }
/// ```
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// URL of the streaming endpoint, used in error reports.
    fn stream_url(&self) -> String;

    /// URL of the non-streaming endpoint, used in error reports.
    fn complete_url(&self) -> String;

    /// Open the event stream for a turn.
    ///
    /// Resolves once response headers are in. A non-success status must be
    /// reported as [`HttpError::ServerError`]; failures before any response
    /// as [`HttpError::ConnectionFailed`] or [`HttpError::Timeout`].
    async fn open_stream(&self, request: &TurnRequest) -> Result<ByteStream, HttpError>;

    /// Call the non-streaming endpoint and return the full response.
    async fn complete(&self, request: &TurnRequest) -> Result<ChatCompletion, HttpError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_error_display() {
        assert_eq!(
            HttpError::ConnectionFailed("refused".to_string()).to_string(),
            "Connection failed: refused"
        );
        assert_eq!(
            HttpError::ServerError {
                status: 500,
                message: "Internal Error".to_string()
            }
            .to_string(),
            "Server error (500): Internal Error"
        );
        assert_eq!(HttpError::Cancelled.to_string(), "Request cancelled");
        assert_eq!(
            HttpError::Decode("eof".to_string()).to_string(),
            "Decode error: eof"
        );
    }
}

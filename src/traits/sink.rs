//! UI sink trait abstraction.
//!
//! The hosting layer implements [`UiSink`] to receive accumulated text
//! and status for a turn. Rendering is entirely its business.

use async_trait::async_trait;

use crate::models::UiUpdate;

/// Errors reported by a UI sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// The UI connection is gone; no further notifications can land.
    Disconnected,
    /// The notification failed but the connection is still usable.
    Rejected(String),
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::Disconnected => write!(f, "UI connection is gone"),
            SinkError::Rejected(msg) => write!(f, "UI update rejected: {}", msg),
        }
    }
}

impl std::error::Error for SinkError {}

/// Push-based receiver of turn updates.
///
/// `notify` is awaited before the next update is produced, so a slow UI
/// transport bounds how far the relay reads ahead.
#[async_trait]
pub trait UiSink: Send + Sync {
    async fn notify(&self, update: UiUpdate) -> Result<(), SinkError>;
}

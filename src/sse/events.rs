//! SSE event types and definitions
//!
//! Contains the decoded unit of upstream content and the line-level
//! classification the decoder works with.

/// Literal payload value that marks the end of an upstream stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One decoded unit from the upstream stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    /// Semantic unit of content.
    pub payload: String,
    /// True only for the `[DONE]` sentinel.
    pub is_terminal: bool,
}

impl StreamEvent {
    /// A content event.
    pub fn payload(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            is_terminal: false,
        }
    }

    /// The terminal sentinel event. Never forwarded as content.
    pub fn terminal() -> Self {
        Self {
            payload: String::new(),
            is_terminal: true,
        }
    }
}

/// Represents a parsed SSE line
#[derive(Debug, Clone, PartialEq)]
pub enum SseLine {
    /// Data payload with the field prefix and one leading space removed
    Data(String),
    /// Empty line - event separator, also a sign of life
    Empty,
    /// Comment line (starts with ':'), used by backends as keep-alive
    Comment(String),
    /// Any other field (`event:`, `id:`, `retry:`) or unknown content
    Other(String),
}

/// Result of feeding one line to the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    /// A data line produced an event (possibly the terminal one).
    Event(StreamEvent),
    /// The line carried no content; it still counts as activity.
    Ignored,
}

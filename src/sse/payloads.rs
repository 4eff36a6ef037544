//! SSE payload deserialization structs
//!
//! Structured tokens some backends send instead of a bare JSON string.

use serde::Deserialize;

/// Structured token payload.
/// Accepts "text", "content", "chunk" or "token" as the content field.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TokenPayload {
    #[serde(alias = "content", alias = "chunk", alias = "token")]
    pub text: Option<String>,
    /// Some backends nest content in a delta object (OpenAI style)
    #[serde(default)]
    pub delta: Option<DeltaPayload>,
}

/// Nested delta payload for OpenAI-style responses
#[derive(Debug, Clone, Deserialize, Default)]
pub(crate) struct DeltaPayload {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

impl TokenPayload {
    pub(crate) fn into_text(self) -> Option<String> {
        self.text.or_else(|| {
            self.delta
                .and_then(|d| d.content.or(d.text))
        })
    }
}

//! Request and response models exchanged with the backend and the UI.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A file carried with a turn. `data` is base64-encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub content_type: String,
    pub data: String,
}

impl Attachment {
    /// Build an attachment from raw bytes.
    pub fn from_bytes(name: impl Into<String>, content_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            data: STANDARD.encode(bytes),
        }
    }
}

/// Outbound request descriptor for one conversational turn.
///
/// Text-only turns travel as GET query parameters; turns with attachments or
/// in elevated mode travel as a POST JSON body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnRequest {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub elevated: bool,
}

impl TurnRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn with_elevated(mut self, elevated: bool) -> Self {
        self.elevated = elevated;
        self
    }

    /// True when the turn must be sent as a body-carrying request.
    pub fn requires_body(&self) -> bool {
        self.elevated || !self.attachments.is_empty()
    }

    /// Encode the text-only fields as a query string (without leading `?`).
    pub fn to_query(&self) -> String {
        let mut pairs = vec![format!("message={}", urlencoding::encode(&self.message))];
        if let Some(model) = &self.model {
            pairs.push(format!("model={}", urlencoding::encode(model)));
        }
        if let Some(prompt) = &self.system_prompt {
            pairs.push(format!("system_prompt={}", urlencoding::encode(prompt)));
        }
        if let Some(temperature) = self.temperature {
            pairs.push(format!("temperature={}", temperature));
        }
        pairs.join("&")
    }
}

/// Token accounting returned by the non-streaming endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// Full response of the non-streaming chat endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletion {
    #[serde(alias = "content", alias = "text")]
    pub response: String,
    #[serde(default)]
    pub usage: TokenUsage,
    #[serde(default)]
    pub cost: f64,
}

/// Status attached to every UI notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnStatus {
    /// More content may follow.
    Streaming,
    /// The turn finished normally.
    Complete,
    /// The turn was stopped by the user or superseded.
    Stopped,
    /// The turn failed; `message` is safe to show.
    Failed { message: String },
}

impl TurnStatus {
    pub fn is_final(&self) -> bool {
        !matches!(self, TurnStatus::Streaming)
    }
}

/// One push to the UI: the accumulated text so far and its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UiUpdate {
    pub session_id: String,
    pub text: String,
    pub status: TurnStatus,
}

/// Summary of a finished turn.
#[derive(Debug, Clone)]
pub struct TurnReport {
    pub session_id: String,
    pub status: TurnStatus,
    pub text: String,
    pub payloads: usize,
    pub notifications: usize,
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_only_turn_uses_query() {
        let request = TurnRequest::new("hello world & more").with_model("gpt-4o");
        assert!(!request.requires_body());
        assert_eq!(
            request.to_query(),
            "message=hello%20world%20%26%20more&model=gpt-4o"
        );
    }

    #[test]
    fn test_attachments_and_elevated_require_body() {
        let with_file = TurnRequest::new("look")
            .with_attachment(Attachment::from_bytes("a.txt", "text/plain", b"hi"));
        assert!(with_file.requires_body());
        assert_eq!(with_file.attachments[0].data, "aGk=");

        assert!(TurnRequest::new("sudo").with_elevated(true).requires_body());
    }

    #[test]
    fn test_request_json_skips_empty_fields() {
        let json = serde_json::to_value(TurnRequest::new("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"message": "hi"}));
    }

    #[test]
    fn test_completion_accepts_content_alias() {
        let completion: ChatCompletion = serde_json::from_str(
            r#"{"content":"Done.","usage":{"prompt_tokens":3,"completion_tokens":2,"total_tokens":5},"cost":0.01}"#,
        )
        .unwrap();
        assert_eq!(completion.response, "Done.");
        assert_eq!(completion.usage.total_tokens, 5);
    }

    #[test]
    fn test_status_is_final() {
        assert!(!TurnStatus::Streaming.is_final());
        assert!(TurnStatus::Complete.is_final());
        assert!(TurnStatus::Stopped.is_final());
    }
}

//! Data payload decoding

use crate::sse::events::{StreamEvent, DONE_SENTINEL};
use crate::sse::payloads::TokenPayload;

/// Decode the value of a `data:` line.
///
/// - `[DONE]` is the terminal sentinel.
/// - A JSON string is unescaped and used as the payload.
/// - A JSON object carrying a text field (`text`, `content`, `chunk`,
///   `token`, `delta.content`) yields that text.
/// - Anything else is used verbatim.
pub(super) fn decode_payload(data: &str) -> StreamEvent {
    if data.trim() == DONE_SENTINEL {
        return StreamEvent::terminal();
    }

    match serde_json::from_str::<serde_json::Value>(data) {
        Ok(serde_json::Value::String(text)) => StreamEvent::payload(text),
        Ok(value @ serde_json::Value::Object(_)) => {
            match serde_json::from_value::<TokenPayload>(value)
                .ok()
                .and_then(TokenPayload::into_text)
            {
                Some(text) => StreamEvent::payload(text),
                None => StreamEvent::payload(data),
            }
        }
        _ => StreamEvent::payload(data),
    }
}

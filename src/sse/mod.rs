//! SSE (Server-Sent Events) stream decoding
//!
//! Decodes the upstream `text/event-stream` body:
//! - `data: <payload>` - payload line; a JSON string is unescaped, anything
//!   else is used as-is
//! - `data: [DONE]` - terminal sentinel, never forwarded as content
//! - Lines starting with `:` - keep-alive comments (ignored)
//! - Empty line - event separator (ignored)
//!
//! Ignored lines still count as upstream activity for the inactivity timer.
//!
//! # Module structure
//! - `events` - StreamEvent, SseLine, LineOutcome
//! - `payloads` - structured token deserialization
//! - `parser` - line splitting and decoding (LineBuffer, parse_sse_line, decode_line)

mod events;
mod parser;
mod payloads;

pub use events::{LineOutcome, SseLine, StreamEvent, DONE_SENTINEL};
pub use parser::{decode_line, parse_sse_line, LineBuffer};

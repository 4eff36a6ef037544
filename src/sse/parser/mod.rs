//! SSE stream parsing logic
//!
//! Line classification and per-line decoding. Every `data:` line is a
//! self-contained payload; there is no multi-line event accumulation.

mod content;
mod lines;

use crate::sse::events::{LineOutcome, SseLine};

use content::decode_payload;
pub use lines::LineBuffer;

/// Parse a single SSE line into its component type
pub fn parse_sse_line(line: &str) -> SseLine {
    if line.is_empty() {
        return SseLine::Empty;
    }

    if let Some(stripped) = line.strip_prefix(':') {
        return SseLine::Comment(stripped.trim().to_string());
    }

    if let Some(rest) = line.strip_prefix("data:") {
        // The field value starts after a single optional space; further
        // whitespace belongs to the payload.
        let value = rest.strip_prefix(' ').unwrap_or(rest);
        return SseLine::Data(value.to_string());
    }

    SseLine::Other(line.to_string())
}

/// Decode one complete line.
pub fn decode_line(line: &str) -> LineOutcome {
    match parse_sse_line(line) {
        SseLine::Data(data) => LineOutcome::Event(decode_payload(&data)),
        SseLine::Empty | SseLine::Comment(_) | SseLine::Other(_) => LineOutcome::Ignored,
    }
}

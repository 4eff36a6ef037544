//! Byte chunk to line splitting
//!
//! Network chunks do not respect line or UTF-8 boundaries, so bytes are
//! buffered and only complete lines are decoded. Lines end in `\r\n`, `\n`
//! or a bare `\r`.

use bytes::{Buf, BytesMut};

use crate::error::StreamError;

/// Accumulates body chunks and yields complete lines.
#[derive(Debug)]
pub struct LineBuffer {
    buf: BytesMut,
    max_line_bytes: usize,
    /// The last line ended in `\r` at the end of the buffer, so a `\n`
    /// arriving next still belongs to it.
    after_cr: bool,
}

fn is_terminator(byte: &u8) -> bool {
    *byte == b'\n' || *byte == b'\r'
}

impl LineBuffer {
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_line_bytes,
            after_cr: false,
        }
    }

    /// Append a chunk. Fails if the unterminated tail grows past the line limit.
    pub fn push(&mut self, chunk: &[u8]) -> Result<(), StreamError> {
        self.buf.extend_from_slice(chunk);

        let tail_start = self
            .buf
            .iter()
            .rposition(is_terminator)
            .map(|pos| pos + 1)
            .unwrap_or(0);
        let tail = self.buf.len() - tail_start;
        if tail > self.max_line_bytes {
            return Err(StreamError::UpstreamProtocol {
                status: None,
                message: format!("line exceeds {} bytes", self.max_line_bytes),
            });
        }
        Ok(())
    }

    /// Take the next complete line, without its terminator.
    pub fn next_line(&mut self) -> Option<Result<String, StreamError>> {
        self.skip_split_crlf();
        let pos = self.buf.iter().position(is_terminator)?;
        let line = self.buf.split_to(pos + 1);
        if line[pos] == b'\r' {
            if self.buf.first() == Some(&b'\n') {
                self.buf.advance(1);
            } else {
                self.after_cr = self.buf.is_empty();
            }
        }
        Some(decode_line(&line[..pos]))
    }

    /// Take whatever is left once the body has ended.
    pub fn finish(&mut self) -> Option<Result<String, StreamError>> {
        self.skip_split_crlf();
        if self.buf.is_empty() {
            return None;
        }
        let rest = self.buf.split();
        Some(decode_line(&rest))
    }

    /// Bytes currently held.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    fn skip_split_crlf(&mut self) {
        if !self.after_cr || self.buf.is_empty() {
            return;
        }
        if self.buf[0] == b'\n' {
            self.buf.advance(1);
        }
        self.after_cr = false;
    }
}

fn decode_line(bytes: &[u8]) -> Result<String, StreamError> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|e| StreamError::Decode {
            message: e.to_string(),
        })
}

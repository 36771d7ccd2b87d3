//! Line framer for the streaming socket
//!
//! The server terminates every response and data line with `\n`, but a
//! single `recv` may return several lines, half a line, or both. The framer
//! keeps the trailing partial line in a carry buffer until its delimiter
//! arrives.
//!
//! # Buffer bound
//!
//! A peer that never sends a delimiter would grow the carry buffer without
//! limit. Once a line (complete or still partial) exceeds `max_line_len`
//! bytes the carry is discarded and a `Protocol` error is reported next to
//! the lines the same chunk completed before it.

use crate::error::Error;

/// Default per-line limit (bytes)
pub const DEFAULT_MAX_LINE_LEN: usize = 8192;

/// Lines completed by one chunk
#[derive(Debug, Default)]
pub struct Framed {
    /// Complete lines, in arrival order
    pub lines: Vec<String>,
    /// Line limit exceeded after `lines`; the remainder of the chunk is dropped
    pub overflow: Option<Error>,
}

/// Newline framer with a bounded carry buffer
pub struct LineFramer {
    carry: Vec<u8>,
    max_line_len: usize,
}

impl LineFramer {
    pub fn new(max_line_len: usize) -> Self {
        Self {
            carry: Vec::with_capacity(256),
            max_line_len,
        }
    }

    /// Feed one chunk, returning every line it completes.
    ///
    /// Lines are returned without the `\n` (and without a preceding `\r`).
    /// An empty chunk completes nothing; end-of-stream is signalled by the
    /// transport, not here. Lines completed before an overflow are still
    /// returned alongside it.
    pub fn push(&mut self, chunk: &[u8]) -> Framed {
        let mut framed = Framed::default();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let (head, tail) = rest.split_at(pos);
            rest = &tail[1..];

            if self.carry.len() + head.len() > self.max_line_len {
                framed.overflow = Some(self.overflow(self.carry.len() + head.len()));
                return framed;
            }

            let line = if self.carry.is_empty() {
                decode(head)
            } else {
                self.carry.extend_from_slice(head);
                let line = decode(&self.carry);
                self.carry.clear();
                line
            };
            framed.lines.push(line);
        }

        if self.carry.len() + rest.len() > self.max_line_len {
            framed.overflow = Some(self.overflow(self.carry.len() + rest.len()));
            return framed;
        }
        self.carry.extend_from_slice(rest);

        framed
    }

    /// Bytes held for an incomplete line
    pub fn pending(&self) -> usize {
        self.carry.len()
    }

    fn overflow(&mut self, len: usize) -> Error {
        self.carry.clear();
        Error::Protocol(format!(
            "line exceeds {} bytes without delimiter ({} buffered)",
            self.max_line_len, len
        ))
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_LEN)
    }
}

fn decode(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

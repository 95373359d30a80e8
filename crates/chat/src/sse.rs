//! Line framing for `text/event-stream` bodies.
//!
//! The server writes one `data: <payload>` line per event.  Network chunks
//! do not respect line boundaries, so bytes are buffered until a full line is
//! available.  Buffering happens on bytes rather than text so a multi-byte
//! character split across two chunks still decodes correctly.

use tracing::{debug, warn};

use crate::event::{DecodeError, StreamEvent};

/// Splits an arbitrarily chunked byte stream into complete lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return every line it completed, without the line
    /// terminator (`\n` or `\r\n`).
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            lines.push(decode_line(&self.pending[start..end]));
            start = end + 1;
        }
        self.pending.drain(..start);
        lines
    }

    /// Flush a trailing line that never received its terminator.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = decode_line(&self.pending);
        self.pending.clear();
        Some(line)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// Extract the payload of a `data:` line.
///
/// Returns `None` for non-data lines (`event:`, `id:`, `retry:`, `:` comments),
/// blank payloads, and the `[DONE]` sentinel.
pub fn data_payload(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("data:")?;
    let payload = rest.trim();
    if payload.is_empty() || payload == "[DONE]" {
        return None;
    }
    Some(payload)
}

/// Counters kept while decoding a chat stream, reported when it ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    pub events: usize,
    pub malformed: usize,
    pub unknown: usize,
}

/// Turns chat-stream bytes into [`StreamEvent`]s.
///
/// A malformed or unrecognised envelope is logged and dropped; it never
/// stops the stream.
#[derive(Debug, Default)]
pub struct EventDecoder {
    lines: LineBuffer,
    stats: DecodeStats,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let lines = self.lines.push(chunk);
        lines
            .iter()
            .filter_map(|line| self.decode_line(line))
            .collect()
    }

    pub fn finish(&mut self) -> Vec<StreamEvent> {
        self.lines
            .finish()
            .and_then(|line| self.decode_line(&line))
            .into_iter()
            .collect()
    }

    pub fn stats(&self) -> DecodeStats {
        self.stats
    }

    fn decode_line(&mut self, line: &str) -> Option<StreamEvent> {
        let payload = data_payload(line)?;
        match StreamEvent::decode(payload) {
            Ok(event) => {
                self.stats.events += 1;
                Some(event)
            }
            Err(DecodeError::UnknownType(kind)) => {
                self.stats.unknown += 1;
                debug!(%kind, "skipping unrecognised stream event");
                None
            }
            Err(err) => {
                self.stats.malformed += 1;
                warn!("skipping stream event: {err}");
                None
            }
        }
    }
}

/// Decoder for plain-text event streams (node logs): every non-empty `data:`
/// payload is one line of text.
#[derive(Debug, Default)]
pub struct TextDecoder {
    lines: LineBuffer,
}

impl TextDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.lines
            .push(chunk)
            .iter()
            .filter_map(|line| data_payload(line).map(str::to_string))
            .collect()
    }

    pub fn finish(&mut self) -> Option<String> {
        let line = self.lines.finish()?;
        data_payload(&line).map(str::to_string)
    }
}

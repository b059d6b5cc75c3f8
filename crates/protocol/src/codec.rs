//! Newline-delimited JSON codec for the worker's standard streams.
//!
//! # Line Format
//!
//! Each message is exactly one JSON object followed by `\n`. Surrounding
//! whitespace (including a trailing `\r`) is ignored and blank lines are
//! skipped.
//!
//! # Streaming
//!
//! Pipe reads split and coalesce lines arbitrarily. [`LineDecoder`] keeps the
//! unterminated tail of the stream between reads, so feeding a line in one
//! chunk or one byte at a time yields the same events. A malformed line is
//! returned as an error and decoding resumes with the next line.

use bytes::{Buf, Bytes, BytesMut};
use serde_json::Value;

use crate::commands::ControlCommand;
use crate::error::{ProtocolError, Result};
use crate::events::ProtocolEvent;

/// Line delimiter.
pub const LINE_DELIMITER: u8 = b'\n';

/// Initial capacity of the decoder's accumulator.
const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Encodes a command as a single JSON line, delimiter included.
///
/// The returned buffer is meant to be handed to one `write_all` call.
pub fn encode_command(command: &ControlCommand) -> Result<Vec<u8>> {
    let mut line = serde_json::to_vec(command)?;
    line.push(LINE_DELIMITER);
    Ok(line)
}

/// Decodes one complete line into an event.
///
/// The line must be a JSON object. Callers are expected to have trimmed it
/// and skipped blank lines.
pub fn decode_line(line: &str) -> Result<ProtocolEvent> {
    decode_bytes(line.as_bytes())
}

/// Decodes one complete line of raw bytes into an event.
///
/// Bytes that are not valid UTF-8 make the line malformed.
pub fn decode_bytes(line: &[u8]) -> Result<ProtocolEvent> {
    match serde_json::from_slice::<Value>(line) {
        Ok(Value::Object(map)) => Ok(ProtocolEvent::classify(map)),
        Ok(_) => Err(ProtocolError::NotAnObject {
            line: String::from_utf8_lossy(line).into_owned(),
        }),
        Err(e) => Err(ProtocolError::Decode {
            reason: e.to_string(),
            line: String::from_utf8_lossy(line).into_owned(),
        }),
    }
}

/// Incremental decoder for a newline-delimited JSON byte stream.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: BytesMut,
    /// Length of the buffer prefix already searched for a delimiter.
    scanned: usize,
}

impl LineDecoder {
    /// Creates an empty decoder.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            scanned: 0,
        }
    }

    /// Appends a chunk read from the stream.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Returns the next complete, non-blank line, trimmed, if one is buffered.
    ///
    /// Each buffered byte is searched for the delimiter once, however the
    /// line was split across reads.
    pub fn next_line(&mut self) -> Option<Bytes> {
        loop {
            let Some(offset) = self.buffer[self.scanned..]
                .iter()
                .position(|b| *b == LINE_DELIMITER)
            else {
                self.scanned = self.buffer.len();
                return None;
            };

            let line = self.buffer.split_to(self.scanned + offset).freeze();
            self.buffer.advance(1);
            self.scanned = 0;

            if let Some(trimmed) = trimmed(line) {
                return Some(trimmed);
            }
        }
    }

    /// Decodes the next complete line, if one is buffered.
    ///
    /// Returns `Some(Err(..))` for a malformed line; the line is consumed and
    /// the following call continues with the rest of the buffer.
    pub fn next_event(&mut self) -> Option<Result<ProtocolEvent>> {
        self.next_line().map(|line| decode_bytes(&line))
    }

    /// Appends a chunk and decodes every line it completes.
    pub fn decode_chunk(&mut self, chunk: &[u8]) -> Vec<Result<ProtocolEvent>> {
        self.push(chunk);
        let mut events = Vec::new();
        while let Some(event) = self.next_event() {
            events.push(event);
        }
        events
    }

    /// Flushes an unterminated trailing fragment at end of stream.
    pub fn finish(&mut self) -> Option<Result<ProtocolEvent>> {
        self.scanned = 0;
        if self.buffer.is_empty() {
            return None;
        }
        let rest = self.buffer.split().freeze();
        trimmed(rest).map(|line| decode_bytes(&line))
    }

    /// Number of bytes waiting for a delimiter.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

/// Strips surrounding ASCII whitespace; `None` if nothing is left.
fn trimmed(line: Bytes) -> Option<Bytes> {
    let text = line.trim_ascii();
    (!text.is_empty()).then(|| line.slice_ref(text))
}

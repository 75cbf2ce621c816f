//! Incremental frame parser for streamed completions
//!
//! The provider streams newline-delimited event frames. Chunks arrive at
//! arbitrary byte boundaries, so the parser buffers the trailing partial
//! line across reads and only interprets a line once its terminator has
//! been seen. Lines without the event prefix are dropped silently; the
//! `[DONE]` marker ends the stream.

use serde::Deserialize;

use crate::errors::{MesmerError, Result};

/// Prefix every event frame must carry
pub const EVENT_PREFIX: &str = "data: ";

/// Payload marking the end of a completed stream
pub const DONE_MARKER: &str = "[DONE]";

/// Maximum bytes buffered for one unterminated line (1MB)
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// One event observed on a completion stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A text delta to append to the in-flight reply
    Delta(String),
    /// The provider finished the reply normally
    Done,
    /// The stream ended abnormally; text already delivered stays valid
    Error(String),
}

#[derive(Debug, Deserialize)]
struct DeltaFrame {
    delta: String,
}

/// Line-buffering parser over raw stream chunks
#[derive(Debug, Default)]
pub struct FrameParser {
    /// Bytes of the current unterminated line
    buffer: Vec<u8>,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning every event completed by it.
    ///
    /// The buffer holds raw bytes rather than text so a UTF-8 sequence
    /// split across chunks reassembles correctly.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<StreamEvent>> {
        if self.buffer.len() + chunk.len() > MAX_LINE_BYTES {
            return Err(MesmerError::StreamInterrupted(format!(
                "frame line exceeds {} bytes",
                MAX_LINE_BYTES
            )));
        }
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let line_bytes: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line_bytes);
            if let Some(event) = parse_line(line.trim_end_matches(['\n', '\r'])) {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Whether an unterminated line is still buffered
    pub fn has_partial(&self) -> bool {
        !self.buffer.is_empty()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }
}

/// Interpret one complete line. Lines lacking the event prefix, and frames
/// whose payload does not parse, are dropped.
fn parse_line(line: &str) -> Option<StreamEvent> {
    let payload = line.strip_prefix(EVENT_PREFIX)?;
    if payload == DONE_MARKER {
        return Some(StreamEvent::Done);
    }
    serde_json::from_str::<DeltaFrame>(payload)
        .ok()
        .map(|frame| StreamEvent::Delta(frame.delta))
}

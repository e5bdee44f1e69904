//! Stream reassembler.
//!
//! The link delivers notifications in whatever chunking the radio stack
//! chose: part of a frame, exactly one frame, or several frames
//! concatenated.  The reassembler accumulates bytes and yields complete,
//! validated frames, resynchronising on the start marker after corruption.
//!
//! ```text
//! chunk ─▶ [ buffer ] ─▶ find FB BF ─▶ LEN ─▶ slice LEN+1 ─▶ decode
//!              ▲             │ miss          │ < 5              │
//!              │             ▼               ▼                  ▼
//!              │          discard       drop 2 bytes     Frame | Corrupt
//!              └──────────── wait for more bytes ◀──────────────┘
//! ```

use log::{debug, warn};

use super::codec::{self, Frame, MIN_FRAME_LEN, START_MARKER};
use crate::error::FrameError;

/// Header bytes that must be buffered before the loop runs.
const SCAN_THRESHOLD: usize = 4;

/// Outcome of one reassembled candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A frame passed validation.
    Frame(Frame),
    /// A candidate was dropped; scanning continues.
    Corrupt(FrameError),
}

/// Counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReassemblyStats {
    pub frames: u32,
    pub errors: u32,
    pub discarded_bytes: u32,
}

/// Streaming frame reassembler.
#[derive(Debug, Default)]
pub struct StreamReassembler {
    buffer: Vec<u8>,
    stats: ReassemblyStats,
}

impl StreamReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every frame (or frame error) it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while self.buffer.len() >= SCAN_THRESHOLD {
            let Some(start) = find_marker(&self.buffer) else {
                // A trailing 0xFB may be half of a marker split across chunks.
                let keep = usize::from(self.buffer.last() == Some(&START_MARKER[0]));
                let dropped = self.buffer.len() - keep;
                self.discard(dropped);
                break;
            };

            if start > 0 {
                debug!("reassembler: resync, skipping {} bytes", start);
                self.discard(start);
            }

            if self.buffer.len() < 3 {
                break;
            }

            let length_byte = self.buffer[2];
            let total = length_byte as usize + 1;
            if total < MIN_FRAME_LEN {
                warn!("reassembler: malformed length byte {}", length_byte);
                self.discard(2);
                self.stats.errors = self.stats.errors.saturating_add(1);
                events.push(StreamEvent::Corrupt(FrameError::MalformedLength(length_byte)));
                continue;
            }

            if self.buffer.len() < total {
                break;
            }

            let candidate: Vec<u8> = self.buffer.drain(..total).collect();
            match codec::decode(&candidate) {
                Ok(frame) => {
                    self.stats.frames = self.stats.frames.saturating_add(1);
                    events.push(StreamEvent::Frame(frame));
                }
                Err(e) => {
                    warn!("reassembler: dropping frame: {}", e);
                    self.stats.errors = self.stats.errors.saturating_add(1);
                    events.push(StreamEvent::Corrupt(e));
                }
            }
        }

        events
    }

    /// Drop all buffered bytes (e.g. after a disconnect).
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Bytes waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> ReassemblyStats {
        self.stats
    }

    fn discard(&mut self, count: usize) {
        self.buffer.drain(..count);
        self.stats.discarded_bytes = self.stats.discarded_bytes.saturating_add(count as u32);
    }
}

fn find_marker(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == START_MARKER)
}

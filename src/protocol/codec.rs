//! Frame codec.
//!
//! Wire format:
//! ```text
//! ┌──────┬──────┬─────┬────────┬───────────┬──────────┬──────┐
//! │ 0xFB │ 0xBF │ LEN │ OPCODE │ PARAM ... │ CHECKSUM │ 0xED │
//! └──────┴──────┴─────┴────────┴───────────┴──────────┴──────┘
//! ```
//!
//! `LEN = payload.len() + 4` and `CHECKSUM = (LEN + Σ payload) mod 256`,
//! where the payload is the opcode plus its parameters.  `LEN + 1` is the
//! total byte count of the frame including the start marker.

use crate::error::FrameError;

/// Two-byte start marker.
pub const START_MARKER: [u8; 2] = [0xFB, 0xBF];

/// Final byte of every frame.
pub const TERMINATOR: u8 = 0xED;

/// Marker + length + checksum + terminator.
pub const FRAME_OVERHEAD: usize = 5;

/// Smallest structurally valid frame (opcode only, no params).
pub const MIN_FRAME_LEN: usize = FRAME_OVERHEAD;

/// Largest payload the single length byte can describe.
pub const MAX_PAYLOAD: usize = u8::MAX as usize - 4;

/// A validated application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: u8,
    /// Opcode followed by parameters.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Parameters after the opcode byte.
    pub fn params(&self) -> &[u8] {
        &self.payload[1..]
    }
}

/// Whether a payload of `len` bytes can be framed: at least the opcode, and
/// short enough for the length byte.
pub fn payload_fits(len: usize) -> bool {
    (1..=MAX_PAYLOAD).contains(&len)
}

fn checksum(length: u8, payload: &[u8]) -> u8 {
    payload.iter().fold(length, |acc, b| acc.wrapping_add(*b))
}

/// Encode a payload (opcode + params) into a complete wire frame.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    debug_assert!(
        payload_fits(payload.len()),
        "payload length {} out of range",
        payload.len()
    );

    let length = (payload.len() + 4) as u8;
    let mut out = Vec::with_capacity(payload.len() + FRAME_OVERHEAD);
    out.extend_from_slice(&START_MARKER);
    out.push(length);
    out.extend_from_slice(payload);
    out.push(checksum(length, payload));
    out.push(TERMINATOR);
    out
}

/// Validate one complete frame and extract its payload.
///
/// The caller has already located the start marker and sliced exactly
/// `LEN + 1` bytes.
pub fn decode(frame: &[u8]) -> Result<Frame, FrameError> {
    let len = frame.len();
    if len < MIN_FRAME_LEN {
        return Err(FrameError::MalformedLength(frame.get(2).copied().unwrap_or(0)));
    }

    let terminator = frame[len - 1];
    if terminator != TERMINATOR {
        return Err(FrameError::Terminator(terminator));
    }

    let expected = checksum(frame[2], &frame[3..len - 2]);
    let actual = frame[len - 2];
    if expected != actual {
        return Err(FrameError::Checksum { expected, actual });
    }

    let payload = frame[3..len - 2].to_vec();
    match payload.first() {
        Some(&opcode) => Ok(Frame { opcode, payload }),
        None => Err(FrameError::EmptyPayload),
    }
}

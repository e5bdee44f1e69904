//! Unified error types for the protocol engine.
//!
//! A single `Error` enum that every subsystem converts into, so callers of
//! the [`Device`](crate::device::Device) API handle one type.  All variants
//! are `Copy` so they can be fanned out to every pending waiter on a
//! disconnect without allocation.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level engine error
// ---------------------------------------------------------------------------

/// Every fallible operation in the engine funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A candidate frame failed structural validation.
    Frame(FrameError),
    /// An awaited correlation never matched within its deadline.
    Timeout { waited_ms: u32 },
    /// The link dropped while the call was pending.
    Disconnected,
    /// The transport could not carry the request.
    Transport(TransportError),
    /// A command encoder rejected its arguments.
    InvalidCommand(&'static str),
    /// Configuration is invalid.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Frame(e) => write!(f, "frame: {e}"),
            Self::Timeout { waited_ms } => write!(f, "device timed out after {waited_ms}ms"),
            Self::Disconnected => write!(f, "device disconnected"),
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::InvalidCommand(msg) => write!(f, "invalid command: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl core::error::Error for Error {}

// ---------------------------------------------------------------------------
// Frame errors
// ---------------------------------------------------------------------------

/// Structural faults found while decoding a candidate frame.  Never fatal:
/// the reassembler drops the bytes and keeps scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Stored checksum does not match the recomputed one.
    Checksum { expected: u8, actual: u8 },
    /// Last byte is not `0xED`.
    Terminator(u8),
    /// Length byte describes a frame shorter than the 5-byte minimum.
    MalformedLength(u8),
    /// Frame carries no opcode byte.
    EmptyPayload,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Checksum { expected, actual } => {
                write!(f, "checksum mismatch (expected {expected:#04x}, got {actual:#04x})")
            }
            Self::Terminator(b) => write!(f, "bad terminator {b:#04x}"),
            Self::MalformedLength(len) => write!(f, "malformed length byte {len}"),
            Self::EmptyPayload => write!(f, "empty payload"),
        }
    }
}

impl From<FrameError> for Error {
    fn from(e: FrameError) -> Self {
        Self::Frame(e)
    }
}

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// No link is open.
    NotConnected,
    /// Device discovery failed.
    ScanFailed,
    /// Opening the link to a candidate failed.
    OpenFailed,
    /// The link exposes no usable notify characteristic.
    NoNotifyChannel,
    /// The link exposes no writable characteristic.
    NoWriteChannel,
    /// Every write channel rejected the frame.
    WriteFailed,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "not connected"),
            Self::ScanFailed => write!(f, "scan failed"),
            Self::OpenFailed => write!(f, "open failed"),
            Self::NoNotifyChannel => write!(f, "no notify channel"),
            Self::NoWriteChannel => write!(f, "no write channel"),
            Self::WriteFailed => write!(f, "all write channels failed"),
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Engine-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;

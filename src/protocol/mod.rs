//! Wire protocol for the robot brick.
//!
//! Byte-level framing, stream reassembly, and the typed command/report
//! encodings that ride inside each frame.  Everything here is pure: no I/O,
//! no timers, no shared state.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Protocol Stack                          │
//! │                                                              │
//! │  raw chunks ──▶ ┌─────────────┐ ──▶ ┌────────┐ ──▶ ┌───────┐ │
//! │                 │ Reassembler │     │ Codec  │     │ Parse │ │
//! │                 │ (resync)    │     │ decode │     │ typed │ │
//! │                 └─────────────┘     └────────┘     └───────┘ │
//! │                                                              │
//! │  bytes ◀──────────────────────────── ┌────────┐ ◀─ ┌───────┐ │
//! │                                      │ Codec  │    │Command│ │
//! │                                      │ encode │    │builder│ │
//! │                                      └────────┘    └───────┘ │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod codec;
pub mod commands;
pub mod opcodes;
pub mod parse;
pub mod reassembler;

pub use codec::{Frame, decode, encode};
pub use reassembler::{StreamEvent, StreamReassembler};

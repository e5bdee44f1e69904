//! Brickwire protocol engine.
//!
//! Speaks the framed binary protocol of a modular robot brick over a
//! write/notify radio link: frame codec, stream reassembly, request/response
//! correlation and the device state engine with its boot, maintenance and
//! emergency-stop sequences.  The radio itself sits behind the
//! [`transport`] traits.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Device (state engine, boot, maintain, recovery)             │
//! ├───────────────────────────┬──────────────────────────────────┤
//! │  Correlator (queue,       │  EventBus (typed DeviceEvent     │
//! │  waiters, spacing)        │  fan-out)                        │
//! ├───────────────────────────┴──────────────────────────────────┤
//! │  Session (channel selection, write fallback, reassembly)     │
//! ├──────────────────────────────────────────────────────────────┤
//! │  protocol (codec, reassembler, commands, parse)              │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Transport / Link (platform radio stack)                     │
//! └──────────────────────────────────────────────────────────────┘
//! ```

#![deny(unused_must_use)]

pub mod config;
pub mod correlator;
pub mod device;
pub mod error;
pub mod events;
pub mod protocol;
pub mod runtime;
pub mod session;
pub mod transport;

pub use config::EngineConfig;
pub use correlator::CancelToken;
pub use device::{Device, DeviceState, StopReport};
pub use error::{Error, FrameError, Result, TransportError};
pub use events::{DeviceEvent, EventStream};
pub use session::discover;

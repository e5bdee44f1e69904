//! Transport abstraction: the radio stack below the session.
//!
//! The engine needs exactly three things from the platform: discovery by
//! name, opening a link to a candidate, and per-characteristic writes.  A
//! link also hands back notification chunks and a disconnect signal through
//! [`Link::recv`].
//!
//! The session is generic over [`Transport`], so adding a new radio stack
//! (or a loopback for tests) requires zero changes to the protocol logic.

use core::fmt;
use core::time::Duration;

/// A discovered device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Platform address or handle.
    pub id: String,
    /// Advertised local name.
    pub name: String,
    pub rssi: Option<i16>,
}

/// GATT characteristic capabilities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CharProps {
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
    pub indicate: bool,
}

impl CharProps {
    pub fn writable(&self) -> bool {
        self.write || self.write_without_response
    }

    pub fn notifies(&self) -> bool {
        self.notify || self.indicate
    }
}

/// One characteristic exposed by an open link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Characteristic {
    pub service: u128,
    pub uuid: u128,
    pub props: CharProps,
}

/// Something the link delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A notification chunk from a subscribed characteristic.
    Notification { uuid: u128, data: Vec<u8> },
    /// The link dropped.  No further events follow.
    Disconnected,
}

/// Device discovery and link establishment.
#[allow(async_fn_in_trait)]
pub trait Transport {
    type Link: Link;
    /// Error type for this transport.
    type Error: fmt::Debug;

    /// Scan for up to `timeout` and return devices whose advertised name
    /// contains `name_filter`.
    async fn discover(
        &self,
        name_filter: &str,
        timeout: Duration,
    ) -> Result<Vec<Candidate>, Self::Error>;

    /// Connect to a candidate.
    async fn open(&self, candidate: &Candidate) -> Result<Self::Link, Self::Error>;
}

/// An open connection to one device.
#[allow(async_fn_in_trait)]
pub trait Link {
    /// Error type for this link.
    type Error: fmt::Debug;

    /// Characteristics discovered on connect.
    fn characteristics(&self) -> Vec<Characteristic>;

    async fn subscribe(&self, uuid: u128) -> Result<(), Self::Error>;

    async fn unsubscribe(&self, uuid: u128) -> Result<(), Self::Error>;

    /// Write one frame to a characteristic.
    async fn write(&self, uuid: u128, data: &[u8]) -> Result<(), Self::Error>;

    /// Next notification chunk or disconnect.
    async fn recv(&self) -> LinkEvent;

    /// Drop the connection.  Must make a pending [`recv`](Self::recv) return
    /// [`LinkEvent::Disconnected`].
    async fn close(&self);
}

// ── UUID helpers ───────────────────────────────────────────────

/// Parse a 128-bit UUID in hyphenated or plain hex form.
pub fn parse_uuid(text: &str) -> Option<u128> {
    let hex: String = text.chars().filter(|c| *c != '-').collect();
    if hex.len() != 32 {
        return None;
    }
    u128::from_str_radix(&hex, 16).ok()
}

/// Lower-case hyphenated form, e.g. `0000ffe1-0000-1000-8000-00805f9b34fb`.
pub fn format_uuid(uuid: u128) -> String {
    let hex = format!("{uuid:032x}");
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

/// Case-insensitive prefix match on the hyphenated form.
pub fn uuid_has_prefix(uuid: u128, prefix: &str) -> bool {
    format_uuid(uuid).starts_with(&prefix.to_ascii_lowercase())
}

//! Engine configuration parameters
//!
//! All tunable timings and channel-selection hints for the protocol engine.
//! Values can be loaded from a JSON document; missing keys fall back to the
//! defaults below.

use core::time::Duration;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    // --- Discovery ---
    /// Case-insensitive substring matched against advertised names
    pub name_filter: String,
    /// Bounded scan duration (milliseconds)
    pub scan_timeout_ms: u32,

    // --- Channel selection ---
    /// UUID prefix of the vendor service; notify channels are narrowed to it
    /// when any match
    pub vendor_service_prefix: Option<String>,
    /// Known-good write characteristics, most preferred first
    pub preferred_write_uuids: Vec<String>,

    // --- Command queue ---
    /// Minimum gap between the end of one send and the start of the next
    pub command_spacing_ms: u32,
    /// Wait for a same-opcode reply after plain sends
    pub single_flight: bool,
    /// Deadline for the implicit single-flight wait
    pub implicit_timeout_ms: u32,
    /// Default deadline for explicit waiters
    pub request_timeout_ms: u32,

    // --- Boot sequence ---
    pub boot_on_connect: bool,
    pub status_timeout_ms: u32,
    pub battery_timeout_ms: u32,
    pub enable_timeout_ms: u32,
    /// Delay between the two priming commands
    pub priming_settle_ms: u32,
    /// Delay between module enable commands
    pub module_settle_ms: u32,

    // --- Recovery ---
    /// Delay between per-module stop commands
    pub stop_settle_ms: u32,
    /// How long a broadcast servo read keeps collecting replies
    pub broadcast_collect_ms: u32,

    // --- Maintenance (0 disables) ---
    pub keepalive_interval_ms: u32,
    pub battery_interval_ms: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            // Discovery
            name_filter: "jimu".into(),
            scan_timeout_ms: 5000,

            // Channel selection
            vendor_service_prefix: Some("49535343".into()),
            preferred_write_uuids: vec![
                "49535343-8841-43f4-a8d4-ecbe34729bb3".into(),
                "0000ffe1-0000-1000-8000-00805f9b34fb".into(),
            ],

            // Command queue
            command_spacing_ms: 25,
            single_flight: true,
            implicit_timeout_ms: 800,
            request_timeout_ms: 1200,

            // Boot
            boot_on_connect: true,
            status_timeout_ms: 1500,
            battery_timeout_ms: 1500,
            enable_timeout_ms: 1200,
            priming_settle_ms: 200,
            module_settle_ms: 100,

            // Recovery
            stop_settle_ms: 30,
            broadcast_collect_ms: 300,

            // Maintenance
            keepalive_interval_ms: 5000,  // 0.2 Hz
            battery_interval_ms: 30_000, // 1 / 30s
        }
    }
}

fn ms(value: u32) -> Duration {
    Duration::from_millis(u64::from(value))
}

impl EngineConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(json).context("parsing engine config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load, parse and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading engine config {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("in {}", path.display()))
    }

    /// Reject values that would make the engine misbehave.
    pub fn validate(&self) -> Result<(), Error> {
        if self.name_filter.trim().is_empty() {
            return Err(Error::Config("name_filter must not be empty"));
        }
        if self.scan_timeout_ms == 0 {
            return Err(Error::Config("scan_timeout_ms must be positive"));
        }
        if self.request_timeout_ms == 0
            || self.implicit_timeout_ms == 0
            || self.status_timeout_ms == 0
            || self.battery_timeout_ms == 0
            || self.enable_timeout_ms == 0
        {
            return Err(Error::Config("timeouts must be positive"));
        }
        if self
            .preferred_write_uuids
            .iter()
            .any(|u| crate::transport::parse_uuid(u).is_none())
        {
            return Err(Error::Config("preferred_write_uuids contains a malformed UUID"));
        }
        Ok(())
    }

    pub fn scan_timeout(&self) -> Duration {
        ms(self.scan_timeout_ms)
    }

    pub fn command_spacing(&self) -> Duration {
        ms(self.command_spacing_ms)
    }

    pub fn implicit_timeout(&self) -> Duration {
        ms(self.implicit_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        ms(self.request_timeout_ms)
    }

    pub fn status_timeout(&self) -> Duration {
        ms(self.status_timeout_ms)
    }

    pub fn battery_timeout(&self) -> Duration {
        ms(self.battery_timeout_ms)
    }

    pub fn enable_timeout(&self) -> Duration {
        ms(self.enable_timeout_ms)
    }

    pub fn priming_settle(&self) -> Duration {
        ms(self.priming_settle_ms)
    }

    pub fn module_settle(&self) -> Duration {
        ms(self.module_settle_ms)
    }

    pub fn stop_settle(&self) -> Duration {
        ms(self.stop_settle_ms)
    }

    pub fn broadcast_collect(&self) -> Duration {
        ms(self.broadcast_collect_ms)
    }

    /// `None` when the keep-alive timer is disabled.
    pub fn keepalive_interval(&self) -> Option<Duration> {
        (self.keepalive_interval_ms > 0).then(|| ms(self.keepalive_interval_ms))
    }

    /// `None` when the battery refresh timer is disabled.
    pub fn battery_interval(&self) -> Option<Duration> {
        (self.battery_interval_ms > 0).then(|| ms(self.battery_interval_ms))
    }

    /// Preferred write UUIDs that parse; malformed entries are skipped.
    pub fn preferred_write_channels(&self) -> Vec<u128> {
        self.preferred_write_uuids
            .iter()
            .filter_map(|u| crate::transport::parse_uuid(u))
            .collect()
    }
}

//! Best-effort emergency stop.
//!
//! Drives every known actuator to a safe state from the last presence map.
//! Each step is attempted regardless of earlier failures, and nothing waits
//! for a reply, so a half-dead link or stale IDs cannot stall the sequence.
//!
//! Order: motors (settling between), servos, broadcast position read, eyes,
//! ultrasonic LEDs.

use async_io_mini::Timer;
use log::{info, warn};

use super::Device;
use crate::error::Result;
use crate::protocol::commands::{self, RotateDirection, Rgb};
use crate::protocol::parse::StatusMap;
use crate::transport::Link;

/// Outcome of an emergency stop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    pub attempted: usize,
    /// Human-readable label for each step that failed.
    pub failed: Vec<String>,
}

impl StopReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, step: String, result: Result<()>) {
        self.attempted += 1;
        if let Err(e) = result {
            warn!("recovery: {} failed: {}", step, e);
            self.failed.push(step);
        }
    }
}

impl<L: Link> Device<L> {
    /// Stop everything listed in the last known status map, refreshing it
    /// first if none is cached.  Never fails.
    pub async fn emergency_stop(&self) -> StopReport {
        let cached = self.inner.state.borrow().last_status.clone();
        let status = match cached {
            Some(status) => status,
            None => match self.refresh_status().await {
                Ok(status) => status,
                Err(e) => {
                    warn!("recovery: no status map, stopping broadcast only: {}", e);
                    StatusMap::default()
                }
            },
        };
        self.emergency_stop_with(&status).await
    }

    /// Stop every actuator in `status`.
    pub async fn emergency_stop_with(&self, status: &StatusMap) -> StopReport {
        let mut report = StopReport::default();
        info!(
            "recovery: stopping {} motor(s), {} servo(s)",
            status.motors().len(),
            status.servos().len()
        );

        for id in status.motors() {
            let result = match commands::stop_motor(id) {
                Ok(payload) => self.send_detached(payload).await,
                Err(e) => Err(e),
            };
            report.record(format!("stop motor {id}"), result);
            Timer::after(self.inner.config.stop_settle()).await;
        }

        for id in status.servos() {
            let result = match commands::rotate_servos(&[id], RotateDirection::Clockwise, 0) {
                Ok(payload) => self.send_detached(payload).await,
                Err(e) => Err(e),
            };
            report.record(format!("stop servo {id}"), result);
        }

        let result = self.send_detached(commands::read_servo_position(0)).await;
        report.record("broadcast position read".to_string(), result);

        if status.eye_mask != 0 {
            let result = match commands::eye_off(status.eye_mask) {
                Ok(payload) => self.send_detached(payload).await,
                Err(e) => Err(e),
            };
            report.record(format!("eyes off {:#04x}", status.eye_mask), result);
        }

        for id in status.ultrasonic() {
            let result = match commands::ultrasonic_led(id, Rgb::OFF) {
                Ok(payload) => self.send_detached(payload).await,
                Err(e) => Err(e),
            };
            report.record(format!("ultrasonic led {id} off"), result);
        }

        info!(
            "recovery: {} step(s), {} failed",
            report.attempted,
            report.failed.len()
        );
        report
    }
}

//! Boot sequence run once after connect.
//!
//! Probe, read identity and presence, enable what was found, read the
//! battery.  Each step is best-effort: a timeout or transport failure is
//! logged and the sequence moves on.

use log::{debug, info, warn};

use super::Device;
use crate::events::DeviceEvent;
use crate::protocol::commands;
use crate::protocol::opcodes::ModuleKind;
use crate::protocol::parse::StatusMap;
use crate::transport::Link;
use async_io_mini::Timer;

/// Module families enabled at boot, in order.
pub const BOOT_ENABLE_ORDER: [ModuleKind; 4] = [
    ModuleKind::Infrared,
    ModuleKind::Eye,
    ModuleKind::Ultrasonic,
    ModuleKind::Speaker,
];

/// `(kind, mask)` pairs to enable for a presence map.
pub fn modules_to_enable(status: &StatusMap) -> Vec<(ModuleKind, u8)> {
    BOOT_ENABLE_ORDER
        .iter()
        .map(|&kind| (kind, status.mask(kind)))
        .filter(|&(_, mask)| mask != 0)
        .collect()
}

impl<L: Link> Device<L> {
    /// Run the boot sequence.  Never fails; ends with `BootCompleted`.
    pub async fn boot(&self) {
        info!("boot: starting");
        let config = &self.inner.config;

        if let Err(e) = self.send(commands::probe()).await {
            warn!("boot: probe failed: {}", e);
        }
        Timer::after(config.priming_settle()).await;

        match self.request_brick_info().await {
            Ok(info) => debug!("boot: brick info '{}'", info),
            Err(e) => debug!("boot: no brick info: {}", e),
        }

        match self.refresh_status().await {
            Ok(status) => self.enable_detected_modules(&status).await,
            Err(e) => warn!("boot: status unavailable, skipping module enable: {}", e),
        }

        match self.request_battery().await {
            Ok(b) => info!("boot: battery {:.2}V charging={}", b.volts, b.charging),
            Err(e) => warn!("boot: battery unavailable: {}", e),
        }

        info!("boot: complete");
        self.inner.events.publish(&DeviceEvent::BootCompleted);
    }

    /// Enable each detected family, settling between enables.
    pub async fn enable_detected_modules(&self, status: &StatusMap) {
        for (kind, mask) in modules_to_enable(status) {
            match self.enable_modules(kind, mask).await {
                Ok(result) if result.ok => debug!("boot: enabled {:?} mask {:#04x}", kind, mask),
                Ok(result) => warn!(
                    "boot: enable {:?} mask {:#04x} rejected ({:#04x})",
                    kind, mask, result.status
                ),
                Err(e) => warn!("boot: enable {:?} failed: {}", kind, e),
            }
            Timer::after(self.inner.config.module_settle()).await;
        }
    }
}

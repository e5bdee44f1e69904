//! Periodic keep-alive and battery refresh.
//!
//! The schedule itself is pure: it is given elapsed time and says what is
//! due, so it can be tested without timers.  [`Device::maintain`] is the
//! timer-driven loop around it.
//!
//! ```text
//!   t=0        5s        10s       15s  ...  30s
//!   │──────────┼─────────┼─────────┼──────────┼──▶
//!              ping      ping      ping      ping + battery
//! ```

use core::time::Duration;
use std::time::Instant;

use async_io_mini::Timer;
use log::{debug, info};

use super::Device;
use crate::config::EngineConfig;
use crate::protocol::commands;
use crate::transport::Link;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceTask {
    KeepAlive,
    BatteryRefresh,
}

#[derive(Debug, Clone, Copy)]
struct Periodic {
    task: MaintenanceTask,
    interval: Duration,
    /// Next fire, as elapsed time since the schedule started.
    next: Duration,
}

/// Next-deadline bookkeeping for the maintenance timers.
#[derive(Debug, Clone, Default)]
pub struct MaintenanceSchedule {
    timers: Vec<Periodic>,
}

impl MaintenanceSchedule {
    /// `None` disables a timer.
    pub fn new(keepalive: Option<Duration>, battery: Option<Duration>) -> Self {
        let timers = [
            (MaintenanceTask::KeepAlive, keepalive),
            (MaintenanceTask::BatteryRefresh, battery),
        ]
        .into_iter()
        .filter_map(|(task, interval)| {
            interval
                .filter(|i| !i.is_zero())
                .map(|interval| Periodic {
                    task,
                    interval,
                    next: interval,
                })
        })
        .collect();
        Self { timers }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.keepalive_interval(), config.battery_interval())
    }

    pub fn is_idle(&self) -> bool {
        self.timers.is_empty()
    }

    /// Earliest pending fire, or `None` when every timer is disabled.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.timers.iter().map(|t| t.next).min()
    }

    /// Tasks due at `elapsed`.  Each fires at most once per call; missed
    /// periods are skipped rather than replayed.
    pub fn due(&mut self, elapsed: Duration) -> Vec<MaintenanceTask> {
        let mut fired = Vec::new();
        for timer in &mut self.timers {
            if timer.next > elapsed {
                continue;
            }
            fired.push(timer.task);
            while timer.next <= elapsed {
                timer.next += timer.interval;
            }
        }
        fired
    }
}

impl<L: Link> Device<L> {
    /// Fire-and-forget maintenance until the surrounding
    /// [`run`](Device::run) ends.
    pub async fn maintain(&self) {
        let mut schedule = MaintenanceSchedule::from_config(&self.inner.config);
        if schedule.is_idle() {
            info!("maintain: all timers disabled");
            core::future::pending::<()>().await;
        }

        let start = Instant::now();
        while let Some(deadline) = schedule.next_deadline() {
            let elapsed = start.elapsed();
            if deadline > elapsed {
                Timer::after(deadline - elapsed).await;
            }
            for task in schedule.due(start.elapsed()) {
                let payload = match task {
                    MaintenanceTask::KeepAlive => commands::ping(),
                    MaintenanceTask::BatteryRefresh => commands::battery_request(),
                };
                if let Err(e) = self.send_detached(payload).await {
                    debug!("maintain: {:?} not sent: {}", task, e);
                }
            }
        }
    }
}

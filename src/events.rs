//! Typed device events and the subscriber bus.
//!
//! The reader task is the only producer.  Each subscriber owns a bounded
//! channel; a subscriber that falls behind loses events rather than
//! stalling the reader.
//!
//! ```text
//!                       ┌──────────────┐ ──▶ EventStream (UI)
//!  reader ─▶ publish ─▶ │   EventBus   │ ──▶ EventStream (logger)
//!                       └──────────────┘ ──▶ EventStream (read_all ...)
//! ```

use core::cell::RefCell;
use std::rc::Rc;

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::channel::Channel;
use log::warn;

use crate::error::{FrameError, TransportError};
use crate::protocol::Frame;
use crate::protocol::parse::{
    Battery, CommandResult, ErrorReport, SensorReading, ServoFeedback, StatusMap,
};

/// Events buffered per subscriber before new ones are dropped.
pub const SUBSCRIBER_DEPTH: usize = 32;

/// Everything the engine reports upward.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// Session open and the reader running.
    Connected,
    /// Every validated frame, before any typed event it produces.
    FrameReceived(Frame),
    /// Reassembler discarded a corrupt candidate.
    FrameDropped(FrameError),
    StatusUpdated(StatusMap),
    BatteryUpdated(Battery),
    SensorBatch(Vec<SensorReading>),
    ServoPositionUpdated(ServoFeedback),
    CommandResult(CommandResult),
    /// Ack-like reply with a nonzero status.
    DeviceError(CommandResult),
    ErrorReport(ErrorReport),
    PingEcho,
    BrickInfo(String),
    BootCompleted,
    TransportError(TransportError),
    Disconnected,
}

type Queue = Channel<NoopRawMutex, DeviceEvent, SUBSCRIBER_DEPTH>;

/// Fan-out of [`DeviceEvent`]s to every live [`EventStream`].
#[derive(Default)]
pub struct EventBus {
    subscribers: RefCell<Vec<Rc<Queue>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> EventStream {
        let queue = Rc::new(Queue::new());
        self.subscribers.borrow_mut().push(queue.clone());
        EventStream { queue }
    }

    /// Deliver `event` to every subscriber.  Dropped streams are pruned.
    pub fn publish(&self, event: &DeviceEvent) {
        let mut subs = self.subscribers.borrow_mut();
        subs.retain(|q| Rc::strong_count(q) > 1);
        for queue in subs.iter() {
            if queue.try_send(event.clone()).is_err() {
                warn!("events: subscriber full, dropping {:?}", event);
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .borrow()
            .iter()
            .filter(|q| Rc::strong_count(q) > 1)
            .count()
    }
}

/// Receiving end of one subscription.
pub struct EventStream {
    queue: Rc<Queue>,
}

impl EventStream {
    pub async fn next(&self) -> DeviceEvent {
        self.queue.receive().await
    }

    pub fn try_next(&self) -> Option<DeviceEvent> {
        self.queue.try_receive().ok()
    }

    /// Drain what is already buffered.
    pub fn drain(&self) -> Vec<DeviceEvent> {
        core::iter::from_fn(|| self.try_next()).collect()
    }
}

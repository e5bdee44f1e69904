//! Device state engine.
//!
//! [`Device`] ties the session, the correlator and the state together and
//! exposes one method per command.  [`Device::run`] drives everything that
//! happens without a caller: the reader, the send worker, the boot sequence
//! and periodic maintenance.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                         Device::run                            │
//! │                                                                │
//! │  ┌──────────┐   frames   ┌─────────────┐  events  ┌──────────┐ │
//! │  │  reader  │──────────▶│ DeviceState │────────▶│ EventBus │ │
//! │  └──────────┘            └─────────────┘          └──────────┘ │
//! │        │                                                       │
//! │        └───────────▶ Correlator::dispatch (waiters)            │
//! │                                                                │
//! │  ┌──────────┐            ┌─────────────┐                       │
//! │  │  worker  │◀── queue ──│  commands   │◀── boot / maintain /  │
//! │  └──────────┘            └─────────────┘    caller methods     │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! When the link drops every waiter is rejected, every queued command
//! fails, the state resets and a single `Disconnected` event goes out.

pub mod boot;
pub mod maintenance;
pub mod recovery;
pub mod state;

use core::cell::{Cell, RefCell};
use core::time::Duration;
use std::rc::Rc;

use async_io_mini::Timer;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::signal::Signal;
use futures_lite::future;
use log::{debug, info, warn};

use crate::config::EngineConfig;
use crate::correlator::{CancelToken, Correlator, expect};
use crate::error::{Error, Result};
use crate::events::{DeviceEvent, EventBus, EventStream};
use crate::protocol::commands::{self, Rgb, RotateDirection};
use crate::protocol::opcodes::{self, ModuleKind};
use crate::protocol::parse::{
    self, CommandResult, ErrorReport, SensorKind, SensorReading, ServoFeedback,
};
use crate::protocol::{Frame, StreamEvent};
use crate::session::Session;
use crate::transport::{Candidate, Link, LinkEvent, Transport};

pub use recovery::StopReport;
pub use state::DeviceState;

struct Inner<L: Link> {
    config: EngineConfig,
    session: Session<L>,
    correlator: Correlator,
    state: RefCell<DeviceState>,
    events: EventBus,
    shutdown: Signal<NoopRawMutex, ()>,
    torn_down: Cell<bool>,
}

/// Handle to one connected brick.  Clones share the connection.
pub struct Device<L: Link> {
    inner: Rc<Inner<L>>,
}

impl<L: Link> Clone for Device<L> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<L: Link> Device<L> {
    /// Open a session to `candidate`.  Nothing is sent until [`run`](Self::run)
    /// is polled.
    pub async fn connect<T>(
        transport: &T,
        candidate: &Candidate,
        config: EngineConfig,
    ) -> Result<Self>
    where
        T: Transport<Link = L>,
    {
        config.validate()?;
        let session = Session::open(transport, candidate, &config).await?;
        let correlator = Correlator::new(&config);
        let state = DeviceState {
            connected: true,
            ..DeviceState::default()
        };
        Ok(Self {
            inner: Rc::new(Inner {
                config,
                session,
                correlator,
                state: RefCell::new(state),
                events: EventBus::new(),
                shutdown: Signal::new(),
                torn_down: Cell::new(false),
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> EventStream {
        self.inner.events.subscribe()
    }

    /// Snapshot of the last known state.
    pub fn state(&self) -> DeviceState {
        self.inner.state.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.session.is_connected()
    }

    /// Live waiters, for leak checks.
    pub fn pending_waiters(&self) -> usize {
        self.inner.correlator.waiters().pending()
    }

    pub fn session(&self) -> &Session<L> {
        &self.inner.session
    }

    // ── Driving ──────────────────────────────────────────────

    /// Run the reader, the send worker, boot and maintenance until the link
    /// drops or [`disconnect`](Self::disconnect) is called.
    pub async fn run(&self) {
        if self.inner.torn_down.get() {
            return;
        }
        self.inner.events.publish(&DeviceEvent::Connected);

        let reader = self.read_loop();
        let stop = self.inner.shutdown.wait();
        let worker = self.inner.correlator.run(&self.inner.session);
        let lifecycle = self.lifecycle();
        future::or(future::or(reader, stop), future::or(worker, lifecycle)).await;

        self.teardown();
    }

    async fn lifecycle(&self) {
        if self.inner.config.boot_on_connect {
            self.boot().await;
        }
        self.maintain().await;
    }

    async fn read_loop(&self) {
        loop {
            match self.inner.session.recv().await {
                LinkEvent::Notification { data, .. } => {
                    for event in self.inner.session.ingest(&data) {
                        match event {
                            StreamEvent::Frame(frame) => self.handle_frame(&frame),
                            StreamEvent::Corrupt(e) => {
                                debug!("device: dropped corrupt frame: {}", e);
                                self.inner.events.publish(&DeviceEvent::FrameDropped(e));
                            }
                        }
                    }
                }
                LinkEvent::Disconnected => {
                    warn!("device: link to '{}' lost", self.inner.session.device_name());
                    return;
                }
            }
        }
    }

    /// State first, then events, then waiters.
    fn handle_frame(&self, frame: &Frame) {
        let events = self.inner.state.borrow_mut().apply(frame);
        for event in &events {
            self.inner.events.publish(event);
        }
        self.inner.correlator.dispatch(frame);
    }

    fn teardown(&self) {
        if self.inner.torn_down.replace(true) {
            return;
        }
        self.inner.correlator.close();
        self.inner.session.release();
        self.inner.state.borrow_mut().reset();
        self.inner.events.publish(&DeviceEvent::Disconnected);
        info!("device: torn down");
    }

    /// Close the link and stop [`run`](Self::run).  Idempotent.
    pub async fn disconnect(&self) {
        if self.inner.torn_down.get() {
            return;
        }
        self.inner.correlator.close();
        self.inner.session.disconnect().await;
        self.teardown();
        self.inner.shutdown.signal(());
    }

    // ── Send helpers ─────────────────────────────────────────

    fn observe<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(Error::Transport(e)) = &result {
            self.inner.events.publish(&DeviceEvent::TransportError(*e));
        }
        result
    }

    /// Queue a command; single-flight rules apply.
    pub async fn send(&self, payload: Vec<u8>) -> Result<()> {
        let result = self.inner.correlator.send(payload).await;
        self.observe(result)
    }

    /// Queue a command and never wait for a reply.
    pub async fn send_detached(&self, payload: Vec<u8>) -> Result<()> {
        let result = self.inner.correlator.send_detached(payload).await;
        self.observe(result)
    }

    /// Queue a command and wait for the first frame `predicate` accepts.
    pub async fn request(
        &self,
        payload: Vec<u8>,
        predicate: impl Fn(&Frame) -> bool + 'static,
        timeout: Duration,
    ) -> Result<Frame> {
        let result = self.inner.correlator.request(payload, predicate, timeout).await;
        self.observe(result)
    }

    /// As [`request`](Self::request); `Ok(None)` once `cancel` fires.
    pub async fn request_cancellable(
        &self,
        payload: Vec<u8>,
        predicate: impl Fn(&Frame) -> bool + 'static,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<Option<Frame>> {
        let result = self
            .inner
            .correlator
            .request_cancellable(payload, predicate, timeout, cancel)
            .await;
        self.observe(result)
    }

    /// Wait for an unsolicited frame.
    pub async fn wait_for(
        &self,
        predicate: impl Fn(&Frame) -> bool + 'static,
        timeout: Duration,
    ) -> Result<Frame> {
        self.inner.correlator.wait_for(predicate, timeout).await
    }

    // ── Queries ──────────────────────────────────────────────

    pub async fn ping(&self) -> Result<()> {
        self.send(commands::ping()).await
    }

    /// Request and decode a status frame.
    pub async fn refresh_status(&self) -> Result<parse::StatusMap> {
        let frame = self
            .request(
                commands::status_request(),
                expect::opcode_min_len(opcodes::STATUS, state::ACK_MAX_LEN + 1),
                self.inner.config.status_timeout(),
            )
            .await?;
        parse::status_map(&frame).ok_or(Error::InvalidCommand("status reply"))
    }

    pub async fn request_battery(&self) -> Result<parse::Battery> {
        let frame = self
            .request(
                commands::battery_request(),
                expect::opcode_min_len(opcodes::BATTERY, 5),
                self.inner.config.battery_timeout(),
            )
            .await?;
        parse::battery(&frame).ok_or(Error::InvalidCommand("battery reply"))
    }

    pub async fn request_brick_info(&self) -> Result<String> {
        let frame = self
            .request(
                commands::brick_info_request(),
                expect::opcode(opcodes::BRICK_INFO),
                self.inner.config.request_timeout(),
            )
            .await?;
        Ok(parse::brick_info(&frame).unwrap_or_default())
    }

    pub async fn request_error_report(&self) -> Result<ErrorReport> {
        let frame = self
            .request(
                commands::error_report_request(),
                expect::opcode_min_len(opcodes::ERROR_REPORT, 2),
                self.inner.config.request_timeout(),
            )
            .await?;
        parse::error_report(&frame).ok_or(Error::InvalidCommand("error report reply"))
    }

    /// Enable every module of `kind` set in `mask` and wait for the ack.
    pub async fn enable_modules(&self, kind: ModuleKind, mask: u8) -> Result<CommandResult> {
        let frame = self
            .request(
                commands::enable_modules(kind, mask),
                expect::opcode(opcodes::ENABLE_MODULE),
                self.inner.config.enable_timeout(),
            )
            .await?;
        parse::command_result(&frame).ok_or(Error::InvalidCommand("enable reply"))
    }

    pub async fn read_servo_position(&self, id: u8) -> Result<ServoFeedback> {
        let frame = self
            .request(
                commands::read_servo_position(id),
                move |f| {
                    f.opcode == opcodes::SERVO_POSITION && f.payload.len() >= 3 && f.payload[1] == id
                },
                self.inner.config.request_timeout(),
            )
            .await?;
        parse::servo_feedback(&frame).ok_or(Error::InvalidCommand("servo position reply"))
    }

    /// Read one sensor.
    pub async fn read_sensor(&self, kind: SensorKind, id: u8) -> Result<SensorReading> {
        let readings = self.read_sensors(&[(kind, id)]).await?;
        readings
            .into_iter()
            .find(|r| r.kind == kind && r.id == id)
            .ok_or(Error::InvalidCommand("sensor missing from reply"))
    }

    /// Read several sensors.  Requests are split so each frame carries at
    /// most one ID per sensor type.
    pub async fn read_sensors(&self, requests: &[(SensorKind, u8)]) -> Result<Vec<SensorReading>> {
        let mut readings = Vec::new();
        for payload in commands::sensor_reads(requests)? {
            let frame = self
                .request(
                    payload,
                    expect::opcode(opcodes::SENSOR),
                    self.inner.config.request_timeout(),
                )
                .await?;
            readings.extend(parse::sensor_batch(&frame).unwrap_or_default());
        }
        Ok(readings)
    }

    /// Broadcast a position read and collect every servo that answers
    /// within the collection window.  `Ok(None)` once `cancel` fires.
    ///
    /// Replies are gathered by a collector on the reader path, so the
    /// result does not depend on subscriber queue depth.
    pub async fn read_all_servo_positions(
        &self,
        cancel: &CancelToken,
    ) -> Result<Option<Vec<ServoFeedback>>> {
        let is_position = |f: &Frame| f.opcode == opcodes::SERVO_POSITION && f.payload.len() >= 3;
        let collector = self.inner.correlator.waiters().collect(is_position);
        let first = self
            .request_cancellable(
                commands::read_servo_position(0),
                is_position,
                self.inner.config.request_timeout(),
                cancel,
            )
            .await?;
        if first.is_none() {
            return Ok(None);
        }

        let collect = async {
            Timer::after(self.inner.config.broadcast_collect()).await;
            false
        };
        let cancelled = async {
            cancel.cancelled().await;
            true
        };
        if future::or(cancelled, collect).await {
            return Ok(None);
        }
        if !self.inner.correlator.is_accepting() {
            return Err(Error::Disconnected);
        }

        let mut positions: Vec<ServoFeedback> = Vec::new();
        for fb in collector.take().iter().filter_map(parse::servo_feedback) {
            positions.retain(|p| p.id != fb.id);
            positions.push(fb);
        }
        positions.sort_by_key(|p| p.id);
        debug!("device: broadcast read found {} servo(s)", positions.len());
        Ok(Some(positions))
    }

    // ── Motion and peripherals ───────────────────────────────

    /// Move servos to `(id, degrees)` targets.
    pub async fn set_servo_positions(&self, targets: &[(u8, i16)], speed: u8) -> Result<()> {
        self.send(commands::set_servo_positions(targets, speed)?).await
    }

    pub async fn rotate_servos(
        &self,
        ids: &[u8],
        direction: RotateDirection,
        velocity: u16,
    ) -> Result<()> {
        self.send(commands::rotate_servos(ids, direction, velocity)?).await
    }

    pub async fn change_servo_id(&self, old: u8, new: u8) -> Result<()> {
        self.send(commands::change_servo_id(old, new)?).await
    }

    /// Run a motor at a signed speed for `duration_ms` (capped at 6s).
    pub async fn rotate_motor(&self, id: u8, speed: i16, duration_ms: u32) -> Result<()> {
        self.send(commands::rotate_motor(id, speed, duration_ms)?).await
    }

    pub async fn stop_motor(&self, id: u8) -> Result<()> {
        self.send(commands::stop_motor(id)?).await
    }

    pub async fn set_eye_color(&self, mask: u8, color: Rgb) -> Result<()> {
        self.send(commands::eye_color(mask, color)?).await
    }

    /// Color eye segments; each group is `(segment mask, color)`.
    pub async fn set_eye_segments(&self, mask: u8, segments: &[(u8, Rgb)]) -> Result<()> {
        self.send(commands::eye_segments(mask, segments)?).await
    }

    pub async fn eye_off(&self, mask: u8) -> Result<()> {
        self.send(commands::eye_off(mask)?).await
    }

    pub async fn play_eye_scene(&self, mask: u8, scene: u8, repeat: u8, color: Rgb) -> Result<()> {
        self.send(commands::eye_scene(mask, scene, repeat, color)?).await
    }

    pub async fn set_ultrasonic_led(&self, id: u8, color: Rgb) -> Result<()> {
        self.send(commands::ultrasonic_led(id, color)?).await
    }

    pub async fn change_peripheral_id(&self, kind: ModuleKind, old: u8, new: u8) -> Result<()> {
        self.send(commands::change_peripheral_id(kind, old, new)?).await
    }
}

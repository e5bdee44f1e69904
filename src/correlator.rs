//! Command/response correlator.
//!
//! The link has no sequence numbers, so replies are matched to requests by
//! predicate.  Two pieces cooperate:
//!
//! - [`WaiterRegistry`]: one-shot waiters.  Every inbound frame is offered
//!   to each live waiter; the first frame a predicate accepts resolves it.
//!   A [`Waiter`] deregisters itself on drop, so a timed-out or abandoned
//!   call never leaves a stale entry behind.
//! - The command queue: callers enqueue, one worker sends.  The worker
//!   enforces the minimum spacing between the end of one send and the start
//!   of the next and holds the bus while a reply is awaited.
//!
//! ```text
//!  caller ─▶ queue ─▶ worker ─▶ Outbound::send_payload ─▶ link
//!                        │
//!                        └── waits on ◀── WaiterRegistry ◀── dispatch(frame)
//! ```

use core::cell::{Cell, RefCell};
use core::task::Poll;
use core::time::Duration;
use std::rc::Rc;
use std::time::Instant;

use async_io_mini::Timer;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_sync::waitqueue::MultiWakerRegistration;
use futures_lite::future;
use log::{debug, warn};

use crate::config::EngineConfig;
use crate::error::{Error, Result, TransportError};
use crate::protocol::{Frame, codec};

/// Commands that may wait in the queue behind the one in flight.
const QUEUE_DEPTH: usize = 16;

fn millis(d: Duration) -> u32 {
    d.as_millis().min(u128::from(u32::MAX)) as u32
}

// ── Waiters ──────────────────────────────────────────────────

enum Outcome {
    Matched(Frame),
    Disconnected,
}

type Predicate = Box<dyn Fn(&Frame) -> bool>;

struct Slot {
    id: u32,
    predicate: Predicate,
    outcome: Rc<Signal<NoopRawMutex, Outcome>>,
}

struct Tap {
    id: u32,
    predicate: Predicate,
    frames: Rc<RefCell<Vec<Frame>>>,
}

#[derive(Default)]
struct Slots {
    next_id: Cell<u32>,
    live: RefCell<Vec<Slot>>,
    taps: RefCell<Vec<Tap>>,
}

impl Slots {
    fn next_id(&self) -> u32 {
        let id = self.next_id.get();
        self.next_id.set(id.wrapping_add(1));
        id
    }

    fn remove(&self, id: u32) {
        self.live.borrow_mut().retain(|s| s.id != id);
    }

    fn remove_tap(&self, id: u32) {
        self.taps.borrow_mut().retain(|t| t.id != id);
    }
}

/// Live one-shot waiters and multi-frame collectors.
#[derive(Default)]
pub struct WaiterRegistry {
    slots: Rc<Slots>,
}

impl WaiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for the first frame `predicate` accepts.
    pub fn register(&self, predicate: impl Fn(&Frame) -> bool + 'static) -> Waiter {
        self.register_boxed(Box::new(predicate))
    }

    fn register_boxed(&self, predicate: Predicate) -> Waiter {
        let id = self.slots.next_id();
        let outcome = Rc::new(Signal::new());
        self.slots.live.borrow_mut().push(Slot {
            id,
            predicate,
            outcome: outcome.clone(),
        });
        Waiter {
            id,
            outcome,
            slots: self.slots.clone(),
        }
    }

    /// Keep every frame `predicate` accepts until the [`Collector`] is
    /// dropped.  Collectors never consume a frame, so waiters still see it.
    pub fn collect(&self, predicate: impl Fn(&Frame) -> bool + 'static) -> Collector {
        let id = self.slots.next_id();
        let frames = Rc::new(RefCell::new(Vec::new()));
        self.slots.taps.borrow_mut().push(Tap {
            id,
            predicate: Box::new(predicate),
            frames: frames.clone(),
        });
        Collector {
            id,
            frames,
            slots: self.slots.clone(),
        }
    }

    /// Offer `frame` to every collector and waiter.  Matching waiters
    /// resolve and leave the registry.  Returns how many waiters matched.
    pub fn dispatch(&self, frame: &Frame) -> usize {
        for tap in self.slots.taps.borrow().iter() {
            if (tap.predicate)(frame) {
                tap.frames.borrow_mut().push(frame.clone());
            }
        }

        let mut matched = 0;
        self.slots.live.borrow_mut().retain(|slot| {
            if (slot.predicate)(frame) {
                slot.outcome.signal(Outcome::Matched(frame.clone()));
                matched += 1;
                false
            } else {
                true
            }
        });
        matched
    }

    /// Reject every waiter with [`Error::Disconnected`].
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<Slot> = self.slots.live.borrow_mut().drain(..).collect();
        for slot in &drained {
            slot.outcome.signal(Outcome::Disconnected);
        }
        drained.len()
    }

    pub fn pending(&self) -> usize {
        self.slots.live.borrow().len()
    }
}

/// A registered one-shot waiter.  Dropping it deregisters.
pub struct Waiter {
    id: u32,
    outcome: Rc<Signal<NoopRawMutex, Outcome>>,
    slots: Rc<Slots>,
}

impl Waiter {
    async fn resolved(&self) -> Result<Frame> {
        match self.outcome.wait().await {
            Outcome::Matched(frame) => Ok(frame),
            Outcome::Disconnected => Err(Error::Disconnected),
        }
    }

    /// Wait for the match, a disconnect, or `timeout`.
    pub async fn wait(self, timeout: Duration) -> Result<Frame> {
        let expired = async {
            Timer::after(timeout).await;
            Err(Error::Timeout {
                waited_ms: millis(timeout),
            })
        };
        future::or(self.resolved(), expired).await
    }

    /// As [`wait`](Self::wait), but resolves with `None` once `cancel` fires.
    pub async fn wait_cancellable(
        self,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<Option<Frame>> {
        let cancelled = async {
            cancel.cancelled().await;
            Ok(None)
        };
        let matched = async { self.wait(timeout).await.map(Some) };
        future::or(cancelled, matched).await
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        self.slots.remove(self.id);
    }
}

/// Frames gathered by [`WaiterRegistry::collect`].  Dropping it deregisters.
pub struct Collector {
    id: u32,
    frames: Rc<RefCell<Vec<Frame>>>,
    slots: Rc<Slots>,
}

impl Collector {
    /// Everything gathered since the last call.
    pub fn take(&self) -> Vec<Frame> {
        core::mem::take(&mut *self.frames.borrow_mut())
    }

    pub fn len(&self) -> usize {
        self.frames.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        self.slots.remove_tap(self.id);
    }
}

// ── Cancellation ─────────────────────────────────────────────

/// Tasks that may wait on one token at the same time.
const CANCEL_WAKERS: usize = 4;

struct CancelState {
    fired: Cell<bool>,
    wakers: RefCell<MultiWakerRegistration<CANCEL_WAKERS>>,
}

/// Per-call cancellation handle.  Clones share state.
#[derive(Clone)]
pub struct CancelToken {
    state: Rc<CancelState>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            state: Rc::new(CancelState {
                fired: Cell::new(false),
                wakers: RefCell::new(MultiWakerRegistration::new()),
            }),
        }
    }

    pub fn cancel(&self) {
        if !self.state.fired.replace(true) {
            self.state.wakers.borrow_mut().wake();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.fired.get()
    }

    /// Completes once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        core::future::poll_fn(|cx| {
            if self.state.fired.get() {
                return Poll::Ready(());
            }
            self.state.wakers.borrow_mut().register(cx.waker());
            Poll::Pending
        })
        .await;
    }
}

/// Ready-made reply predicates.
pub mod expect {
    use crate::protocol::Frame;

    /// Any frame carrying `op`.
    pub fn opcode(op: u8) -> impl Fn(&Frame) -> bool + 'static {
        move |f| f.opcode == op
    }

    /// Frame carrying `op` with a payload of at least `len` bytes.
    pub fn opcode_min_len(op: u8, len: usize) -> impl Fn(&Frame) -> bool + 'static {
        move |f| f.opcode == op && f.payload.len() >= len
    }
}

// ── Command queue ────────────────────────────────────────────

/// Where the worker writes payloads.
#[allow(async_fn_in_trait)]
pub trait Outbound {
    /// Frame and write one payload.
    async fn send_payload(&self, payload: &[u8]) -> Result<()>;
}

enum Reply {
    /// Fire and forget.
    None,
    /// Single-flight: wait for the same opcode, swallow the timeout.
    Echo,
    /// Caller-supplied predicate, registered by the worker right before
    /// the send so an earlier command's reply cannot satisfy it.
    Waiter {
        predicate: Predicate,
        timeout: Duration,
        cancel: Option<CancelToken>,
    },
}

type Done = Rc<Signal<NoopRawMutex, Result<Option<Frame>>>>;

struct QueuedCommand {
    payload: Vec<u8>,
    reply: Reply,
    done: Done,
}

/// Serialises outgoing commands and correlates their replies.
pub struct Correlator {
    waiters: WaiterRegistry,
    queue: Channel<NoopRawMutex, QueuedCommand, QUEUE_DEPTH>,
    in_flight: RefCell<Option<Done>>,
    accepting: Cell<bool>,
    last_end: Cell<Option<Instant>>,
    spacing: Duration,
    single_flight: bool,
    implicit_timeout: Duration,
    request_timeout: Duration,
}

impl Correlator {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            waiters: WaiterRegistry::new(),
            queue: Channel::new(),
            in_flight: RefCell::new(None),
            accepting: Cell::new(true),
            last_end: Cell::new(None),
            spacing: config.command_spacing(),
            single_flight: config.single_flight,
            implicit_timeout: config.implicit_timeout(),
            request_timeout: config.request_timeout(),
        }
    }

    pub fn waiters(&self) -> &WaiterRegistry {
        &self.waiters
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Offer an inbound frame to the waiters.
    pub fn dispatch(&self, frame: &Frame) -> usize {
        self.waiters.dispatch(frame)
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.get()
    }

    /// Send a command.  With single-flight on, holds the bus until the
    /// same opcode comes back or the implicit timeout passes.
    pub async fn send(&self, payload: Vec<u8>) -> Result<()> {
        let reply = if self.single_flight {
            Reply::Echo
        } else {
            Reply::None
        };
        self.submit(payload, reply).await.map(|_| ())
    }

    /// Send without waiting for any reply.
    pub async fn send_detached(&self, payload: Vec<u8>) -> Result<()> {
        self.submit(payload, Reply::None).await.map(|_| ())
    }

    /// Send and wait for the first frame `predicate` accepts.
    pub async fn request(
        &self,
        payload: Vec<u8>,
        predicate: impl Fn(&Frame) -> bool + 'static,
        timeout: Duration,
    ) -> Result<Frame> {
        let reply = Reply::Waiter {
            predicate: Box::new(predicate),
            timeout,
            cancel: None,
        };
        match self.submit(payload, reply).await? {
            Some(frame) => Ok(frame),
            None => Err(Error::Disconnected),
        }
    }

    /// As [`request`](Self::request); `Ok(None)` once `cancel` fires.
    pub async fn request_cancellable(
        &self,
        payload: Vec<u8>,
        predicate: impl Fn(&Frame) -> bool + 'static,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<Option<Frame>> {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        let reply = Reply::Waiter {
            predicate: Box::new(predicate),
            timeout,
            cancel: Some(cancel.clone()),
        };
        let done = self.enqueue(payload, reply).await?;
        let cancelled = async {
            cancel.cancelled().await;
            Ok(None)
        };
        future::or(done.wait(), cancelled).await
    }

    /// Wait for an unsolicited frame without sending anything.
    pub async fn wait_for(
        &self,
        predicate: impl Fn(&Frame) -> bool + 'static,
        timeout: Duration,
    ) -> Result<Frame> {
        if !self.accepting.get() {
            return Err(Error::Disconnected);
        }
        self.waiters.register(predicate).wait(timeout).await
    }

    async fn submit(&self, payload: Vec<u8>, reply: Reply) -> Result<Option<Frame>> {
        let done = self.enqueue(payload, reply).await?;
        done.wait().await
    }

    async fn enqueue(&self, payload: Vec<u8>, reply: Reply) -> Result<Done> {
        if !codec::payload_fits(payload.len()) {
            warn!("correlator: refusing {}-byte payload", payload.len());
            return Err(Error::InvalidCommand("payload length out of range"));
        }
        if !self.accepting.get() {
            return Err(TransportError::NotConnected.into());
        }
        let done: Done = Rc::new(Signal::new());
        self.queue
            .send(QueuedCommand {
                payload,
                reply,
                done: done.clone(),
            })
            .await;
        if !self.accepting.get() {
            self.drain_queue();
        }
        Ok(done)
    }

    /// The single send worker.  Runs until the future is dropped.
    pub async fn run<O: Outbound>(&self, out: &O) {
        loop {
            let cmd = self.queue.receive().await;
            if !self.accepting.get() {
                cmd.done.signal(Err(Error::Disconnected));
                continue;
            }
            self.in_flight.replace(Some(cmd.done));

            if let Some(end) = self.last_end.get() {
                let ready = end + self.spacing;
                let now = Instant::now();
                if ready > now {
                    Timer::after(ready - now).await;
                }
            }

            let result = self.execute(out, &cmd.payload, cmd.reply).await;
            self.last_end.set(Some(Instant::now()));
            if let Some(done) = self.in_flight.take() {
                done.signal(result);
            }
        }
    }

    async fn execute<O: Outbound>(
        &self,
        out: &O,
        payload: &[u8],
        reply: Reply,
    ) -> Result<Option<Frame>> {
        let opcode = payload.first().copied().unwrap_or_default();
        match reply {
            Reply::None => out.send_payload(payload).await.map(|()| None),
            Reply::Echo => {
                let waiter = self.waiters.register(expect::opcode(opcode));
                out.send_payload(payload).await?;
                match waiter.wait(self.implicit_timeout).await {
                    Ok(frame) => Ok(Some(frame)),
                    Err(Error::Timeout { waited_ms }) => {
                        debug!(
                            "correlator: no {:#04x} echo within {}ms, continuing",
                            opcode, waited_ms
                        );
                        Ok(None)
                    }
                    Err(e) => Err(e),
                }
            }
            Reply::Waiter {
                predicate,
                timeout,
                cancel,
            } => {
                if cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                    return Ok(None);
                }
                let waiter = self.waiters.register_boxed(predicate);
                out.send_payload(payload).await?;
                match cancel {
                    Some(token) => waiter.wait_cancellable(timeout, &token).await,
                    None => waiter.wait(timeout).await.map(Some),
                }
            }
        }
    }

    /// Stop accepting work and fail everything outstanding: waiters are
    /// rejected, the in-flight and queued commands fail with
    /// [`Error::Disconnected`].
    pub fn close(&self) {
        self.accepting.set(false);
        let rejected = self.waiters.cancel_all();
        if let Some(done) = self.in_flight.take() {
            done.signal(Err(Error::Disconnected));
        }
        let dropped = self.drain_queue();
        if rejected + dropped > 0 {
            warn!(
                "correlator: closed with {} waiter(s) and {} queued command(s) pending",
                rejected, dropped
            );
        }
    }

    fn drain_queue(&self) -> usize {
        let mut dropped = 0;
        while let Ok(cmd) = self.queue.try_receive() {
            cmd.done.signal(Err(Error::Disconnected));
            dropped += 1;
        }
        dropped
    }
}

//! Mock radio link for integration tests.
//!
//! Records every write attempt so tests can assert on the full command
//! history, and can answer each decoded payload through a responder
//! closure without any real radio.

#![allow(dead_code)]

use core::cell::{Cell, RefCell};
use core::time::Duration;
use std::rc::Rc;
use std::time::Instant;

use brickwire::protocol::{decode, encode};
use brickwire::transport::{Candidate, CharProps, Characteristic, Link, LinkEvent, Transport};
use brickwire::{Device, EngineConfig};
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::channel::Channel;

pub const VENDOR_SERVICE: u128 = 0x49535343_fe7d_4ae5_8fa9_9fafd205e455;
pub const NOTIFY_UUID: u128 = 0x49535343_1e4d_4bd9_ba61_23c647249616;
pub const WRITE_UUID: u128 = 0x49535343_8841_43f4_a8d4_ecbe34729bb3;
pub const FALLBACK_UUID: u128 = 0x0000ffe1_0000_1000_8000_00805f9b34fb;
const OTHER_SERVICE: u128 = 0x0000ffe0_0000_1000_8000_00805f9b34fb;

/// Reply payloads for one decoded outgoing payload.
pub type Responder = Box<dyn Fn(&[u8]) -> Vec<Vec<u8>>>;

#[derive(Debug, Clone)]
pub struct WriteRecord {
    pub uuid: u128,
    pub frame: Vec<u8>,
    pub accepted: bool,
    pub at: Instant,
}

impl WriteRecord {
    pub fn payload(&self) -> Vec<u8> {
        decode(&self.frame).map(|f| f.payload).unwrap_or_default()
    }
}

#[derive(Debug)]
pub struct MockError;

pub struct MockState {
    characteristics: Vec<Characteristic>,
    inbound: Channel<NoopRawMutex, LinkEvent, 64>,
    writes: RefCell<Vec<WriteRecord>>,
    failing: RefCell<Vec<u128>>,
    subscribed: RefCell<Vec<u128>>,
    responder: RefCell<Option<Responder>>,
    closed: Cell<bool>,
}

/// Shared handle the test keeps after the link is moved into a device.
#[derive(Clone)]
pub struct MockHandle {
    state: Rc<MockState>,
}

impl MockHandle {
    /// Push raw notification bytes.
    pub fn notify(&self, bytes: &[u8]) {
        let event = LinkEvent::Notification {
            uuid: NOTIFY_UUID,
            data: bytes.to_vec(),
        };
        if self.state.inbound.try_send(event).is_err() {
            panic!("mock inbound queue full");
        }
    }

    /// Frame `payload` and push it as a notification.
    pub fn reply(&self, payload: &[u8]) {
        self.notify(&encode(payload));
    }

    /// Simulate the radio dropping the link.
    pub fn drop_link(&self) {
        self.state.closed.set(true);
        let _ = self.state.inbound.try_send(LinkEvent::Disconnected);
    }

    pub fn fail_writes_to(&self, uuid: u128) {
        self.state.failing.borrow_mut().push(uuid);
    }

    pub fn fail_all_writes(&self) {
        self.fail_writes_to(WRITE_UUID);
        self.fail_writes_to(FALLBACK_UUID);
    }

    pub fn set_responder(&self, responder: impl Fn(&[u8]) -> Vec<Vec<u8>> + 'static) {
        *self.state.responder.borrow_mut() = Some(Box::new(responder));
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.state.writes.borrow().clone()
    }

    /// Payloads of accepted writes, in order.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.state
            .writes
            .borrow()
            .iter()
            .filter(|w| w.accepted)
            .map(WriteRecord::payload)
            .collect()
    }

    /// Opcodes of accepted writes, in order.
    pub fn sent_opcodes(&self) -> Vec<u8> {
        self.sent().iter().map(|p| p[0]).collect()
    }

    pub fn subscribed(&self) -> Vec<u128> {
        self.state.subscribed.borrow().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.get()
    }
}

pub struct MockLink {
    state: Rc<MockState>,
}

impl Link for MockLink {
    type Error = MockError;

    fn characteristics(&self) -> Vec<Characteristic> {
        self.state.characteristics.clone()
    }

    async fn subscribe(&self, uuid: u128) -> Result<(), MockError> {
        self.state.subscribed.borrow_mut().push(uuid);
        Ok(())
    }

    async fn unsubscribe(&self, uuid: u128) -> Result<(), MockError> {
        self.state.subscribed.borrow_mut().retain(|u| *u != uuid);
        Ok(())
    }

    async fn write(&self, uuid: u128, data: &[u8]) -> Result<(), MockError> {
        let accepted = !self.state.closed.get() && !self.state.failing.borrow().contains(&uuid);
        self.state.writes.borrow_mut().push(WriteRecord {
            uuid,
            frame: data.to_vec(),
            accepted,
            at: Instant::now(),
        });
        if !accepted {
            return Err(MockError);
        }

        let replies = match (&*self.state.responder.borrow(), decode(data)) {
            (Some(responder), Ok(frame)) => responder(&frame.payload),
            _ => Vec::new(),
        };
        for reply in replies {
            let _ = self.state.inbound.try_send(LinkEvent::Notification {
                uuid: NOTIFY_UUID,
                data: encode(&reply),
            });
        }
        Ok(())
    }

    async fn recv(&self) -> LinkEvent {
        if self.state.closed.get() {
            return LinkEvent::Disconnected;
        }
        self.state.inbound.receive().await
    }

    async fn close(&self) {
        self.state.closed.set(true);
        let _ = self.state.inbound.try_send(LinkEvent::Disconnected);
    }
}

pub struct MockTransport {
    state: Rc<MockState>,
    names: Vec<&'static str>,
}

impl MockTransport {
    /// A brick exposing the vendor notify/write pair plus a generic
    /// fallback write characteristic.
    pub fn new() -> (Self, MockHandle) {
        let characteristics = vec![
            Characteristic {
                service: VENDOR_SERVICE,
                uuid: NOTIFY_UUID,
                props: CharProps {
                    notify: true,
                    ..CharProps::default()
                },
            },
            Characteristic {
                service: VENDOR_SERVICE,
                uuid: WRITE_UUID,
                props: CharProps {
                    write: true,
                    ..CharProps::default()
                },
            },
            Characteristic {
                service: OTHER_SERVICE,
                uuid: FALLBACK_UUID,
                props: CharProps {
                    write_without_response: true,
                    notify: true,
                    ..CharProps::default()
                },
            },
        ];
        let state = Rc::new(MockState {
            characteristics,
            inbound: Channel::new(),
            writes: RefCell::new(Vec::new()),
            failing: RefCell::new(Vec::new()),
            subscribed: RefCell::new(Vec::new()),
            responder: RefCell::new(None),
            closed: Cell::new(false),
        });
        let handle = MockHandle {
            state: state.clone(),
        };
        (
            Self {
                state,
                names: vec!["JIMU-8A2F", "Meccano MAX", "jimu_spare"],
            },
            handle,
        )
    }
}

impl Transport for MockTransport {
    type Link = MockLink;
    type Error = MockError;

    async fn discover(
        &self,
        _name: &str,
        _timeout: Duration,
    ) -> Result<Vec<Candidate>, MockError> {
        Ok(self
            .names
            .iter()
            .enumerate()
            .map(|(i, name)| Candidate {
                id: format!("00:11:22:33:44:{i:02x}"),
                name: (*name).to_string(),
                rssi: Some(-60),
            })
            .collect())
    }

    async fn open(&self, _candidate: &Candidate) -> Result<MockLink, MockError> {
        self.state.closed.set(false);
        Ok(MockLink {
            state: self.state.clone(),
        })
    }
}

pub fn candidate() -> Candidate {
    Candidate {
        id: "00:11:22:33:44:00".into(),
        name: "JIMU-8A2F".into(),
        rssi: Some(-60),
    }
}

/// No boot, no maintenance timers, short single-flight wait.
pub fn quiet_config() -> EngineConfig {
    EngineConfig {
        boot_on_connect: false,
        implicit_timeout_ms: 150,
        keepalive_interval_ms: 0,
        battery_interval_ms: 0,
        ..EngineConfig::default()
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Connect a device to a fresh mock.
pub fn connect(config: EngineConfig) -> (Device<MockLink>, MockHandle) {
    init_logging();
    let (transport, handle) = MockTransport::new();
    let device = futures_lite::future::block_on(Device::connect(&transport, &candidate(), config))
        .expect("mock connect");
    (device, handle)
}

/// A status payload with the given presence bitmaps.
pub fn status_payload(
    servo_mask: u32,
    ir: u8,
    eyes: u8,
    ultrasonic: u8,
    speakers: u8,
    motors: u8,
) -> Vec<u8> {
    let mut p = vec![0u8; 121];
    p[0] = 0x08;
    p[1..9].copy_from_slice(b"Jimu2.31");
    p[12..16].copy_from_slice(&servo_mask.to_be_bytes());
    p[29] = ir;
    p[50] = eyes;
    p[64] = ultrasonic;
    p[78] = speakers;
    p[120] = motors;
    p
}

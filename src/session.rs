//! Connection session: one open link to one brick.
//!
//! Owns the link handle, the selected notify/write characteristics and the
//! stream reassembler.  Outgoing payloads are framed here and written to the
//! first write characteristic that accepts them; incoming notification
//! chunks are fed through the reassembler.
//!
//! ```text
//!            ┌───────────────────────────────────────────┐
//!  payload ─▶│ encode ─▶ write[0] ─✗─▶ write[1] ─✗─▶ ... │─▶ Link
//!            │                                           │
//!  frames ◀──│ reassembler ◀── notify[*] chunks          │◀─ Link
//!            └───────────────────────────────────────────┘
//! ```

use core::cell::{Cell, RefCell};
use core::time::Duration;
use std::rc::Rc;

use log::{debug, info, warn};

use crate::config::EngineConfig;
use crate::correlator::Outbound;
use crate::error::{Error, Result, TransportError};
use crate::protocol::{StreamEvent, StreamReassembler, codec, encode};
use crate::transport::{
    Candidate, Characteristic, Link, LinkEvent, Transport, format_uuid, uuid_has_prefix,
};

/// Characteristics chosen for one link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelPlan {
    pub notify: Vec<u128>,
    /// Write channels, most preferred first.
    pub write: Vec<u128>,
}

/// Pick notify and write characteristics.
///
/// All notify-capable characteristics are used, narrowed to the vendor
/// service when any of them belongs to it.  Write characteristics follow the
/// preference list, then the remaining writable ones in discovery order.
pub fn select_channels(
    chars: &[Characteristic],
    vendor_prefix: Option<&str>,
    preferred_writes: &[u128],
) -> Result<ChannelPlan> {
    let notifiers: Vec<&Characteristic> = chars.iter().filter(|c| c.props.notifies()).collect();
    let vendor: Vec<&Characteristic> = match vendor_prefix {
        Some(prefix) => notifiers
            .iter()
            .copied()
            .filter(|c| uuid_has_prefix(c.service, prefix))
            .collect(),
        None => Vec::new(),
    };
    let notify: Vec<u128> = if vendor.is_empty() { notifiers } else { vendor }
        .iter()
        .map(|c| c.uuid)
        .collect();
    if notify.is_empty() {
        return Err(TransportError::NoNotifyChannel.into());
    }

    let writable: Vec<u128> = chars
        .iter()
        .filter(|c| c.props.writable())
        .map(|c| c.uuid)
        .collect();
    let mut write: Vec<u128> = preferred_writes
        .iter()
        .copied()
        .filter(|u| writable.contains(u))
        .collect();
    for uuid in writable {
        if !write.contains(&uuid) {
            write.push(uuid);
        }
    }
    if write.is_empty() {
        return Err(TransportError::NoWriteChannel.into());
    }

    Ok(ChannelPlan { notify, write })
}

/// Case-insensitive substring match on the advertised name.
pub fn name_matches(candidate: &Candidate, filter: &str) -> bool {
    candidate
        .name
        .to_ascii_lowercase()
        .contains(&filter.to_ascii_lowercase())
}

/// Scan for bricks whose advertised name contains `name_filter`.
pub async fn discover<T: Transport>(
    transport: &T,
    name_filter: &str,
    timeout: Duration,
) -> Result<Vec<Candidate>> {
    let found = transport.discover(name_filter, timeout).await.map_err(|e| {
        warn!("session: scan failed: {:?}", e);
        TransportError::ScanFailed
    })?;
    let matching: Vec<Candidate> = found
        .into_iter()
        .filter(|c| name_matches(c, name_filter))
        .collect();
    info!(
        "session: scan for '{}' found {} device(s)",
        name_filter,
        matching.len()
    );
    Ok(matching)
}

/// One open link with its channel plan and reassembly buffer.
pub struct Session<L: Link> {
    link: RefCell<Option<Rc<L>>>,
    plan: ChannelPlan,
    reassembler: RefCell<StreamReassembler>,
    connected: Cell<bool>,
    device_name: String,
}

impl<L: Link> Session<L> {
    /// Connect to `candidate`, select channels and subscribe.
    pub async fn open<T>(transport: &T, candidate: &Candidate, config: &EngineConfig) -> Result<Self>
    where
        T: Transport<Link = L>,
    {
        let link = transport.open(candidate).await.map_err(|e| {
            warn!("session: open '{}' failed: {:?}", candidate.name, e);
            TransportError::OpenFailed
        })?;

        let plan = match select_channels(
            &link.characteristics(),
            config.vendor_service_prefix.as_deref(),
            &config.preferred_write_channels(),
        ) {
            Ok(plan) => plan,
            Err(e) => {
                warn!("session: '{}' unusable: {}", candidate.name, e);
                link.close().await;
                return Err(e);
            }
        };

        let mut subscribed = Vec::with_capacity(plan.notify.len());
        for &uuid in &plan.notify {
            match link.subscribe(uuid).await {
                Ok(()) => subscribed.push(uuid),
                Err(e) => warn!("session: subscribe {} failed: {:?}", format_uuid(uuid), e),
            }
        }
        if subscribed.is_empty() {
            link.close().await;
            return Err(TransportError::NoNotifyChannel.into());
        }

        info!(
            "session: connected to '{}' ({} notify, {} write channels)",
            candidate.name,
            subscribed.len(),
            plan.write.len()
        );

        Ok(Self {
            link: RefCell::new(Some(Rc::new(link))),
            plan: ChannelPlan {
                notify: subscribed,
                write: plan.write,
            },
            reassembler: RefCell::new(StreamReassembler::new()),
            connected: Cell::new(true),
            device_name: candidate.name.clone(),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.get()
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn channels(&self) -> &ChannelPlan {
        &self.plan
    }

    fn link(&self) -> Option<Rc<L>> {
        self.link.borrow().clone()
    }

    /// Frame `payload` and write it to the first channel that accepts it.
    pub async fn send(&self, payload: &[u8]) -> Result<()> {
        if !codec::payload_fits(payload.len()) {
            return Err(Error::InvalidCommand("payload length out of range"));
        }
        let Some(link) = self.link() else {
            return Err(TransportError::NotConnected.into());
        };
        let frame = encode(payload);
        for &uuid in &self.plan.write {
            match link.write(uuid, &frame).await {
                Ok(()) => {
                    debug!("session: wrote {:02X?} via {}", payload, format_uuid(uuid));
                    return Ok(());
                }
                Err(e) => warn!("session: write via {} failed: {:?}", format_uuid(uuid), e),
            }
        }
        Err(TransportError::WriteFailed.into())
    }

    /// Wait for the next notification chunk or disconnect.
    pub async fn recv(&self) -> LinkEvent {
        match self.link() {
            Some(link) => link.recv().await,
            None => LinkEvent::Disconnected,
        }
    }

    /// Feed a notification chunk through the reassembler.
    pub fn ingest(&self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.reassembler.borrow_mut().feed(chunk)
    }

    /// Bytes buffered towards an incomplete frame.
    pub fn buffered(&self) -> usize {
        self.reassembler.borrow().buffered()
    }

    /// Unsubscribe, close and release the link.  Idempotent.
    pub async fn disconnect(&self) {
        let Some(link) = self.link() else {
            return;
        };
        for &uuid in &self.plan.notify {
            if let Err(e) = link.unsubscribe(uuid).await {
                debug!("session: unsubscribe {} failed: {:?}", format_uuid(uuid), e);
            }
        }
        link.close().await;
        self.release();
    }

    /// Drop the link handle and buffered bytes after the link is gone.
    /// Returns whether the session was connected.
    pub fn release(&self) -> bool {
        self.link.borrow_mut().take();
        self.reassembler.borrow_mut().reset();
        let was = self.connected.replace(false);
        if was {
            info!("session: '{}' released", self.device_name);
        }
        was
    }
}

impl<L: Link> Outbound for Session<L> {
    async fn send_payload(&self, payload: &[u8]) -> Result<()> {
        self.send(payload).await
    }
}

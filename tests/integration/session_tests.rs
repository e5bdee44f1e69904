//! Discovery, channel selection, write fallback and teardown.

use core::time::Duration;

use async_io_mini::Timer;
use brickwire::protocol::commands;
use brickwire::runtime::run_until;
use brickwire::{DeviceEvent, Error, TransportError, discover};
use futures_lite::future::block_on;

use crate::mock_link::{
    FALLBACK_UUID, MockTransport, NOTIFY_UUID, WRITE_UUID, connect, init_logging, quiet_config,
};

#[test]
fn discover_filters_names_case_insensitively() {
    init_logging();
    let (transport, _handle) = MockTransport::new();
    let found = block_on(discover(&transport, "JIMU", Duration::from_millis(100))).unwrap();
    let names: Vec<&str> = found.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["JIMU-8A2F", "jimu_spare"]);
}

#[test]
fn subscribes_to_vendor_notify_only() {
    let (device, handle) = connect(quiet_config());
    assert_eq!(handle.subscribed(), vec![NOTIFY_UUID]);
    assert_eq!(device.session().channels().write, vec![WRITE_UUID, FALLBACK_UUID]);
    assert!(device.is_connected());
}

#[test]
fn write_falls_back_to_next_channel() {
    let (device, handle) = connect(quiet_config());
    handle.fail_writes_to(WRITE_UUID);

    run_until(&device, async {
        device.send_detached(commands::ping()).await.unwrap();
    });

    let writes = handle.writes();
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[0].uuid, WRITE_UUID);
    assert!(!writes[0].accepted);
    assert_eq!(writes[1].uuid, FALLBACK_UUID);
    assert!(writes[1].accepted);
    assert_eq!(handle.sent(), vec![commands::ping()]);
}

#[test]
fn all_channels_failing_surfaces_transport_error() {
    let (device, handle) = connect(quiet_config());
    handle.fail_all_writes();
    let events = device.subscribe();

    let result = run_until(&device, async {
        device.send_detached(commands::ping()).await
    });

    assert_eq!(result, Err(Error::Transport(TransportError::WriteFailed)));
    assert!(device.is_connected(), "write failure must not imply disconnect");
    assert!(
        events
            .drain()
            .contains(&DeviceEvent::TransportError(TransportError::WriteFailed))
    );
}

#[test]
fn disconnect_is_idempotent() {
    let (device, handle) = connect(quiet_config());
    let events = device.subscribe();

    run_until(&device, async {
        device.disconnect().await;
        device.disconnect().await;
    });

    assert!(!device.is_connected());
    assert!(handle.is_closed());
    assert!(handle.subscribed().is_empty());
    let disconnects = events
        .drain()
        .into_iter()
        .filter(|e| *e == DeviceEvent::Disconnected)
        .count();
    assert_eq!(disconnects, 1);

    let after = block_on(device.send(commands::ping()));
    assert_eq!(after, Err(Error::Transport(TransportError::NotConnected)));
}

#[test]
fn corrupt_bytes_are_reported_and_skipped() {
    let (device, handle) = connect(quiet_config());
    let events = device.subscribe();

    run_until(&device, async {
        // Valid layout, wrong checksum.
        handle.notify(&[0xFB, 0xBF, 0x06, 0x03, 0x00, 0x00, 0xED]);
        handle.reply(&[0x03, 0x00]);
        Timer::after(Duration::from_millis(30)).await;
    });

    let seen = events.drain();
    assert!(seen.iter().any(|e| matches!(e, DeviceEvent::FrameDropped(_))));
    assert!(seen.contains(&DeviceEvent::PingEcho));
}

#[test]
fn frame_split_across_notifications() {
    let (device, handle) = connect(quiet_config());
    let events = device.subscribe();
    let frame = brickwire::protocol::encode(&[0x27, 0x00, 0x00, 0x09, 0xC4]);

    run_until(&device, async {
        handle.notify(&frame[..2]);
        Timer::after(Duration::from_millis(5)).await;
        handle.notify(&frame[2..6]);
        Timer::after(Duration::from_millis(5)).await;
        handle.notify(&frame[6..]);
        Timer::after(Duration::from_millis(20)).await;
    });

    let battery = device.state().last_battery;
    assert!(battery.is_some_and(|b| !b.charging && (b.volts - 1.0).abs() < 1e-6));
    let frames = events
        .drain()
        .into_iter()
        .filter(|e| matches!(e, DeviceEvent::FrameReceived(_)))
        .count();
    assert_eq!(frames, 1);
}

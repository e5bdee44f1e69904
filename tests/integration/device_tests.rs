//! State engine, boot, maintenance, reads and emergency stop against the
//! mock link.

use core::time::Duration;

use async_io_mini::Timer;
use brickwire::protocol::commands::{self, Rgb};
use brickwire::protocol::opcodes::ModuleKind;
use brickwire::protocol::Frame;
use brickwire::protocol::parse::{SensorKind, StatusMap, status_map};
use brickwire::runtime::run_until;
use brickwire::{CancelToken, DeviceEvent, EngineConfig, EventStream};
use futures_lite::future;

use crate::mock_link::{connect, quiet_config, status_payload};

/// Wait for the first event `pred` accepts, or give up after `limit`.
async fn wait_event(
    events: &EventStream,
    limit: Duration,
    pred: impl Fn(&DeviceEvent) -> bool,
) -> Option<DeviceEvent> {
    let found = async {
        loop {
            let event = events.next().await;
            if pred(&event) {
                return Some(event);
            }
        }
    };
    let give_up = async {
        Timer::after(limit).await;
        None
    };
    future::or(found, give_up).await
}

fn brick_responder(payload: &[u8]) -> Vec<Vec<u8>> {
    match payload[0] {
        0x01 => vec![vec![0x01, 0x00]],
        0x36 => {
            let mut info = vec![0x36];
            info.extend_from_slice(b"Jimu_p1.79");
            vec![info]
        }
        0x08 => vec![status_payload(0b101, 0b101, 0b1, 0, 0, 0b1)],
        0x71 => vec![vec![0x71, 0x00, payload[1]]],
        0x27 => vec![vec![0x27, 0x01, 0x00, 0x09, 0xC4]],
        _ => Vec::new(),
    }
}

#[test]
fn status_notification_updates_state() {
    let (device, handle) = connect(quiet_config());
    let events = device.subscribe();

    let status = run_until(&device, async {
        handle.reply(&status_payload(0, 0b101, 0, 0, 0, 0));
        wait_event(&events, Duration::from_millis(200), |e| {
            matches!(e, DeviceEvent::StatusUpdated(_))
        })
        .await
    });

    let Some(DeviceEvent::StatusUpdated(status)) = status else {
        panic!("no status event");
    };
    assert_eq!(status.ir().as_slice(), &[1, 3]);
    assert_eq!(status.firmware, "Jimu2.31");
    assert_eq!(device.state().last_status, Some(status));
}

#[test]
fn frame_received_precedes_typed_event() {
    let (device, handle) = connect(quiet_config());
    let events = device.subscribe();

    run_until(&device, async {
        handle.reply(&[0x27, 0x01, 0x00, 0x09, 0xC4]);
        Timer::after(Duration::from_millis(20)).await;
    });

    let seen: Vec<DeviceEvent> = events
        .drain()
        .into_iter()
        .filter(|e| !matches!(e, DeviceEvent::Connected))
        .collect();
    assert!(matches!(seen[0], DeviceEvent::FrameReceived(Frame { opcode: 0x27, .. })));
    let DeviceEvent::BatteryUpdated(battery) = seen[1] else {
        panic!("expected battery, got {:?}", seen[1]);
    };
    assert!(battery.charging);
    assert!((battery.volts - 1.0).abs() < 1e-6);
}

#[test]
fn boot_runs_in_order_and_enables_present_modules() {
    let (device, handle) = connect(EngineConfig {
        boot_on_connect: true,
        priming_settle_ms: 10,
        module_settle_ms: 10,
        ..quiet_config()
    });
    handle.set_responder(brick_responder);
    let events = device.subscribe();

    let booted = run_until(&device, async {
        wait_event(&events, Duration::from_secs(3), |e| {
            *e == DeviceEvent::BootCompleted
        })
        .await
    });

    assert_eq!(booted, Some(DeviceEvent::BootCompleted));
    assert_eq!(handle.sent_opcodes(), vec![0x01, 0x36, 0x08, 0x71, 0x71, 0x27]);
    let sent = handle.sent();
    assert_eq!(sent[3], commands::enable_modules(ModuleKind::Infrared, 0b101));
    assert_eq!(sent[4], commands::enable_modules(ModuleKind::Eye, 0b1));

    let state = device.state();
    assert_eq!(state.brick_info.as_deref(), Some("Jimu_p1.79"));
    assert!(state.last_battery.is_some_and(|b| b.charging));
    assert!(state.connected);
}

#[test]
fn boot_survives_a_silent_brick() {
    let (device, handle) = connect(EngineConfig {
        boot_on_connect: true,
        implicit_timeout_ms: 30,
        request_timeout_ms: 30,
        status_timeout_ms: 30,
        battery_timeout_ms: 30,
        priming_settle_ms: 5,
        ..quiet_config()
    });
    let events = device.subscribe();

    let booted = run_until(&device, async {
        wait_event(&events, Duration::from_secs(2), |e| {
            *e == DeviceEvent::BootCompleted
        })
        .await
    });

    assert_eq!(booted, Some(DeviceEvent::BootCompleted));
    // No status map, so nothing to enable.
    assert_eq!(handle.sent_opcodes(), vec![0x01, 0x36, 0x08, 0x27]);
    assert_eq!(device.pending_waiters(), 0);
}

#[test]
fn maintenance_pings_and_refreshes_battery() {
    let (device, handle) = connect(EngineConfig {
        keepalive_interval_ms: 40,
        battery_interval_ms: 100,
        ..quiet_config()
    });

    run_until(&device, async {
        Timer::after(Duration::from_millis(230)).await;
    });

    let ops = handle.sent_opcodes();
    let pings = ops.iter().filter(|&&op| op == 0x03).count();
    let batteries = ops.iter().filter(|&&op| op == 0x27).count();
    assert!((4..=5).contains(&pings), "{ops:02x?}");
    assert!((1..=2).contains(&batteries), "{ops:02x?}");
}

#[test]
fn maintenance_stops_after_disconnect() {
    let (device, handle) = connect(EngineConfig {
        keepalive_interval_ms: 20,
        battery_interval_ms: 0,
        ..quiet_config()
    });

    run_until(&device, async {
        Timer::after(Duration::from_millis(50)).await;
        handle.drop_link();
        Timer::after(Duration::from_millis(80)).await;
    });

    let attempts_after_drop = handle
        .writes()
        .iter()
        .filter(|w| !w.accepted)
        .count();
    assert_eq!(attempts_after_drop, 0);
}

#[test]
fn emergency_stop_with_failing_writes_attempts_every_id() {
    let (device, handle) = connect(EngineConfig {
        stop_settle_ms: 5,
        command_spacing_ms: 5,
        ..quiet_config()
    });
    handle.fail_all_writes();
    let status = StatusMap {
        servo_mask: 0b101,
        eye_mask: 0b11,
        ultrasonic_mask: 0b10,
        motor_mask: 0b11,
        ..StatusMap::default()
    };

    let report = run_until(&device, device.emergency_stop_with(&status));

    // Two motors, two servos, broadcast read, one eye command, one LED.
    assert_eq!(report.attempted, 7);
    assert_eq!(report.failed.len(), 7);

    let attempted: Vec<Vec<u8>> = handle.writes().iter().map(|w| w.payload()).collect();
    for id in [1u8, 2] {
        assert!(attempted.contains(&commands::stop_motor(id).unwrap()));
    }
    for id in [1u8, 3] {
        assert!(attempted.iter().any(|p| p[0] == 0x07 && p[2] == id));
    }
    assert!(attempted.contains(&commands::read_servo_position(0)));
    assert!(attempted.contains(&commands::eye_off(0b11).unwrap()));
    assert!(attempted.contains(&commands::ultrasonic_led(2, Rgb::OFF).unwrap()));
}

#[test]
fn emergency_stop_uses_cached_status() {
    let (device, handle) = connect(EngineConfig {
        stop_settle_ms: 5,
        command_spacing_ms: 5,
        ..quiet_config()
    });

    let report = run_until(&device, async {
        handle.reply(&status_payload(0b101, 0, 0b11, 0b10, 0, 0b11));
        Timer::after(Duration::from_millis(20)).await;
        device.emergency_stop().await
    });

    assert!(report.is_clean());
    assert_eq!(
        handle.sent_opcodes(),
        vec![0x90, 0x90, 0x07, 0x07, 0x0B, 0x79, 0x79]
    );
}

#[test]
fn read_sensors_splits_one_id_per_type() {
    let (device, handle) = connect(quiet_config());
    handle.set_responder(|payload| {
        if payload[0] != 0x7E {
            return Vec::new();
        }
        let n = payload[3] as usize;
        let mut reply = vec![0x7E, 0x01, 0x00, n as u8];
        for rec in payload[4..4 + n * 3].chunks(3) {
            reply.extend_from_slice(&[rec[0], 0x00, rec[2], 0x00, rec[2] * 10]);
        }
        vec![reply]
    });

    let readings = run_until(&device, async {
        device
            .read_sensors(&[
                (SensorKind::Infrared, 1),
                (SensorKind::Infrared, 2),
                (SensorKind::Ultrasonic, 1),
            ])
            .await
    })
    .unwrap();

    let sensor_frames: Vec<Vec<u8>> = handle
        .sent()
        .into_iter()
        .filter(|p| p[0] == 0x7E)
        .collect();
    assert_eq!(sensor_frames.len(), 2);
    assert_eq!(sensor_frames[0][3], 2);
    assert_eq!(sensor_frames[1][3], 1);
    assert_eq!(readings.len(), 3);
    assert!(readings.iter().any(|r| r.kind == SensorKind::Infrared && r.id == 2 && r.value == 20));
}

#[test]
fn read_servo_position_matches_requested_id() {
    let (device, handle) = connect(quiet_config());
    handle.set_responder(|payload| match payload {
        [0x0B, id] => vec![vec![0x0B, id + 1, 0x00, 100], vec![0x0B, *id, 0x00, 150]],
        _ => Vec::new(),
    });

    let feedback = run_until(&device, device.read_servo_position(4)).unwrap();
    assert_eq!(feedback.id, 4);
    assert_eq!(feedback.degrees, 30);
}

#[test]
fn read_all_servo_positions_collects_broadcast_replies() {
    let (device, handle) = connect(EngineConfig {
        broadcast_collect_ms: 40,
        ..quiet_config()
    });
    handle.set_responder(|payload| match payload {
        [0x0B, 0] => vec![
            vec![0x0B, 1, 130],
            vec![0x0B, 2, 110],
            vec![0x0B, 1, 135],
        ],
        _ => Vec::new(),
    });
    let cancel = CancelToken::new();

    let positions = run_until(&device, device.read_all_servo_positions(&cancel))
        .unwrap()
        .unwrap();

    let summary: Vec<(u8, i16)> = positions.iter().map(|p| (p.id, p.degrees)).collect();
    assert_eq!(summary, vec![(1, 15), (2, -10)]);
}

#[test]
fn broadcast_read_keeps_every_responder() {
    let (device, handle) = connect(EngineConfig {
        broadcast_collect_ms: 60,
        ..quiet_config()
    });
    handle.set_responder(|payload| match payload {
        [0x0B, 0] => (1..=20u8).map(|id| vec![0x0B, id, 120 + id]).collect(),
        _ => Vec::new(),
    });
    // A subscriber that never reads fills up long before the last reply.
    let idle = device.subscribe();
    let cancel = CancelToken::new();

    let positions = run_until(&device, device.read_all_servo_positions(&cancel))
        .unwrap()
        .unwrap();

    let ids: Vec<u8> = positions.iter().map(|p| p.id).collect();
    assert_eq!(ids, (1..=20).collect::<Vec<u8>>());
    assert!(positions.iter().all(|p| p.degrees == i16::from(p.id)));
    assert_eq!(device.pending_waiters(), 0);
    drop(idle);
}

#[test]
fn rejected_enable_emits_device_error() {
    let (device, handle) = connect(quiet_config());
    handle.set_responder(|payload| match payload {
        [0x71, kind, _] => vec![vec![0x71, 0x01, *kind]],
        _ => Vec::new(),
    });
    let events = device.subscribe();

    let result = run_until(&device, device.enable_modules(ModuleKind::Ultrasonic, 0b1)).unwrap();

    assert!(!result.ok);
    assert!(
        events
            .drain()
            .iter()
            .any(|e| matches!(e, DeviceEvent::DeviceError(r) if r.opcode == 0x71))
    );
}

#[test]
fn link_loss_resets_state() {
    let (device, handle) = connect(quiet_config());
    let events = device.subscribe();

    run_until(&device, async {
        handle.reply(&status_payload(0b1, 0, 0, 0, 0, 0));
        Timer::after(Duration::from_millis(20)).await;
        assert!(device.state().last_status.is_some());
        handle.drop_link();
        Timer::after(Duration::from_millis(20)).await;
    });

    let state = device.state();
    assert!(!state.connected);
    assert!(state.last_status.is_none());
    assert_eq!(events.drain().pop(), Some(DeviceEvent::Disconnected));
}

#[test]
fn status_payload_helper_matches_parser() {
    let payload = status_payload(0x0000_0103, 0, 0, 0, 0, 0);
    let status = status_map(&Frame {
        opcode: 0x08,
        payload,
    })
    .unwrap();
    assert_eq!(status.servos().as_slice(), &[1, 2, 9]);
}

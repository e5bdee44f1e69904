//! Outbound command encodings.
//!
//! Each builder returns the payload (opcode + params) for one frame; the
//! session wraps it with [`encode`](super::codec::encode).  Builders that take
//! caller-supplied IDs validate them and return
//! [`Error::InvalidCommand`] instead of emitting a frame the brick would
//! misinterpret.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::opcodes::{self, ModuleKind};
use super::parse::{SensorKind, degrees_to_raw, mask32_from_ids, servo_mask_to_bytes};
use crate::error::{Error, Result};

/// Highest servo ID addressable by the 32-bit mask.
pub const MAX_SERVO_ID: u8 = 32;
/// Highest ID addressable by an 8-slot module bitmap.
pub const MAX_MODULE_ID: u8 = 8;
/// Servos per continuous-rotation frame.
pub const MAX_ROTATE_IDS: usize = 6;
/// Motor run time is sent in 100ms ticks and capped at 6s.
pub const MAX_MOTOR_TICKS: u8 = 60;
/// Eye LED time byte meaning "hold until replaced".
pub const HOLD: u8 = 0xFF;

const REQUEST: u8 = 0x00;
const SENSOR_READ: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const OFF: Self = Self::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum RotateDirection {
    Clockwise = 0x01,
    CounterClockwise = 0x02,
}

/// One of the eight eye LED segments, clockwise from the top.  Segment `n`
/// is bit `n` of the segment mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Compass {
    North = 0,
    NorthEast = 1,
    East = 2,
    SouthEast = 3,
    South = 4,
    SouthWest = 5,
    West = 6,
    NorthWest = 7,
}

impl Compass {
    pub const fn bit(self) -> u8 {
        1 << self as u8
    }

    /// Segment mask covering `segments`.
    pub fn mask(segments: &[Compass]) -> u8 {
        segments.iter().fold(0, |m, s| m | s.bit())
    }
}

/// Every eye segment.
pub const ALL_SEGMENTS: u8 = 0xFF;

fn check_module_id(id: u8) -> Result<()> {
    if (1..=MAX_MODULE_ID).contains(&id) {
        Ok(())
    } else {
        Err(Error::InvalidCommand("module ID must be 1..=8"))
    }
}

fn check_servo_id(id: u8) -> Result<()> {
    if (1..=MAX_SERVO_ID).contains(&id) {
        Ok(())
    } else {
        Err(Error::InvalidCommand("servo ID must be 1..=32"))
    }
}

// ── Simple requests ────────────────────────────────────────────

pub fn probe() -> Vec<u8> {
    vec![opcodes::PROBE, REQUEST]
}

pub fn ping() -> Vec<u8> {
    vec![opcodes::PING, REQUEST]
}

pub fn status_request() -> Vec<u8> {
    vec![opcodes::STATUS, REQUEST]
}

pub fn battery_request() -> Vec<u8> {
    vec![opcodes::BATTERY, REQUEST]
}

pub fn brick_info_request() -> Vec<u8> {
    vec![opcodes::BRICK_INFO, REQUEST]
}

pub fn error_report_request() -> Vec<u8> {
    vec![opcodes::ERROR_REPORT, REQUEST]
}

/// Enable every module of `kind` set in `mask`.
pub fn enable_modules(kind: ModuleKind, mask: u8) -> Vec<u8> {
    vec![opcodes::ENABLE_MODULE, kind.code(), mask]
}

// ── Servos ─────────────────────────────────────────────────────

/// Move servos to absolute positions (degrees from centre).
///
/// Layout: `[0x09, mask×4, pos per selected ID ascending, speed, 0, 0]`.
/// A repeated ID keeps its last target.
pub fn set_servo_positions(targets: &[(u8, i16)], speed: u8) -> Result<Vec<u8>> {
    if targets.is_empty() {
        return Err(Error::InvalidCommand("no servo targets"));
    }
    let mut by_id = BTreeMap::new();
    for &(id, degrees) in targets {
        check_servo_id(id)?;
        by_id.insert(id, degrees_to_raw(degrees));
    }

    let ids: Vec<u8> = by_id.keys().copied().collect();
    let mut out = Vec::with_capacity(8 + by_id.len());
    out.push(opcodes::SET_SERVO_POSITIONS);
    out.extend_from_slice(&servo_mask_to_bytes(mask32_from_ids(&ids)));
    out.extend(by_id.values());
    out.push(speed);
    out.extend_from_slice(&[0x00, 0x00]);
    Ok(out)
}

/// Continuous rotation for up to six servos sharing direction and speed.
pub fn rotate_servos(ids: &[u8], direction: RotateDirection, velocity: u16) -> Result<Vec<u8>> {
    if ids.is_empty() || ids.len() > MAX_ROTATE_IDS {
        return Err(Error::InvalidCommand("rotate takes 1..=6 servo IDs"));
    }
    for &id in ids {
        check_servo_id(id)?;
    }
    let mut out = Vec::with_capacity(5 + ids.len());
    out.push(opcodes::ROTATE_SERVO);
    out.push(ids.len() as u8);
    out.extend_from_slice(ids);
    out.push(direction as u8);
    out.extend_from_slice(&velocity.to_be_bytes());
    Ok(out)
}

/// Read one servo's position; ID 0 asks every servo.
pub fn read_servo_position(id: u8) -> Vec<u8> {
    vec![opcodes::SERVO_POSITION, id]
}

pub fn change_servo_id(old: u8, new: u8) -> Result<Vec<u8>> {
    check_servo_id(old)?;
    check_servo_id(new)?;
    Ok(vec![opcodes::CHANGE_SERVO_ID, old, new])
}

// ── Motors ─────────────────────────────────────────────────────

/// Run a motor at a signed speed for `duration_ms` (100ms ticks, max 6s).
pub fn rotate_motor(id: u8, speed: i16, duration_ms: u32) -> Result<Vec<u8>> {
    check_module_id(id)?;
    let ticks = (duration_ms / 100).min(u32::from(MAX_MOTOR_TICKS)) as u8;
    let [hi, lo] = speed.to_be_bytes();
    Ok(vec![
        opcodes::MOTOR_ROTATE,
        ModuleKind::Motor.code(),
        id,
        hi,
        lo,
        ticks,
    ])
}

pub fn stop_motor(id: u8) -> Result<Vec<u8>> {
    rotate_motor(id, 0, 0)
}

// ── Eyes and LEDs ──────────────────────────────────────────────

fn led_color(kind: ModuleKind, mask: u8, segments: &[(u8, Rgb)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + segments.len() * 4);
    out.extend_from_slice(&[opcodes::EYE_COLOR, kind.code(), mask, HOLD, segments.len() as u8]);
    for (segment_mask, c) in segments {
        out.extend_from_slice(&[*segment_mask, c.r, c.g, c.b]);
    }
    out
}

/// Solid colour on every eye in `mask`.
pub fn eye_color(mask: u8, color: Rgb) -> Result<Vec<u8>> {
    if mask == 0 {
        return Err(Error::InvalidCommand("empty eye mask"));
    }
    Ok(led_color(ModuleKind::Eye, mask, &[(ALL_SEGMENTS, color)]))
}

/// Per-segment colours; each entry is `(segment mask, colour)`.
pub fn eye_segments(mask: u8, segments: &[(u8, Rgb)]) -> Result<Vec<u8>> {
    if mask == 0 {
        return Err(Error::InvalidCommand("empty eye mask"));
    }
    if segments.is_empty() || segments.len() > 8 {
        return Err(Error::InvalidCommand("eye segments take 1..=8 groups"));
    }
    Ok(led_color(ModuleKind::Eye, mask, segments))
}

pub fn eye_off(mask: u8) -> Result<Vec<u8>> {
    eye_color(mask, Rgb::OFF)
}

/// Play a built-in eye animation scene.
pub fn eye_scene(mask: u8, scene: u8, repeat: u8, color: Rgb) -> Result<Vec<u8>> {
    if mask == 0 {
        return Err(Error::InvalidCommand("empty eye mask"));
    }
    Ok(vec![
        opcodes::EYE_SCENE,
        ModuleKind::Eye.code(),
        mask,
        scene,
        repeat,
        color.r,
        color.g,
        color.b,
    ])
}

/// Colour of one ultrasonic sensor's ring LED.
pub fn ultrasonic_led(id: u8, color: Rgb) -> Result<Vec<u8>> {
    check_module_id(id)?;
    Ok(led_color(
        ModuleKind::Ultrasonic,
        1 << (id - 1),
        &[(ALL_SEGMENTS, color)],
    ))
}

// ── Peripheral management ──────────────────────────────────────

pub fn change_peripheral_id(kind: ModuleKind, old: u8, new: u8) -> Result<Vec<u8>> {
    check_module_id(old)?;
    check_module_id(new)?;
    Ok(vec![opcodes::CHANGE_PERIPHERAL_ID, kind.code(), old, new])
}

// ── Sensors ────────────────────────────────────────────────────

/// Sensor-read frames for `requests`.
///
/// The brick answers at most one reading per sensor type per frame, so the
/// requests are split into rounds: frame `n` carries the `n`-th requested ID
/// of every type.  Duplicates are dropped.
pub fn sensor_reads(requests: &[(SensorKind, u8)]) -> Result<Vec<Vec<u8>>> {
    let mut per_kind: BTreeMap<u8, Vec<u8>> = BTreeMap::new();
    for &(kind, id) in requests {
        check_module_id(id)?;
        let ids = per_kind.entry(kind.code()).or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    let rounds = per_kind.values().map(Vec::len).max().unwrap_or(0);
    let frames = (0..rounds)
        .map(|round| {
            let picks: Vec<(u8, u8)> = per_kind
                .iter()
                .filter_map(|(&kind, ids)| ids.get(round).map(|&id| (kind, id)))
                .collect();
            let mut out = vec![opcodes::SENSOR, SENSOR_READ, 0x00, picks.len() as u8];
            for (kind, id) in picks {
                out.extend_from_slice(&[kind, 0x00, id]);
            }
            out
        })
        .collect();
    Ok(frames)
}

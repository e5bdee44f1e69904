//! Inbound frame interpreters.
//!
//! Each function looks at one validated [`Frame`] and returns a typed
//! report, or `None` when the frame does not fit that shape.  A single frame
//! may satisfy several interpreters (a short status-bearing reply is both an
//! acknowledgement and its opcode-specific report).

use heapless::Vec as IdVec;
use serde::{Deserialize, Serialize};

use super::codec::Frame;
use super::opcodes::{self, ModuleKind};

/// Up to 8 module IDs from a one-byte bitmap.
pub type ModuleIds = IdVec<u8, 8>;

/// Up to 32 servo IDs from the four-byte mask.
pub type ServoIds = IdVec<u8, 32>;

// ── Status map layout (offsets into the payload) ───────────────

const FIRMWARE_TEXT: core::ops::Range<usize> = 1..12;
const SERVO_MASK_OFFSET: usize = 12;
const IR_OFFSET: usize = 29;
const EYE_OFFSET: usize = 50;
const ULTRASONIC_OFFSET: usize = 64;
const SPEAKER_OFFSET: usize = 78;
const MOTOR_OFFSET: usize = 120;

/// Servo positions are centred on this raw value.
pub const SERVO_CENTER: i16 = 120;
/// Servo travel either side of centre, in degrees.
pub const SERVO_RANGE: i16 = 120;

// ── ID / bitmap conversions ────────────────────────────────────

/// IDs present in an 8-slot bitmap (bit0 = ID1).
pub fn ids_from_mask8(mask: u8) -> ModuleIds {
    let mut ids = ModuleIds::new();
    for bit in 0..8u8 {
        if mask & (1 << bit) != 0 {
            // Capacity is exactly 8.
            let _ = ids.push(bit + 1);
        }
    }
    ids
}

/// Bitmap for IDs 1..=8; out-of-range IDs are ignored.
pub fn mask8_from_ids(ids: &[u8]) -> u8 {
    ids.iter()
        .filter(|id| (1..=8).contains(*id))
        .fold(0, |mask, id| mask | 1 << (id - 1))
}

/// IDs present in the 32-bit servo mask (bit0 = ID1).
pub fn ids_from_mask32(mask: u32) -> ServoIds {
    let mut ids = ServoIds::new();
    for bit in 0..32u8 {
        if mask & (1 << bit) != 0 {
            let _ = ids.push(bit + 1);
        }
    }
    ids
}

/// Mask for servo IDs 1..=32; out-of-range IDs are ignored.
pub fn mask32_from_ids(ids: &[u8]) -> u32 {
    ids.iter()
        .filter(|id| (1..=32).contains(*id))
        .fold(0, |mask, id| mask | 1 << (id - 1))
}

/// Servo mask from its wire bytes.  The bytes run most-significant ID group
/// first, so the last byte covers IDs 1–8.
pub fn servo_mask_from_bytes(bytes: [u8; 4]) -> u32 {
    u32::from_be_bytes(bytes)
}

/// Wire bytes for a servo mask (inverse of [`servo_mask_from_bytes`]).
pub fn servo_mask_to_bytes(mask: u32) -> [u8; 4] {
    mask.to_be_bytes()
}

fn ascii_text(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { ' ' })
        .collect::<String>()
        .trim()
        .to_string()
}

// ── Status map ─────────────────────────────────────────────────

/// Module presence and firmware identity from a status (`0x08`) frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMap {
    pub firmware: String,
    pub servo_mask: u32,
    pub ir_mask: u8,
    pub eye_mask: u8,
    pub ultrasonic_mask: u8,
    pub speaker_mask: u8,
    pub motor_mask: u8,
}

impl StatusMap {
    pub fn servos(&self) -> ServoIds {
        ids_from_mask32(self.servo_mask)
    }

    pub fn ir(&self) -> ModuleIds {
        ids_from_mask8(self.ir_mask)
    }

    pub fn eyes(&self) -> ModuleIds {
        ids_from_mask8(self.eye_mask)
    }

    pub fn ultrasonic(&self) -> ModuleIds {
        ids_from_mask8(self.ultrasonic_mask)
    }

    pub fn speakers(&self) -> ModuleIds {
        ids_from_mask8(self.speaker_mask)
    }

    pub fn motors(&self) -> ModuleIds {
        ids_from_mask8(self.motor_mask)
    }

    /// Bitmap for one module family.
    pub fn mask(&self, kind: ModuleKind) -> u8 {
        match kind {
            ModuleKind::Infrared => self.ir_mask,
            ModuleKind::Eye => self.eye_mask,
            ModuleKind::Ultrasonic => self.ultrasonic_mask,
            ModuleKind::Speaker => self.speaker_mask,
            ModuleKind::Motor => self.motor_mask,
        }
    }
}

/// Decode a status frame.  Offsets beyond the payload read as zero.
pub fn status_map(frame: &Frame) -> Option<StatusMap> {
    if frame.opcode != opcodes::STATUS {
        return None;
    }
    let p = &frame.payload;
    let byte = |offset: usize| p.get(offset).copied().unwrap_or(0);

    let text_end = FIRMWARE_TEXT.end.min(p.len());
    let firmware = if text_end > FIRMWARE_TEXT.start {
        ascii_text(&p[FIRMWARE_TEXT.start..text_end])
    } else {
        String::new()
    };

    let servo_bytes = [
        byte(SERVO_MASK_OFFSET),
        byte(SERVO_MASK_OFFSET + 1),
        byte(SERVO_MASK_OFFSET + 2),
        byte(SERVO_MASK_OFFSET + 3),
    ];

    Some(StatusMap {
        firmware,
        servo_mask: servo_mask_from_bytes(servo_bytes),
        ir_mask: byte(IR_OFFSET),
        eye_mask: byte(EYE_OFFSET),
        ultrasonic_mask: byte(ULTRASONIC_OFFSET),
        speaker_mask: byte(SPEAKER_OFFSET),
        motor_mask: byte(MOTOR_OFFSET),
    })
}

// ── Battery ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Battery {
    pub charging: bool,
    pub volts: f32,
}

pub fn battery(frame: &Frame) -> Option<Battery> {
    let p = &frame.payload;
    if frame.opcode != opcodes::BATTERY || p.len() < 5 {
        return None;
    }
    let raw = u16::from_be_bytes([p[3], p[4]]);
    Some(Battery {
        charging: p[1] == 1,
        volts: f32::from(raw) / 2500.0,
    })
}

// ── Sensors ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorKind {
    Infrared,
    Ultrasonic,
    Unknown(u8),
}

impl SensorKind {
    pub fn from_code(code: u8) -> Self {
        match ModuleKind::from_code(code) {
            Some(ModuleKind::Infrared) => Self::Infrared,
            Some(ModuleKind::Ultrasonic) => Self::Ultrasonic,
            _ => Self::Unknown(code),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Infrared => ModuleKind::Infrared.code(),
            Self::Ultrasonic => ModuleKind::Ultrasonic.code(),
            Self::Unknown(code) => code,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorReading {
    pub kind: SensorKind,
    pub id: u8,
    pub value: u16,
}

const SENSOR_RECORD_LEN: usize = 5;
const SENSOR_RECORDS_OFFSET: usize = 4;

/// Decode a sensor batch.  Truncated trailing records are skipped.
pub fn sensor_batch(frame: &Frame) -> Option<Vec<SensorReading>> {
    let p = &frame.payload;
    if frame.opcode != opcodes::SENSOR || p.len() < SENSOR_RECORDS_OFFSET {
        return None;
    }
    let count = p[3] as usize;
    let readings = (0..count)
        .map_while(|i| {
            let start = SENSOR_RECORDS_OFFSET + i * SENSOR_RECORD_LEN;
            p.get(start..start + SENSOR_RECORD_LEN)
        })
        .map(|rec| SensorReading {
            kind: SensorKind::from_code(rec[0]),
            id: rec[2],
            value: u16::from_be_bytes([rec[3], rec[4]]),
        })
        .collect();
    Some(readings)
}

// ── Servo feedback ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServoFeedback {
    pub id: u8,
    pub raw_position: u8,
    pub degrees: i16,
}

/// Raw servo position → degrees from centre, clamped to ±120.
pub fn raw_to_degrees(raw: u8) -> i16 {
    (i16::from(raw) - SERVO_CENTER).clamp(-SERVO_RANGE, SERVO_RANGE)
}

/// Degrees from centre → raw servo position (inverse of [`raw_to_degrees`]).
pub fn degrees_to_raw(degrees: i16) -> u8 {
    (degrees.clamp(-SERVO_RANGE, SERVO_RANGE) + SERVO_CENTER) as u8
}

pub fn servo_feedback(frame: &Frame) -> Option<ServoFeedback> {
    let p = &frame.payload;
    if frame.opcode != opcodes::SERVO_POSITION || p.len() < 3 {
        return None;
    }
    let raw = p[p.len() - 1];
    Some(ServoFeedback {
        id: p[1],
        raw_position: raw,
        degrees: raw_to_degrees(raw),
    })
}

// ── Acknowledgements and error reports ─────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub opcode: u8,
    pub status: u8,
    pub ok: bool,
    pub device_id: Option<u8>,
    pub detail: Option<u8>,
}

/// Short replies (2 to 4 payload bytes) carry a status byte.
pub fn command_result(frame: &Frame) -> Option<CommandResult> {
    let p = &frame.payload;
    if !(2..=4).contains(&p.len()) {
        return None;
    }
    Some(CommandResult {
        opcode: frame.opcode,
        status: p[1],
        ok: p[1] == 0,
        device_id: p.get(2).copied(),
        detail: p.get(3).copied(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub error_type: u8,
    pub mask: Vec<u8>,
}

pub fn error_report(frame: &Frame) -> Option<ErrorReport> {
    let p = &frame.payload;
    if frame.opcode != opcodes::ERROR_REPORT || p.len() < 2 {
        return None;
    }
    Some(ErrorReport {
        error_type: p[1],
        mask: p[2..].to_vec(),
    })
}

/// Identity string from a brick-info (`0x36`) reply.
pub fn brick_info(frame: &Frame) -> Option<String> {
    if frame.opcode != opcodes::BRICK_INFO || frame.payload.len() < 2 {
        return None;
    }
    let text = ascii_text(frame.params());
    (!text.is_empty()).then_some(text)
}

//! Opcode table and peripheral type codes.

use serde::{Deserialize, Serialize};

pub const PROBE: u8 = 0x01;
pub const PING: u8 = 0x03;
pub const ERROR_REPORT: u8 = 0x05;
pub const ROTATE_SERVO: u8 = 0x07;
pub const STATUS: u8 = 0x08;
pub const SET_SERVO_POSITIONS: u8 = 0x09;
pub const SERVO_POSITION: u8 = 0x0B;
pub const CHANGE_SERVO_ID: u8 = 0x0C;
pub const BATTERY: u8 = 0x27;
pub const BRICK_INFO: u8 = 0x36;
pub const ENABLE_MODULE: u8 = 0x71;
pub const CHANGE_PERIPHERAL_ID: u8 = 0x74;
pub const EYE_SCENE: u8 = 0x78;
pub const EYE_COLOR: u8 = 0x79;
pub const SENSOR: u8 = 0x7E;
pub const MOTOR_ROTATE: u8 = 0x90;

/// Peripheral families addressed by an 8-slot bitmap.
///
/// The discriminant is the type byte used by enable, ID-change, LED and
/// sensor frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum ModuleKind {
    Infrared = 0x01,
    Eye = 0x04,
    Ultrasonic = 0x06,
    Speaker = 0x08,
    Motor = 0x0A,
}

impl ModuleKind {
    /// Wire type byte.
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::Infrared),
            0x04 => Some(Self::Eye),
            0x06 => Some(Self::Ultrasonic),
            0x08 => Some(Self::Speaker),
            0x0A => Some(Self::Motor),
            _ => None,
        }
    }
}

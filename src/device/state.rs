//! Last known device state and the frame classifiers that update it.

use log::{debug, info, warn};

use crate::events::DeviceEvent;
use crate::protocol::parse::{self, Battery, CommandResult, ErrorReport, StatusMap};
use crate::protocol::{Frame, opcodes};

/// Longest payload treated as an acknowledgement.
pub const ACK_MAX_LEN: usize = 4;

/// Mutated only by [`DeviceState::apply`] and [`DeviceState::reset`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceState {
    pub connected: bool,
    pub last_status: Option<StatusMap>,
    pub last_battery: Option<Battery>,
    pub last_error: Option<ErrorReport>,
    pub last_command_result: Option<CommandResult>,
    pub brick_info: Option<String>,
}

impl DeviceState {
    /// Classify one frame, update state and return the typed events it
    /// produces after `FrameReceived`.  A frame may match several
    /// classifiers.
    pub fn apply(&mut self, frame: &Frame) -> Vec<DeviceEvent> {
        let mut events = vec![DeviceEvent::FrameReceived(frame.clone())];

        if let Some(result) = parse::command_result(frame) {
            self.last_command_result = Some(result);
            if result.ok {
                events.push(DeviceEvent::CommandResult(result));
            } else {
                warn!(
                    "device: {:#04x} rejected with status {:#04x}",
                    result.opcode, result.status
                );
                events.push(DeviceEvent::CommandResult(result));
                events.push(DeviceEvent::DeviceError(result));
            }
        }

        match frame.opcode {
            opcodes::ERROR_REPORT => {
                if let Some(report) = parse::error_report(frame) {
                    warn!("device: error report type {:#04x}", report.error_type);
                    self.last_error = Some(report.clone());
                    events.push(DeviceEvent::ErrorReport(report));
                }
            }
            opcodes::STATUS if frame.payload.len() > ACK_MAX_LEN => {
                if let Some(status) = parse::status_map(frame) {
                    debug!(
                        "device: status fw='{}' servos={:?} ir={:?} eyes={:?} us={:?} spk={:?} motors={:?}",
                        status.firmware,
                        status.servos(),
                        status.ir(),
                        status.eyes(),
                        status.ultrasonic(),
                        status.speakers(),
                        status.motors()
                    );
                    self.last_status = Some(status.clone());
                    events.push(DeviceEvent::StatusUpdated(status));
                }
            }
            opcodes::BATTERY => {
                if let Some(battery) = parse::battery(frame) {
                    self.last_battery = Some(battery);
                    events.push(DeviceEvent::BatteryUpdated(battery));
                }
            }
            opcodes::SENSOR => {
                if let Some(readings) = parse::sensor_batch(frame) {
                    events.push(DeviceEvent::SensorBatch(readings));
                }
            }
            opcodes::SERVO_POSITION => {
                if let Some(feedback) = parse::servo_feedback(frame) {
                    events.push(DeviceEvent::ServoPositionUpdated(feedback));
                }
            }
            opcodes::PING => events.push(DeviceEvent::PingEcho),
            opcodes::BRICK_INFO => {
                if let Some(info) = parse::brick_info(frame) {
                    info!("device: brick '{}'", info);
                    self.brick_info = Some(info.clone());
                    events.push(DeviceEvent::BrickInfo(info));
                }
            }
            _ => {}
        }

        events
    }

    /// Forget everything learned from the link.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

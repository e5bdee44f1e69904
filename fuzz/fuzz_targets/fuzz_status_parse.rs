//! Fuzz target: inbound report interpreters
//!
//! Wraps arbitrary bytes as a frame payload and runs every interpreter over
//! it.  None may panic on short or hostile payloads, and decoded ID lists
//! must stay inside their documented ranges.
//!
//! cargo fuzz run fuzz_status_parse

#![no_main]

use brickwire::protocol::{Frame, parse};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some(&opcode) = data.first() else {
        return;
    };
    let frame = Frame {
        opcode,
        payload: data.to_vec(),
    };

    if let Some(status) = parse::status_map(&frame) {
        assert!(status.servos().iter().all(|id| (1..=32).contains(id)));
        assert!(status.ir().iter().all(|id| (1..=8).contains(id)));
        assert!(status.motors().iter().all(|id| (1..=8).contains(id)));
        assert_eq!(status.firmware.trim(), status.firmware);
    }
    let _ = parse::battery(&frame);
    let _ = parse::sensor_batch(&frame);
    let _ = parse::servo_feedback(&frame);
    let _ = parse::command_result(&frame);
    let _ = parse::error_report(&frame);
    let _ = parse::brick_info(&frame);
});

//! Fuzz target: `StreamReassembler::feed`
//!
//! Splits arbitrary bytes into chunks and drives them through the stream
//! reassembler.  Asserts that it never panics, never yields an empty
//! payload, that every frame it yields survives a fresh encode/decode, and
//! that a reset leaves nothing buffered.
//!
//! cargo fuzz run fuzz_reassembler

#![no_main]

use brickwire::protocol::{StreamEvent, StreamReassembler, decode, encode};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // First byte picks the chunk size so splits vary with the corpus.
    let Some((&split, rest)) = data.split_first() else {
        return;
    };
    let chunk = usize::from(split % 32) + 1;

    let mut r = StreamReassembler::new();
    for piece in rest.chunks(chunk) {
        for event in r.feed(piece) {
            if let StreamEvent::Frame(frame) = event {
                assert!(!frame.payload.is_empty(), "empty payload emitted");
                assert_eq!(frame.opcode, frame.payload[0]);
                let again = decode(&encode(&frame.payload)).expect("re-encoded frame must decode");
                assert_eq!(again, frame);
            }
        }
    }

    // Whole-buffer feeding finds the same frames as chunked feeding.
    let stats = r.stats();
    let mut whole = StreamReassembler::new();
    let _ = whole.feed(rest);
    assert_eq!(whole.stats().frames, stats.frames);

    r.reset();
    assert_eq!(r.buffered(), 0);
});

//! Integration test driver for `tests/integration/` submodules.
//!
//! Each `mod` below exercises one layer of the engine against the mock
//! link in `mock_link.rs`.  Everything runs on the host with no radio.

mod device_tests;
mod mock_link;
mod session_tests;

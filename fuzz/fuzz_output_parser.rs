//! Fuzz target for the skill output protocol parser.
//!
//! Run with: cargo +nightly fuzz run fuzz_output_parser

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let stdout = String::from_utf8_lossy(data);
    let _ = skillrun_core::parse_skill_output(&stdout);
});

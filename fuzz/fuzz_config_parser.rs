//! Fuzz target for the `skillrun.toml` parser.
//!
//! Run with: cargo +nightly fuzz run fuzz_config_parser

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(config) = skillrun_config::RunnerConfig::parse(s) {
            // Whatever parsed must resolve to limits the engine accepts.
            assert!(config.defaults.resolve().validate().is_ok());
        }
    }
});

//! Fuzz target for skill manifest validation.
//!
//! Run with: cargo +nightly fuzz run fuzz_manifest_parser
//!
//! Feeds arbitrary text through YAML parsing and every field rule. Any
//! manifest that validates must satisfy the name and egress invariants.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(manifest) = skillrun_core::parse_manifest(s) {
        assert!(manifest.name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
        assert!(manifest.egress().iter().all(|r| !r.domain.contains('*')));
    }
});

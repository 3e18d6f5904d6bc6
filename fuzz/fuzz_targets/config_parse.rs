//! Fuzz target for TOML config parsing and validation.
//!
//! Malformed or out-of-range input must produce an error, never a panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use redictum::Config;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(config) = toml::from_str::<Config>(s) {
            if config.validate().is_ok() {
                let _ = config.hotkey.hold_delay();
                let _ = config.clipboard.restore_delay();
            }
        }
    }
});

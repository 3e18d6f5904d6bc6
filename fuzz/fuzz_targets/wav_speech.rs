//! Fuzz target for the WAV reader behind speech detection.
//!
//! Recordings come from an external tool and may be truncated or carry odd
//! chunks; the RMS check has to reject them without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use redictum::engine::signal_rms;
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    if let Some(rms) = signal_rms(Cursor::new(data)) {
        assert!(rms.is_finite());
        assert!(rms >= 0.0);
    }
});

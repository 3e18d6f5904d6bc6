//! Output volume ducking through `pactl`.

use crate::platform::VolumeControl;
use crate::process::{run_blocking, AbortSignal};
use std::ffi::OsString;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

const PACTL_TIMEOUT: Duration = Duration::from_secs(2);
const SINK: &str = "@DEFAULT_SINK@";

/// First percentage in `pactl get-sink-volume` output
pub fn parse_volume(output: &str) -> Option<u32> {
    output
        .split_whitespace()
        .find_map(|token| token.strip_suffix('%')?.parse().ok())
}

/// The ducked volume: `level` percent of `current`.
pub fn ducked(current: u32, level: u8) -> u32 {
    current * u32::from(level.min(100)) / 100
}

/// Lowers the default sink while recording and puts it back afterwards.
pub struct PactlVolume {
    program: OsString,
    leading_args: Vec<OsString>,
    level: u8,
    saved: Mutex<Option<u32>>,
    abort: AbortSignal,
}

impl PactlVolume {
    pub fn new(level: u8) -> Self {
        Self::with_program("pactl", Vec::new(), level)
    }

    fn with_program(program: impl Into<OsString>, leading_args: Vec<OsString>, level: u8) -> Self {
        Self {
            program: program.into(),
            leading_args,
            level,
            saved: Mutex::new(None),
            abort: AbortSignal::new(),
        }
    }

    fn pactl(&self, args: &[&str]) -> Option<String> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args).args(args);

        match run_blocking(cmd, PACTL_TIMEOUT, &self.abort) {
            Ok(out) if out.status.success() => Some(out.stdout_lossy()),
            Ok(out) => {
                warn!("pactl {} failed: {}", args.join(" "), out.stderr_tail());
                None
            }
            Err(e) => {
                warn!("pactl unavailable: {}", e);
                None
            }
        }
    }

    fn set(&self, percent: u32) -> bool {
        self.pactl(&["set-sink-volume", SINK, &format!("{percent}%")])
            .is_some()
    }
}

impl VolumeControl for PactlVolume {
    fn reduce(&self) {
        let mut saved = self.saved.lock().unwrap_or_else(PoisonError::into_inner);
        if saved.is_some() {
            debug!("Volume already reduced");
            return;
        }

        let Some(current) = self
            .pactl(&["get-sink-volume", SINK])
            .as_deref()
            .and_then(parse_volume)
        else {
            return;
        };

        let target = ducked(current, self.level);
        if self.set(target) {
            info!("Volume reduced {}% -> {}%", current, target);
            *saved = Some(current);
        }
    }

    fn restore(&self) {
        let previous = self
            .saved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(previous) = previous {
            if self.set(previous) {
                info!("Volume restored to {}%", previous);
            }
        }
    }
}

/// Used when ducking is switched off
pub struct FixedVolume;

impl VolumeControl for FixedVolume {
    fn reduce(&self) {}

    fn restore(&self) {}
}

//! Sound cues and desktop popups.
//!
//! Tones are synthesized once into WAV files under the data directory and
//! played with `paplay`. Playback is fire-and-forget: a missing player or a
//! failed popup is logged and otherwise ignored.

use crate::config::FeedbackConfig;
use crate::platform::{NotifyKind, Notifier};
use crate::process::{find_program, run_bounded, spawn_on_tools, AbortSignal};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::f32::consts::TAU;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

const SAMPLE_RATE: u32 = 22050;
const FADE_SECS: f32 = 0.01;
const AMPLITUDE: f32 = 0.45;

/// paplay treats 65536 as 100%
const PAPLAY_FULL_SCALE: u32 = 65536;

/// Longest cue is well under a second; anything past this is a stuck player
const PLAYBACK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum SoundError {
    #[error("Failed to create sound directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write tone {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },
}

/// A linear frequency sweep
#[derive(Debug, Clone, Copy)]
struct Tone {
    from_hz: f32,
    to_hz: f32,
    secs: f32,
}

fn tone(kind: NotifyKind) -> Tone {
    match kind {
        NotifyKind::Start => Tone {
            from_hz: 660.0,
            to_hz: 880.0,
            secs: 0.12,
        },
        NotifyKind::Processing => Tone {
            from_hz: 520.0,
            to_hz: 520.0,
            secs: 0.1,
        },
        NotifyKind::Done => Tone {
            from_hz: 880.0,
            to_hz: 1320.0,
            secs: 0.15,
        },
        NotifyKind::Error => Tone {
            from_hz: 220.0,
            to_hz: 220.0,
            secs: 0.25,
        },
    }
}

fn file_name(kind: NotifyKind) -> &'static str {
    match kind {
        NotifyKind::Start => "start.wav",
        NotifyKind::Processing => "processing.wav",
        NotifyKind::Done => "done.wav",
        NotifyKind::Error => "error.wav",
    }
}

fn synthesize(tone: Tone) -> Vec<i16> {
    let total = (tone.secs * SAMPLE_RATE as f32) as usize;
    let fade = ((FADE_SECS * SAMPLE_RATE as f32) as usize).max(1);
    let mut phase = 0.0f32;

    (0..total)
        .map(|i| {
            let progress = i as f32 / total as f32;
            let freq = tone.from_hz + (tone.to_hz - tone.from_hz) * progress;
            phase = (phase + TAU * freq / SAMPLE_RATE as f32) % TAU;

            let envelope = (i.min(total - 1 - i) as f32 / fade as f32).min(1.0);
            (phase.sin() * envelope * AMPLITUDE * f32::from(i16::MAX)) as i16
        })
        .collect()
}

/// Write every cue to `dir`, replacing what is there.
pub fn render_tones(dir: &Path) -> Result<(), SoundError> {
    std::fs::create_dir_all(dir).map_err(|source| SoundError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let spec = WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    for kind in [
        NotifyKind::Start,
        NotifyKind::Processing,
        NotifyKind::Done,
        NotifyKind::Error,
    ] {
        let path = dir.join(file_name(kind));
        let write = |path: &Path| -> Result<(), hound::Error> {
            let mut writer = WavWriter::create(path, spec)?;
            for sample in synthesize(tone(kind)) {
                writer.write_sample(sample)?;
            }
            writer.finalize()
        };
        write(&path).map_err(|source| SoundError::Write { path, source })?;
    }

    debug!("Rendered sound cues into {}", dir.display());
    Ok(())
}

/// Map a 0-100 percentage onto paplay's volume scale.
pub fn paplay_volume(percent: u8) -> u32 {
    u32::from(percent.min(100)) * PAPLAY_FULL_SCALE / 100
}

/// Plays cues through paplay and optionally shows desktop popups
pub struct FeedbackNotifier {
    config: FeedbackConfig,
    sounds_dir: PathBuf,
    player: Option<PathBuf>,
    warned: AtomicBool,
}

impl FeedbackNotifier {
    pub fn new(config: &FeedbackConfig, sounds_dir: PathBuf) -> Self {
        if let Err(e) = render_tones(&sounds_dir) {
            warn!("Sound cues unavailable: {}", e);
        }

        Self {
            config: config.clone(),
            sounds_dir,
            player: find_program("paplay"),
            warned: AtomicBool::new(false),
        }
    }

    pub fn sound_enabled(&self, kind: NotifyKind) -> bool {
        match kind {
            NotifyKind::Start => self.config.sound_start,
            NotifyKind::Processing => self.config.sound_processing,
            NotifyKind::Done => self.config.sound_done,
            NotifyKind::Error => self.config.sound_error,
        }
    }

    fn play(&self, kind: NotifyKind) {
        let Some(player) = &self.player else {
            if !self.warned.swap(true, Ordering::Relaxed) {
                warn!("paplay not found; sound cues disabled");
            }
            return;
        };

        let path = self.sounds_dir.join(file_name(kind));
        let mut cmd = Command::new(player);
        cmd.arg(format!("--volume={}", paplay_volume(self.config.volume)))
            .arg(&path);

        // Playback never holds up the caller
        let playback = async move {
            if let Err(e) = run_bounded(cmd, PLAYBACK_TIMEOUT, &AbortSignal::new()).await {
                warn!("Failed to play {}: {}", path.display(), e);
            }
        };
        if let Err(e) = spawn_on_tools(playback) {
            warn!("Cannot start sound playback: {}", e);
        }
    }

    fn popup(kind: NotifyKind) {
        let body = match kind {
            NotifyKind::Done => "Text ready",
            NotifyKind::Error => "Dictation failed, see the daemon log",
            _ => return,
        };

        thread::spawn(move || {
            if let Err(e) = notify_rust::Notification::new()
                .summary("Redictum")
                .body(body)
                .appname("Redictum")
                .show()
            {
                warn!("Desktop notification failed: {}", e);
            }
        });
    }
}

impl Notifier for FeedbackNotifier {
    fn signal(&self, kind: NotifyKind) {
        debug!("Feedback: {:?}", kind);
        if self.sound_enabled(kind) {
            self.play(kind);
        }
        if self.config.desktop {
            Self::popup(kind);
        }
    }
}

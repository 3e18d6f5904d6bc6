//! Per-session processing: normalize, speech check, transcribe, deliver.
//!
//! Runs on a dedicated thread spawned by the orchestrator for each release.
//! Whatever happens inside, the session is handed back with
//! `finish_processing` and the shutdown coordinator hears about completion.

use super::Collaborators;
use crate::config::Config;
use crate::panic_handler::panic_message;
use crate::platform::{AudioFile, NotifyKind, StageError, TranscribeMode};
use crate::session::{Mode, RecordingHandle, SessionError, SessionState, ShutdownCoordinator};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Tunables for one pipeline run
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub normalize: bool,
    pub silence_detection: bool,
    /// Paste at cursor and restore the clipboard; otherwise copy only
    pub paste_auto: bool,
    pub prefix: String,
    pub postfix: String,
    /// How long the focused window gets to read the clipboard after the paste
    pub restore_delay: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            normalize: config.audio.normalize,
            silence_detection: config.audio.silence_detection,
            paste_auto: config.clipboard.paste_auto,
            prefix: config.clipboard.prefix.clone(),
            postfix: config.clipboard.postfix.clone(),
            restore_delay: config.clipboard.restore_delay(),
        }
    }
}

/// How a session ended when no stage failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Text pasted at the cursor, clipboard restored
    Pasted { chars: usize },
    /// Text left on the clipboard
    Copied { chars: usize },
    /// Nothing above the silence threshold; whisper was not run
    Silence,
    /// Whisper ran and produced nothing
    EmptyTranscript,
}

/// The stage sequence, free of session bookkeeping.
pub struct Pipeline {
    deps: Collaborators,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(deps: Collaborators, settings: PipelineSettings) -> Self {
        Self { deps, settings }
    }

    /// Run every stage for one recording. The first failing stage ends the run.
    pub fn process(
        &self,
        audio: &AudioFile,
        mode: TranscribeMode,
    ) -> Result<PipelineOutcome, StageError> {
        let audio = if self.settings.normalize {
            self.deps.processor.normalize(audio)?
        } else {
            audio.clone()
        };

        if self.settings.silence_detection && !self.deps.processor.has_speech(&audio) {
            info!("No speech detected in {}", audio.path().display());
            return Ok(PipelineOutcome::Silence);
        }

        let started = Instant::now();
        let text = self.deps.transcriber.transcribe(&audio, mode)?;
        info!(
            "Transcription finished in {:.2}s ({} chars)",
            started.elapsed().as_secs_f32(),
            text.chars().count()
        );

        if text.trim().is_empty() {
            info!("Transcription is empty; nothing to paste");
            return Ok(PipelineOutcome::EmptyTranscript);
        }

        self.deps.archive.record_transcript(&text);
        self.deliver(&self.shape(&text))
    }

    /// Apply the configured prefix and postfix
    pub fn shape(&self, text: &str) -> String {
        format!("{}{}{}", self.settings.prefix, text, self.settings.postfix)
    }

    fn deliver(&self, text: &str) -> Result<PipelineOutcome, StageError> {
        let clipboard = &self.deps.clipboard;
        let chars = text.chars().count();

        if !self.settings.paste_auto {
            clipboard.write(text)?;
            info!("Copied {} chars to clipboard", chars);
            return Ok(PipelineOutcome::Copied { chars });
        }

        let snapshot = clipboard.save()?;
        let pasted = clipboard.write(text).and_then(|()| clipboard.paste());
        if pasted.is_ok() {
            settle(self.settings.restore_delay);
        }

        // Restore on every path once the snapshot exists.
        if let Err(e) = clipboard.restore(snapshot) {
            warn!("Failed to restore clipboard: {}", e);
        }

        pasted?;
        info!("Pasted {} chars at cursor", chars);
        Ok(PipelineOutcome::Pasted { chars })
    }
}

/// Sleep until strictly more than `delay` has elapsed.
fn settle(delay: Duration) {
    let started = Instant::now();
    while started.elapsed() <= delay {
        let remaining = delay.saturating_sub(started.elapsed());
        thread::sleep(remaining.max(Duration::from_millis(1)));
    }
}

/// Hands the session back even if the worker unwinds.
///
/// Completion is signalled before the session returns to idle, so a session
/// started afterwards is never mistaken for a finished one.
struct SessionRelease {
    state: Arc<SessionState>,
    shutdown: Arc<ShutdownCoordinator>,
    id: u64,
}

impl Drop for SessionRelease {
    fn drop(&mut self) {
        self.shutdown.pipeline_finished();

        match self.state.finish_processing() {
            Ok(_) => {}
            Err(SessionError::InvalidTransition {
                from: Mode::ShuttingDown,
                ..
            }) => debug!("Session {} finished after shutdown began", self.id),
            Err(e) => warn!("Session {} could not return to idle: {}", self.id, e),
        }
    }
}

/// Everything the worker thread owns for one session.
pub(super) struct Job {
    pub state: Arc<SessionState>,
    pub shutdown: Arc<ShutdownCoordinator>,
    pub pipeline: Arc<Pipeline>,
    pub deps: Collaborators,
    pub session: RecordingHandle,
    pub audio: AudioFile,
}

impl Job {
    pub fn run(self) {
        let id = self.session.id();
        let _release = SessionRelease {
            state: self.state.clone(),
            shutdown: self.shutdown.clone(),
            id,
        };
        let mode = TranscribeMode::for_session(&self.session);
        debug!("Pipeline {} started ({:?})", id, mode);

        self.deps.notifier.signal(NotifyKind::Processing);

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.pipeline.process(&self.audio, mode)
        }))
        .unwrap_or_else(|payload| Err(StageError::Panicked(panic_message(payload.as_ref()))));

        match &result {
            Ok(outcome) => {
                info!("Session {} finished: {:?}", id, outcome);
                self.deps.notifier.signal(NotifyKind::Done);
            }
            Err(e) => {
                error!("Session {} failed: {}", id, e);
                self.deps.notifier.signal(NotifyKind::Error);
            }
        }

        self.deps.archive.rotate();
    }
}

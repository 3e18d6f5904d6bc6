//! Collaborator seams driven by the pipeline.
//!
//! The orchestrator never talks to a desktop tool directly. It works through
//! these traits; the subprocess and desktop implementations live in `input`,
//! `engine`, `output` and `feedback`, and tests substitute recording fakes.

use crate::process::RunError;
use crate::session::RecordingHandle;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Failure of one pipeline stage
#[derive(Error, Debug)]
pub enum StageError {
    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Normalization error: {0}")]
    Normalize(String),

    #[error("Transcription error: {0}")]
    Transcribe(String),

    #[error("Clipboard error: {0}")]
    Clipboard(String),

    #[error("Paste error: {0}")]
    Paste(String),

    #[error("{stage} timed out after {timeout:?}")]
    Timeout {
        stage: &'static str,
        timeout: Duration,
    },

    #[error("{0} aborted by shutdown")]
    Aborted(&'static str),

    #[error("Pipeline panicked: {0}")]
    Panicked(String),
}

impl StageError {
    /// Map a tool-runner failure onto `stage`, using `wrap` for plain failures.
    pub fn from_run(
        stage: &'static str,
        err: RunError,
        wrap: impl FnOnce(String) -> StageError,
    ) -> StageError {
        match err {
            RunError::Timeout { timeout, .. } => StageError::Timeout { stage, timeout },
            RunError::Aborted { .. } => StageError::Aborted(stage),
            other => wrap(other.to_string()),
        }
    }
}

/// A finished recording on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFile(PathBuf);

impl AudioFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

/// Whether whisper keeps the spoken language or translates to English
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscribeMode {
    Transcribe,
    Translate,
}

impl TranscribeMode {
    pub fn for_session(handle: &RecordingHandle) -> Self {
        if handle.translate() {
            TranscribeMode::Translate
        } else {
            TranscribeMode::Transcribe
        }
    }
}

/// User-facing cue kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyKind {
    Start,
    Processing,
    Done,
    Error,
}

/// Clipboard contents captured before a paste
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ClipboardSnapshot {
    #[default]
    Empty,
    Text(String),
    Image {
        width: usize,
        height: usize,
        bytes: Vec<u8>,
    },
}

/// Audio capture bound to a recording session
pub trait AudioCapture: Send + Sync {
    /// Begin capturing for `session`
    fn start(&self, session: &RecordingHandle) -> Result<(), StageError>;

    /// Stop capturing and hand back the recording
    fn stop(&self, session: &RecordingHandle) -> Result<AudioFile, StageError>;

    /// Stop capturing and discard the recording. No-op if nothing is active.
    fn cancel(&self, session: &RecordingHandle);
}

/// Audio clean-up ahead of transcription
pub trait AudioProcessing: Send + Sync {
    /// Loudness-normalize. Returns the input unchanged when the tool is missing.
    fn normalize(&self, audio: &AudioFile) -> Result<AudioFile, StageError>;

    /// Whether the recording carries anything above the silence threshold
    fn has_speech(&self, audio: &AudioFile) -> bool;
}

/// Speech recognition
pub trait SpeechToText: Send + Sync {
    /// Transcribe (or translate) the recording. Blank results are `""`.
    fn transcribe(&self, audio: &AudioFile, mode: TranscribeMode) -> Result<String, StageError>;
}

/// Clipboard and paste keystroke
pub trait ClipboardAccess: Send + Sync {
    fn save(&self) -> Result<ClipboardSnapshot, StageError>;

    fn write(&self, text: &str) -> Result<(), StageError>;

    /// Send the paste keystroke to the focused window
    fn paste(&self) -> Result<(), StageError>;

    fn restore(&self, snapshot: ClipboardSnapshot) -> Result<(), StageError>;
}

/// Sound cues and popups. Failures are logged, never surfaced.
pub trait Notifier: Send + Sync {
    fn signal(&self, kind: NotifyKind);
}

/// Output volume ducking while recording. Failures are logged, never surfaced.
pub trait VolumeControl: Send + Sync {
    fn reduce(&self);

    /// Restore the volume saved by `reduce`. Idempotent.
    fn restore(&self);
}

/// Post-processing bookkeeping: transcript log and file rotation
pub trait SessionArchive: Send + Sync {
    fn record_transcript(&self, text: &str);

    fn rotate(&self);
}

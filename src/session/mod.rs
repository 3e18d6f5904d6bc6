//! Session state shared between the event loop and the pipeline worker.
//!
//! A single mutex guards the mode and the active recording handle, so every
//! check-then-transition is atomic. Invariants held under the lock:
//!
//! - `Idle` never carries a handle.
//! - `Recording`, `TranslateRecording` and `Processing` always carry one.
//! - `ShuttingDown` is terminal and carries none.

pub mod shutdown;

pub use shutdown::ShutdownCoordinator;

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use thiserror::Error;
use tracing::debug;

/// Daemon mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Waiting for the hotkey
    Idle,
    /// Capturing audio for plain transcription
    Recording,
    /// Capturing audio that will be translated to English
    TranslateRecording,
    /// Pipeline worker owns the recording
    Processing,
    /// Terminal: no new sessions are accepted
    ShuttingDown,
}

impl Mode {
    pub fn is_recording(self) -> bool {
        matches!(self, Mode::Recording | Mode::TranslateRecording)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Idle => "idle",
            Mode::Recording => "recording",
            Mode::TranslateRecording => "translate-recording",
            Mode::Processing => "processing",
            Mode::ShuttingDown => "shutting-down",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one press-to-release session.
///
/// Allocated by [`SessionState::try_begin_recording`] and handed to the
/// recorder, so capture resources are always tied to the session that owns
/// them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingHandle {
    id: u64,
    translate: bool,
    started_at: Instant,
}

impl RecordingHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn translate(&self) -> bool {
        self.translate
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    fn recording_mode(&self) -> Mode {
        if self.translate {
            Mode::TranslateRecording
        } else {
            Mode::Recording
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("A session is already active ({0})")]
    Busy(Mode),

    #[error("Cannot {event} while {from}")]
    InvalidTransition { from: Mode, event: &'static str },
}

/// What `begin_shutdown` found when it latched the terminal mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownTransition {
    pub previous: Mode,
    /// Handle that was active at the moment of shutdown, if any
    pub interrupted: Option<RecordingHandle>,
}

struct Inner {
    mode: Mode,
    active: Option<RecordingHandle>,
    next_id: u64,
}

/// Mutex-guarded daemon mode plus the active recording handle.
pub struct SessionState {
    inner: Mutex<Inner>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                mode: Mode::Idle,
                active: None,
                next_id: 1,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current mode
    pub fn mode(&self) -> Mode {
        self.lock().mode
    }

    /// Handle of the session currently recording or processing
    pub fn active(&self) -> Option<RecordingHandle> {
        self.lock().active.clone()
    }

    /// Idle -> Recording / TranslateRecording.
    ///
    /// Any other mode yields `Busy` and leaves the state untouched.
    pub fn try_begin_recording(&self, translate: bool) -> Result<RecordingHandle, SessionError> {
        let mut inner = self.lock();
        if inner.mode != Mode::Idle {
            return Err(SessionError::Busy(inner.mode));
        }

        let handle = RecordingHandle {
            id: inner.next_id,
            translate,
            started_at: Instant::now(),
        };
        inner.next_id += 1;
        inner.mode = handle.recording_mode();
        inner.active = Some(handle.clone());

        debug!("Session {} -> {}", handle.id, inner.mode);
        Ok(handle)
    }

    /// Recording / TranslateRecording -> Processing, returning the handle.
    pub fn end_recording(&self) -> Result<RecordingHandle, SessionError> {
        let mut inner = self.lock();
        if !inner.mode.is_recording() {
            return Err(SessionError::InvalidTransition {
                from: inner.mode,
                event: "end recording",
            });
        }

        let handle = inner
            .active
            .clone()
            .ok_or(SessionError::InvalidTransition {
                from: inner.mode,
                event: "end recording",
            })?;
        inner.mode = Mode::Processing;

        debug!("Session {} -> {}", handle.id, inner.mode);
        Ok(handle)
    }

    /// Recording / TranslateRecording -> Idle, used when capture could not start.
    pub fn abort_recording(&self) -> Result<RecordingHandle, SessionError> {
        let mut inner = self.lock();
        if !inner.mode.is_recording() {
            return Err(SessionError::InvalidTransition {
                from: inner.mode,
                event: "abort recording",
            });
        }

        inner.mode = Mode::Idle;
        let handle = inner.active.take().ok_or(SessionError::InvalidTransition {
            from: Mode::Idle,
            event: "abort recording",
        })?;

        debug!("Session {} aborted -> idle", handle.id);
        Ok(handle)
    }

    /// Processing -> Idle, clearing the handle.
    ///
    /// Fails with `InvalidTransition { from: ShuttingDown, .. }` when shutdown
    /// latched while the pipeline ran; the state stays terminal.
    pub fn finish_processing(&self) -> Result<RecordingHandle, SessionError> {
        let mut inner = self.lock();
        if inner.mode != Mode::Processing {
            return Err(SessionError::InvalidTransition {
                from: inner.mode,
                event: "finish processing",
            });
        }

        inner.mode = Mode::Idle;
        let handle = inner.active.take().ok_or(SessionError::InvalidTransition {
            from: Mode::Processing,
            event: "finish processing",
        })?;

        debug!("Session {} -> idle", handle.id);
        Ok(handle)
    }

    /// Any mode -> ShuttingDown. Idempotent.
    pub fn begin_shutdown(&self) -> ShutdownTransition {
        let mut inner = self.lock();
        let previous = inner.mode;
        inner.mode = Mode::ShuttingDown;
        let interrupted = inner.active.take();

        debug!("Session state {} -> {}", previous, Mode::ShuttingDown);
        ShutdownTransition {
            previous,
            interrupted,
        }
    }
}

//! Session orchestration.
//!
//! The [`Orchestrator`] turns hotkey holds and releases into session state
//! transitions, drives capture synchronously on the event loop thread, and
//! hands each finished recording to a dedicated worker thread. It also owns
//! the shutdown sequence for whatever session is active when a stop arrives.

pub mod debounce;
pub mod event_loop;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use debounce::{HoldDebounce, ReleaseKind};
pub use event_loop::run_event_loop;
pub use worker::{Pipeline, PipelineOutcome, PipelineSettings};

use crate::platform::{
    AudioCapture, AudioProcessing, ClipboardAccess, Notifier, NotifyKind, SessionArchive,
    SpeechToText, VolumeControl,
};
use crate::session::{Mode, RecordingHandle, SessionError, SessionState, ShutdownCoordinator};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use worker::Job;

/// How long an abandoned pipeline gets to notice its tool was killed
const ABANDON_SETTLE: Duration = Duration::from_millis(500);

/// How long a finished worker gets to exit before it is left detached
const JOIN_TIMEOUT: Duration = Duration::from_millis(500);

const JOIN_POLL: Duration = Duration::from_millis(5);

/// The external tools a session talks to
#[derive(Clone)]
pub struct Collaborators {
    pub recorder: Arc<dyn AudioCapture>,
    pub processor: Arc<dyn AudioProcessing>,
    pub transcriber: Arc<dyn SpeechToText>,
    pub clipboard: Arc<dyn ClipboardAccess>,
    pub notifier: Arc<dyn Notifier>,
    pub volume: Arc<dyn VolumeControl>,
    pub archive: Arc<dyn SessionArchive>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HoldOutcome {
    Started(RecordingHandle),
    /// A session is already active; the press was dropped
    Busy(Mode),
    /// Capture could not start; back to idle
    CaptureFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Dispatched(RecordingHandle),
    /// No recording was active
    Ignored,
    /// Capture produced nothing usable; back to idle
    CaptureFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    WasIdle,
    RecordingDiscarded,
    PipelineCompleted,
    /// The pipeline overran the grace period and its tools were killed
    PipelineAbandoned,
}

pub struct Orchestrator {
    state: Arc<SessionState>,
    shutdown: Arc<ShutdownCoordinator>,
    deps: Collaborators,
    pipeline: Arc<Pipeline>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(
        state: Arc<SessionState>,
        shutdown: Arc<ShutdownCoordinator>,
        deps: Collaborators,
        settings: PipelineSettings,
    ) -> Self {
        let pipeline = Arc::new(Pipeline::new(deps.clone(), settings));
        Self {
            state,
            shutdown,
            deps,
            pipeline,
            worker: Mutex::new(None),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// A hold passed the debounce: start a session if idle.
    pub fn on_hold(&self, translate: bool) -> HoldOutcome {
        let session = match self.state.try_begin_recording(translate) {
            Ok(session) => session,
            Err(SessionError::Busy(mode)) => {
                debug!("Ignoring hotkey hold while {}", mode);
                return HoldOutcome::Busy(mode);
            }
            Err(e) => {
                warn!("Ignoring hotkey hold: {}", e);
                return HoldOutcome::Busy(self.state.mode());
            }
        };

        if let Err(e) = self.deps.recorder.start(&session) {
            error!("Failed to start recording: {}", e);
            if let Err(e) = self.state.abort_recording() {
                debug!("Session already left recording: {}", e);
            }
            self.deps.notifier.signal(NotifyKind::Error);
            return HoldOutcome::CaptureFailed;
        }

        info!(
            "Recording session {}{}",
            session.id(),
            if translate { " (translate)" } else { "" }
        );
        self.deps.notifier.signal(NotifyKind::Start);
        self.deps.volume.reduce();

        HoldOutcome::Started(session)
    }

    /// The key came up after a committed hold: stop capture and dispatch.
    pub fn on_release(&self) -> ReleaseOutcome {
        let session = match self.state.end_recording() {
            Ok(session) => session,
            Err(e) => {
                debug!("Ignoring hotkey release: {}", e);
                return ReleaseOutcome::Ignored;
            }
        };

        let captured = self.deps.recorder.stop(&session);
        self.deps.volume.restore();

        let audio = match captured {
            Ok(audio) => audio,
            Err(e) => {
                error!("Recording session {} failed: {}", session.id(), e);
                self.deps.notifier.signal(NotifyKind::Error);
                self.release_session(&session);
                return ReleaseOutcome::CaptureFailed;
            }
        };

        info!(
            "Session {} captured {:.1}s of audio",
            session.id(),
            session.started_at().elapsed().as_secs_f32()
        );

        self.shutdown.pipeline_started();
        let job = Job {
            state: self.state.clone(),
            shutdown: self.shutdown.clone(),
            pipeline: self.pipeline.clone(),
            deps: self.deps.clone(),
            session: session.clone(),
            audio,
        };

        match thread::Builder::new()
            .name("redictum-pipeline".into())
            .spawn(move || job.run())
        {
            Ok(handle) => {
                *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
                ReleaseOutcome::Dispatched(session)
            }
            Err(e) => {
                error!("Failed to spawn pipeline worker: {}", e);
                self.shutdown.pipeline_finished();
                self.deps.notifier.signal(NotifyKind::Error);
                self.release_session(&session);
                ReleaseOutcome::CaptureFailed
            }
        }
    }

    fn release_session(&self, session: &RecordingHandle) {
        if let Err(e) = self.state.finish_processing() {
            debug!("Session {} not returned to idle: {}", session.id(), e);
        }
    }

    /// Latch shutdown and settle whatever session is active.
    ///
    /// Blocks for up to `grace` while a pipeline is processing.
    pub fn shutdown(&self, grace: Duration) -> ShutdownOutcome {
        let transition = self.state.begin_shutdown();

        let outcome = match transition.previous {
            Mode::Recording | Mode::TranslateRecording => {
                if let Some(session) = &transition.interrupted {
                    info!("Discarding recording session {}", session.id());
                    self.deps.recorder.cancel(session);
                }
                self.deps.volume.restore();
                ShutdownOutcome::RecordingDiscarded
            }
            Mode::Processing => {
                info!("Waiting up to {:?} for the pipeline to finish", grace);
                if self.shutdown.await_completion(grace) {
                    ShutdownOutcome::PipelineCompleted
                } else {
                    warn!("Pipeline still running after {:?}; abandoning it", grace);
                    self.shutdown.abandon();
                    if !self.shutdown.await_completion(ABANDON_SETTLE) {
                        warn!("Pipeline did not stop after its tools were killed");
                    }
                    ShutdownOutcome::PipelineAbandoned
                }
            }
            Mode::Idle | Mode::ShuttingDown => ShutdownOutcome::WasIdle,
        };

        if !self.shutdown.pipeline_in_flight() {
            self.join_worker(JOIN_TIMEOUT);
        }

        info!("Session shutdown: {:?}", outcome);
        outcome
    }

    /// Join the last worker if it exits within `timeout`.
    fn join_worker(&self, timeout: Duration) {
        let Some(handle) = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!("Pipeline worker still running after {:?}; leaving it", timeout);
                return;
            }
            thread::sleep(JOIN_POLL);
        }
        if handle.join().is_err() {
            warn!("Pipeline worker panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::TranscribeMode;
    use std::sync::Barrier;
    use testing::{Call, Fakes};

    fn orchestrator(fakes: &Fakes) -> Orchestrator {
        Orchestrator::new(
            Arc::new(SessionState::new()),
            Arc::new(ShutdownCoordinator::new()),
            fakes.collaborators(),
            PipelineSettings {
                restore_delay: Duration::from_millis(5),
                ..PipelineSettings::default()
            },
        )
    }

    fn wait_for_idle(orch: &Orchestrator) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while orch.state().mode() != Mode::Idle || orch.shutdown.pipeline_in_flight() {
            assert!(Instant::now() < deadline, "session never returned to idle");
            thread::sleep(Duration::from_millis(5));
        }
    }

    // ===================
    // Hold Tests
    // ===================

    #[test]
    fn test_hold_starts_capture_and_ducks_volume() {
        let fakes = Fakes::new();
        let orch = orchestrator(&fakes);

        let outcome = orch.on_hold(false);
        let HoldOutcome::Started(session) = outcome else {
            panic!("expected Started, got {:?}", outcome);
        };
        assert_eq!(orch.state().mode(), Mode::Recording);
        assert_eq!(
            fakes.calls(),
            vec![
                Call::RecorderStart(session.id()),
                Call::Notify(NotifyKind::Start),
                Call::VolumeReduce,
            ]
        );
    }

    #[test]
    fn test_hold_while_recording_is_busy() {
        let fakes = Fakes::new();
        let orch = orchestrator(&fakes);
        orch.on_hold(false);

        assert_eq!(orch.on_hold(true), HoldOutcome::Busy(Mode::Recording));
        assert_eq!(
            fakes
                .calls()
                .iter()
                .filter(|c| matches!(c, Call::RecorderStart(_)))
                .count(),
            1
        );
    }

    #[test]
    fn test_capture_start_failure_returns_to_idle() {
        let fakes = Fakes::new();
        fakes.fail_start();
        let orch = orchestrator(&fakes);

        assert_eq!(orch.on_hold(false), HoldOutcome::CaptureFailed);
        assert_eq!(orch.state().mode(), Mode::Idle);
        assert!(orch.state().active().is_none());
        assert_eq!(fakes.count(&Call::Notify(NotifyKind::Error)), 1);
        assert_eq!(fakes.count(&Call::VolumeReduce), 0);
    }

    #[test]
    fn test_concurrent_holds_start_one_capture() {
        let fakes = Fakes::new();
        let orch = Arc::new(orchestrator(&fakes));
        let barrier = Arc::new(Barrier::new(5));

        let threads: Vec<_> = (0..5)
            .map(|_| {
                let orch = orch.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    orch.on_hold(false)
                })
            })
            .collect();

        let started = threads
            .into_iter()
            .map(|t| t.join().unwrap())
            .filter(|o| matches!(o, HoldOutcome::Started(_)))
            .count();
        assert_eq!(started, 1);
        assert_eq!(
            fakes
                .calls()
                .iter()
                .filter(|c| matches!(c, Call::RecorderStart(_)))
                .count(),
            1
        );
    }

    // ===================
    // Release Tests
    // ===================

    #[test]
    fn test_release_without_session_is_ignored() {
        let fakes = Fakes::new();
        let orch = orchestrator(&fakes);

        assert_eq!(orch.on_release(), ReleaseOutcome::Ignored);
        assert!(fakes.calls().is_empty());
        assert_eq!(orch.state().mode(), Mode::Idle);
    }

    #[test]
    fn test_full_session_returns_to_idle() {
        let fakes = Fakes::new();
        fakes.set_transcript("dictated");
        let orch = orchestrator(&fakes);

        orch.on_hold(false);
        assert!(matches!(orch.on_release(), ReleaseOutcome::Dispatched(_)));
        wait_for_idle(&orch);

        let calls = fakes.calls();
        assert!(calls.contains(&Call::VolumeRestore));
        assert!(calls.contains(&Call::Transcribe(TranscribeMode::Transcribe)));
        assert!(calls.contains(&Call::ClipboardWrite("dictated ".into())));
        assert!(calls.contains(&Call::Notify(NotifyKind::Done)));
        assert!(calls.contains(&Call::Rotate));
    }

    #[test]
    fn test_translate_session_uses_translate_mode() {
        let fakes = Fakes::new();
        let orch = orchestrator(&fakes);

        orch.on_hold(true);
        assert_eq!(orch.state().mode(), Mode::TranslateRecording);
        orch.on_release();
        wait_for_idle(&orch);

        assert!(fakes
            .calls()
            .contains(&Call::Transcribe(TranscribeMode::Translate)));
    }

    #[test]
    fn test_silent_session_notifies_done_without_transcribing() {
        let fakes = Fakes::new();
        fakes.set_speech(false);
        let orch = orchestrator(&fakes);

        orch.on_hold(false);
        orch.on_release();
        wait_for_idle(&orch);

        let calls = fakes.calls();
        assert!(!calls.iter().any(|c| matches!(c, Call::Transcribe(_))));
        assert!(!calls.contains(&Call::Paste));
        assert!(calls.contains(&Call::Notify(NotifyKind::Done)));
    }

    #[test]
    fn test_stage_failure_notifies_error_and_returns_to_idle() {
        let fakes = Fakes::new();
        fakes.fail_transcribe();
        let orch = orchestrator(&fakes);

        orch.on_hold(false);
        orch.on_release();
        wait_for_idle(&orch);

        let calls = fakes.calls();
        assert!(calls.contains(&Call::Notify(NotifyKind::Error)));
        assert!(!calls.contains(&Call::Notify(NotifyKind::Done)));
        assert!(!calls.contains(&Call::Paste));
    }

    #[test]
    fn test_worker_panic_returns_to_idle() {
        let fakes = Fakes::new();
        fakes.panic_transcribe();
        let orch = orchestrator(&fakes);

        orch.on_hold(false);
        orch.on_release();
        wait_for_idle(&orch);

        assert!(fakes.calls().contains(&Call::Notify(NotifyKind::Error)));
        assert!(fakes.calls().contains(&Call::Rotate));
    }

    #[test]
    fn test_capture_stop_failure_returns_to_idle() {
        let fakes = Fakes::new();
        fakes.fail_stop();
        let orch = orchestrator(&fakes);

        orch.on_hold(false);
        assert_eq!(orch.on_release(), ReleaseOutcome::CaptureFailed);
        assert_eq!(orch.state().mode(), Mode::Idle);
        assert!(fakes.calls().contains(&Call::VolumeRestore));
        assert!(!fakes.calls().contains(&Call::Normalize));
    }

    #[test]
    fn test_second_session_after_first() {
        let fakes = Fakes::new();
        let orch = orchestrator(&fakes);

        orch.on_hold(false);
        orch.on_release();
        wait_for_idle(&orch);

        assert!(matches!(orch.on_hold(false), HoldOutcome::Started(_)));
    }

    #[test]
    fn test_completion_is_signalled_before_idle() {
        let fakes = Fakes::new();
        let orch = orchestrator(&fakes);

        for _ in 0..50 {
            orch.on_hold(false);
            orch.on_release();

            let deadline = Instant::now() + Duration::from_secs(5);
            while orch.state().mode() != Mode::Idle {
                assert!(Instant::now() < deadline, "session never returned to idle");
                thread::yield_now();
            }
            assert!(!orch.shutdown.pipeline_in_flight());
        }
    }

    // ===================
    // Shutdown Tests
    // ===================

    #[test]
    fn test_shutdown_while_idle() {
        let fakes = Fakes::new();
        let orch = orchestrator(&fakes);
        assert_eq!(orch.shutdown(Duration::from_secs(1)), ShutdownOutcome::WasIdle);
        assert_eq!(orch.state().mode(), Mode::ShuttingDown);
    }

    #[test]
    fn test_shutdown_while_recording_cancels_capture() {
        let fakes = Fakes::new();
        let orch = orchestrator(&fakes);
        let HoldOutcome::Started(session) = orch.on_hold(false) else {
            panic!("hold did not start");
        };

        assert_eq!(
            orch.shutdown(Duration::from_secs(1)),
            ShutdownOutcome::RecordingDiscarded
        );
        let calls = fakes.calls();
        assert!(calls.contains(&Call::RecorderCancel(session.id())));
        assert!(calls.contains(&Call::VolumeRestore));
        assert!(!calls.iter().any(|c| matches!(c, Call::Transcribe(_))));
        assert!(orch.state().active().is_none());
    }

    #[test]
    fn test_shutdown_waits_for_pipeline() {
        let fakes = Fakes::new();
        fakes.set_transcribe_delay(Duration::from_millis(100));
        let orch = orchestrator(&fakes);

        orch.on_hold(false);
        orch.on_release();

        assert_eq!(
            orch.shutdown(Duration::from_secs(5)),
            ShutdownOutcome::PipelineCompleted
        );
        assert!(fakes.calls().contains(&Call::Notify(NotifyKind::Done)));
        assert_eq!(orch.state().mode(), Mode::ShuttingDown);
    }

    #[test]
    fn test_shutdown_abandons_slow_pipeline() {
        let fakes = Fakes::new();
        fakes.set_transcribe_delay(Duration::from_secs(2));
        let orch = orchestrator(&fakes);

        orch.on_hold(false);
        orch.on_release();

        let started = Instant::now();
        assert_eq!(
            orch.shutdown(Duration::from_millis(50)),
            ShutdownOutcome::PipelineAbandoned
        );
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(orch.shutdown.abort_signal().is_raised());
    }

    #[test]
    fn test_shutdown_after_back_to_back_sessions_honours_grace() {
        let fakes = Fakes::new();
        let orch = orchestrator(&fakes);

        orch.on_hold(false);
        orch.on_release();
        let deadline = Instant::now() + Duration::from_secs(5);
        while orch.state().mode() != Mode::Idle {
            assert!(Instant::now() < deadline, "first session never returned to idle");
            thread::yield_now();
        }

        fakes.set_transcribe_delay(Duration::from_secs(3));
        assert!(matches!(orch.on_hold(false), HoldOutcome::Started(_)));
        assert!(matches!(orch.on_release(), ReleaseOutcome::Dispatched(_)));
        assert!(orch.shutdown.pipeline_in_flight());

        let started = Instant::now();
        assert_eq!(
            orch.shutdown(Duration::from_millis(100)),
            ShutdownOutcome::PipelineAbandoned
        );
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_hold_after_shutdown_is_busy() {
        let fakes = Fakes::new();
        let orch = orchestrator(&fakes);
        orch.shutdown(Duration::from_millis(10));

        assert_eq!(orch.on_hold(false), HoldOutcome::Busy(Mode::ShuttingDown));
        assert_eq!(orch.on_release(), ReleaseOutcome::Ignored);
        assert!(fakes.calls().is_empty());
    }
}

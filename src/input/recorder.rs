//! Audio capture through `arecord`.
//!
//! Each session records 16 kHz mono 16-bit WAV into its own file under the
//! audio directory. Stopping sends SIGTERM so arecord finalizes the WAV
//! header; a recorder that ignores it is killed after a bounded wait.

use crate::platform::{AudioCapture, AudioFile, StageError};
use crate::process::{block_on_tools, find_program};
use crate::session::RecordingHandle;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Size of a canonical WAV header; anything this small holds no samples
const WAV_HEADER_LEN: u64 = 44;

/// How long arecord gets to fail on a bad device before start returns
const STARTUP_PROBE: Duration = Duration::from_millis(50);

/// How long arecord gets to flush after SIGTERM
const STOP_TIMEOUT: Duration = Duration::from_secs(3);

struct ActiveCapture {
    session_id: u64,
    child: Child,
    path: PathBuf,
}

pub struct ArecordRecorder {
    device: String,
    audio_dir: PathBuf,
    active: Mutex<Option<ActiveCapture>>,
}

impl ArecordRecorder {
    pub fn new(device: impl Into<String>, audio_dir: impl Into<PathBuf>) -> Self {
        Self {
            device: device.into(),
            audio_dir: audio_dir.into(),
            active: Mutex::new(None),
        }
    }

    fn active(&self) -> MutexGuard<'_, Option<ActiveCapture>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn file_for(&self, session: &RecordingHandle) -> PathBuf {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        self.audio_dir
            .join(format!("rec_{}_{:04}.wav", stamp, session.id()))
    }

    fn command(&self, path: &Path) -> Command {
        let mut cmd = Command::new("arecord");
        cmd.args(["-q", "-D", &self.device])
            .args(["-f", "S16_LE", "-r", "16000", "-c", "1", "-t", "wav"])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    /// Take the capture belonging to `session`, leaving others in place.
    fn take(&self, session: &RecordingHandle) -> Option<ActiveCapture> {
        let mut active = self.active();
        match active.as_ref() {
            Some(capture) if capture.session_id == session.id() => active.take(),
            Some(capture) => {
                warn!(
                    "Capture belongs to session {}, not {}",
                    capture.session_id,
                    session.id()
                );
                None
            }
            None => None,
        }
    }
}

/// Launch arecord and give it a moment to fail on a bad device.
async fn launch(mut cmd: Command) -> Result<Child, String> {
    let mut child = cmd
        .spawn()
        .map_err(|e| format!("failed to launch arecord: {}", e))?;

    tokio::time::sleep(STARTUP_PROBE).await;
    match child.try_wait() {
        Ok(Some(status)) => Err(format!("arecord exited right after start ({})", status)),
        Ok(None) => Ok(child),
        Err(e) => Err(format!("cannot query arecord: {}", e)),
    }
}

/// SIGTERM, bounded wait, then SIGKILL.
async fn terminate(mut child: Child) {
    if let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) {
        if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
            debug!("SIGTERM to arecord failed: {}", e);
        }
    }

    match tokio::time::timeout(STOP_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) => debug!("arecord exited: {}", status),
        Ok(Err(e)) => {
            warn!("Failed waiting for arecord: {}", e);
            let _ = child.kill().await;
        }
        Err(_elapsed) => {
            warn!("arecord ignored SIGTERM; killing it");
            let _ = child.kill().await;
        }
    }
}

fn terminate_blocking(child: Child) {
    if let Err(e) = block_on_tools(terminate(child)) {
        warn!("Could not stop arecord: {}", e);
    }
}

impl AudioCapture for ArecordRecorder {
    fn start(&self, session: &RecordingHandle) -> Result<(), StageError> {
        let mut active = self.active();
        if let Some(capture) = active.as_ref() {
            return Err(StageError::Capture(format!(
                "session {} is still capturing",
                capture.session_id
            )));
        }

        fs::create_dir_all(&self.audio_dir).map_err(|e| {
            StageError::Capture(format!("cannot create {}: {}", self.audio_dir.display(), e))
        })?;

        let path = self.file_for(session);
        let launched = block_on_tools(launch(self.command(&path)))
            .map_err(|e| StageError::Capture(e.to_string()))?;
        let child = match launched {
            Ok(child) => child,
            Err(reason) => {
                let _ = fs::remove_file(&path);
                return Err(StageError::Capture(format!(
                    "{}; check audio device '{}'",
                    reason, self.device
                )));
            }
        };

        info!("Recording to {}", path.display());
        *active = Some(ActiveCapture {
            session_id: session.id(),
            child,
            path,
        });
        Ok(())
    }

    fn stop(&self, session: &RecordingHandle) -> Result<AudioFile, StageError> {
        let capture = self.take(session).ok_or_else(|| {
            StageError::Capture(format!("no capture running for session {}", session.id()))
        })?;

        terminate_blocking(capture.child);

        let size = fs::metadata(&capture.path).map(|m| m.len()).unwrap_or(0);
        if size <= WAV_HEADER_LEN {
            let _ = fs::remove_file(&capture.path);
            return Err(StageError::Capture("no audio captured".into()));
        }

        debug!("Captured {} bytes", size);
        Ok(AudioFile::new(capture.path))
    }

    fn cancel(&self, session: &RecordingHandle) {
        let Some(capture) = self.take(session) else {
            return;
        };

        terminate_blocking(capture.child);
        if let Err(e) = fs::remove_file(&capture.path) {
            debug!("Could not remove {}: {}", capture.path.display(), e);
        }
        info!("Recording for session {} discarded", session.id());
    }
}

/// Whether arecord can be launched at all
pub fn arecord_available() -> bool {
    find_program("arecord").is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;
    use tempfile::TempDir;

    #[test]
    fn test_stop_without_start_is_capture_error() {
        let dir = TempDir::new().unwrap();
        let recorder = ArecordRecorder::new("default", dir.path());
        let session = SessionState::new().try_begin_recording(false).unwrap();

        let err = recorder.stop(&session).unwrap_err();
        assert!(matches!(err, StageError::Capture(_)));
    }

    #[test]
    fn test_cancel_without_start_is_noop() {
        let dir = TempDir::new().unwrap();
        let recorder = ArecordRecorder::new("default", dir.path());
        let session = SessionState::new().try_begin_recording(false).unwrap();
        recorder.cancel(&session);
    }

    #[test]
    fn test_file_name_carries_session_id() {
        let recorder = ArecordRecorder::new("default", "/tmp/audio");
        let session = SessionState::new().try_begin_recording(false).unwrap();
        let path = recorder.file_for(&session);

        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("rec_"));
        assert!(name.ends_with("_0001.wav"));
        assert_eq!(path.parent(), Some(Path::new("/tmp/audio")));
    }

    #[test]
    fn test_command_arguments() {
        let recorder = ArecordRecorder::new("hw:1,0", "/tmp/audio");
        let cmd = recorder.command(Path::new("/tmp/audio/x.wav"));
        let args: Vec<_> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "-q", "-D", "hw:1,0", "-f", "S16_LE", "-r", "16000", "-c", "1", "-t", "wav",
                "/tmp/audio/x.wav"
            ]
        );
    }

    #[tokio::test]
    async fn test_launch_reports_immediate_exit() {
        let err = launch(Command::new("false")).await.unwrap_err();
        assert!(err.contains("exited right after start"));
    }

    #[tokio::test]
    async fn test_terminate_stops_running_child() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30").kill_on_drop(true);
        let child = launch(cmd).await.unwrap();

        let started = std::time::Instant::now();
        terminate(child).await;
        assert!(started.elapsed() < STOP_TIMEOUT);
    }

    #[test]
    fn test_cancel_stops_capture_and_deletes_file() {
        let dir = TempDir::new().unwrap();
        let recorder = ArecordRecorder::new("default", dir.path());
        let session = SessionState::new().try_begin_recording(false).unwrap();

        let path = dir.path().join("partial.wav");
        fs::write(&path, b"RIFF").unwrap();
        let mut cmd = Command::new("sleep");
        cmd.arg("30").kill_on_drop(true);
        let child = block_on_tools(launch(cmd)).unwrap().unwrap();
        *recorder.active() = Some(ActiveCapture {
            session_id: session.id(),
            child,
            path: path.clone(),
        });

        recorder.cancel(&session);
        assert!(!path.exists());
        assert!(recorder.active().is_none());
    }
}

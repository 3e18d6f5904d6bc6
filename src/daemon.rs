//! Daemon commands and the daemon's own run loop.
//!
//! `start` checks setup, detaches (unless `--foreground`), then runs the
//! daemon on a current-thread tokio runtime:
//! 1. install SIGTERM/SIGINT handlers that trip the shutdown latch
//! 2. take the PID lock
//! 3. start the hotkey listener and report readiness to the launcher
//! 4. dispatch hotkey events until shutdown
//! 5. wind down the active session and release the lock
//!
//! `stop`, `status` and `init` operate on the lock file and setup marker
//! from a short-lived CLI process.

use crate::config::{Config, ConfigError, DaemonConfig, Paths};
use crate::engine::{FfmpegProcessor, WhisperCli};
use crate::feedback::{FeedbackNotifier, FixedVolume, PactlVolume};
use crate::housekeeping::Housekeeper;
use crate::input::{ArecordRecorder, HotkeyEvent, HotkeyListener, HotkeyListenerError};
use crate::lifecycle::{
    detach, process_alive, restrict_umask, DetachError, Detached, LockError, LockGuard,
    LockStatus, PidLock, Readiness,
};
use crate::logging::{self, Verbosity};
use crate::output::SystemClipboard;
use crate::pipeline::{
    run_event_loop, Collaborators, Orchestrator, PipelineSettings, ShutdownOutcome,
};
use crate::platform::VolumeControl;
use crate::process::find_program;
use crate::session::{SessionState, ShutdownCoordinator};
use crate::setup::{self, SetupError};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Detach(#[from] DetachError),

    #[error("Hotkey error: {0}")]
    Hotkey(#[from] HotkeyListenerError),

    #[error("Setup error: {0}")]
    Setup(#[from] SetupError),

    #[error("Setup has not been completed; run `redictum init` first")]
    NotInitialized,

    #[error("Daemon (PID {pid}) did not exit within {timeout:?}")]
    StopTimeout { pid: u32, timeout: Duration },

    #[error("Failed to signal PID {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: nix::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl DaemonError {
    /// Process exit status for this failure
    pub fn exit_code(&self) -> u8 {
        match self {
            DaemonError::Lock(LockError::AlreadyRunning(_))
            | DaemonError::Detach(DetachError::Lock(LockError::AlreadyRunning(_))) => 3,
            DaemonError::NotInitialized => 4,
            DaemonError::StopTimeout { .. } => 5,
            _ => 1,
        }
    }
}

/// Start the daemon
pub fn start(foreground: bool, verbosity: Verbosity) -> Result<(), DaemonError> {
    let paths = Paths::resolve()?;
    let config = Config::load()?;

    if !setup::is_initialized(&paths) {
        return Err(DaemonError::NotInitialized);
    }

    let lock = PidLock::new(&paths.pid_file);

    if foreground {
        lock.ensure_not_running()?;
        restrict_umask();
        logging::init_stderr(verbosity, &config.logging.level);
        return run_daemon(&config, &paths, &lock, Readiness::none());
    }

    match detach(&lock, &paths.daemon_log())? {
        Detached::Launcher { daemon_pid } => {
            println!("Redictum started (PID {})", daemon_pid);
            println!("Log: {}", paths.daemon_log().display());
            Ok(())
        }
        Detached::Daemon(readiness) => {
            let _log_guard =
                logging::init_file(verbosity, &config.logging.level, &paths.daemon_log())?;
            run_daemon(&config, &paths, &lock, readiness)
        }
    }
}

/// Run the daemon in the current process until shutdown.
///
/// The runtime is built here, after any fork.
pub fn run_daemon(
    config: &Config,
    paths: &Paths,
    lock: &PidLock,
    readiness: Readiness,
) -> Result<(), DaemonError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(serve(config, paths, lock, readiness))
}

async fn serve(
    config: &Config,
    paths: &Paths,
    lock: &PidLock,
    readiness: Readiness,
) -> Result<(), DaemonError> {
    let shutdown = Arc::new(ShutdownCoordinator::new());
    watch_signals(shutdown.clone())?;

    let (listener, mut events) = HotkeyListener::new(&config.hotkey)?;

    let pid = match lock.acquire() {
        Ok(pid) => pid,
        Err(LockError::AlreadyRunning(holder)) => {
            readiness.refuse(holder);
            return Err(LockError::AlreadyRunning(holder).into());
        }
        Err(e) => return Err(e.into()),
    };
    let lock_guard = LockGuard::new(lock);
    let deps = build_collaborators(config, paths, &shutdown);

    listener.start()?;
    readiness.notify(pid);
    info!(
        "Redictum running (PID {}). Hold {} to dictate{}",
        pid,
        config.hotkey.key,
        if config.hotkey.translate_modifier.is_empty() {
            String::new()
        } else {
            format!(", {}+{} to translate", config.hotkey.translate_modifier, config.hotkey.key)
        }
    );

    match dispatch_until_shutdown(lock_guard, shutdown, deps, config, &mut events).await {
        Some(outcome) => info!("Shutdown complete ({:?})", outcome),
        None => error!("Shutdown did not complete cleanly"),
    }

    Ok(())
}

/// Dispatch hotkey events until shutdown, wind down the active session,
/// then release the lock.
///
/// `None` if the wind-down task itself failed.
async fn dispatch_until_shutdown(
    lock_guard: LockGuard<'_>,
    shutdown: Arc<ShutdownCoordinator>,
    deps: Collaborators,
    config: &Config,
    events: &mut mpsc::Receiver<HotkeyEvent>,
) -> Option<ShutdownOutcome> {
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(SessionState::new()),
        shutdown.clone(),
        deps,
        PipelineSettings::from_config(config),
    ));

    run_event_loop(&orchestrator, &shutdown, events, config.hotkey.hold_delay()).await;

    let grace = config.daemon.shutdown_grace();
    let winding_down = orchestrator.clone();
    let outcome = match tokio::task::spawn_blocking(move || winding_down.shutdown(grace)).await {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            error!("Shutdown task failed: {}", e);
            None
        }
    };

    drop(lock_guard);
    outcome
}

/// Forward SIGTERM and SIGINT to the shutdown latch.
fn watch_signals(shutdown: Arc<ShutdownCoordinator>) -> io::Result<()> {
    let mut term = signal(SignalKind::terminate())?;
    let mut int = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        loop {
            let name = tokio::select! {
                _ = term.recv() => "SIGTERM",
                _ = int.recv() => "SIGINT",
            };
            if shutdown.request() {
                info!("{} received, shutting down", name);
            } else {
                debug!("{} received again; shutdown already in progress", name);
            }
        }
    });

    Ok(())
}

fn build_collaborators(
    config: &Config,
    paths: &Paths,
    shutdown: &ShutdownCoordinator,
) -> Collaborators {
    let abort = shutdown.abort_signal();

    let volume: Arc<dyn VolumeControl> =
        if config.audio.volume_reduce && find_program("pactl").is_some() {
            Arc::new(PactlVolume::new(config.audio.volume_level))
        } else {
            Arc::new(FixedVolume)
        };

    Collaborators {
        recorder: Arc::new(ArecordRecorder::new(
            config.audio.device.clone(),
            paths.audio_dir(),
        )),
        processor: Arc::new(FfmpegProcessor::new(
            config.audio.silence_threshold,
            config.daemon.stage_timeout(),
            abort.clone(),
        )),
        transcriber: Arc::new(WhisperCli::new(&config.transcription, abort)),
        clipboard: Arc::new(SystemClipboard::new()),
        notifier: Arc::new(FeedbackNotifier::new(&config.feedback, paths.sounds_dir())),
        volume,
        archive: Arc::new(Housekeeper::new(paths, &config.housekeeping)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    StaleRemoved(u32),
    Stopped(u32),
}

/// Send SIGTERM to the lock holder and wait for it to exit.
pub fn stop_daemon(lock: &PidLock, timeout: Duration) -> Result<StopOutcome, DaemonError> {
    let pid = match lock.status() {
        LockStatus::Free => return Ok(StopOutcome::NotRunning),
        LockStatus::Stale(pid) => {
            lock.remove_stale(pid)?;
            return Ok(StopOutcome::StaleRemoved(pid));
        }
        LockStatus::Held(pid) => pid,
    };

    let target = i32::try_from(pid).map_err(|_| DaemonError::Signal {
        pid,
        source: nix::Error::EINVAL,
    })?;
    match kill(Pid::from_raw(target), Signal::SIGTERM) {
        Ok(()) => info!("Sent SIGTERM to daemon (PID {})", pid),
        Err(nix::Error::ESRCH) => debug!("PID {} exited before SIGTERM", pid),
        Err(source) => return Err(DaemonError::Signal { pid, source }),
    }

    let deadline = Instant::now() + timeout;
    while process_alive(pid) {
        if Instant::now() >= deadline {
            return Err(DaemonError::StopTimeout { pid, timeout });
        }
        thread::sleep(STOP_POLL_INTERVAL);
    }

    // A daemon that died without cleaning up leaves its lock behind
    lock.remove_stale(pid)?;
    Ok(StopOutcome::Stopped(pid))
}

/// Stop the running daemon
pub fn stop() -> Result<(), DaemonError> {
    let paths = Paths::resolve()?;
    let timeout = Config::load()
        .map(|c| c.daemon.stop_timeout())
        .unwrap_or_else(|e| {
            warn!("Using default stop timeout ({})", e);
            DaemonConfig::default().stop_timeout()
        });

    match stop_daemon(&PidLock::new(&paths.pid_file), timeout)? {
        StopOutcome::NotRunning => println!("Redictum is not running"),
        StopOutcome::StaleRemoved(pid) => {
            println!("Redictum is not running (removed stale lock for PID {})", pid)
        }
        StopOutcome::Stopped(pid) => println!("Redictum stopped (PID {})", pid),
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonStatus {
    Running(u32),
    NotRunning { cleared_stale: Option<u32> },
}

/// Inspect the lock, clearing it if its holder is gone.
pub fn daemon_status(lock: &PidLock) -> Result<DaemonStatus, DaemonError> {
    Ok(match lock.status() {
        LockStatus::Held(pid) => DaemonStatus::Running(pid),
        LockStatus::Stale(pid) => {
            lock.remove_stale(pid)?;
            DaemonStatus::NotRunning {
                cleared_stale: Some(pid),
            }
        }
        LockStatus::Free => DaemonStatus::NotRunning {
            cleared_stale: None,
        },
    })
}

/// Check daemon status
pub fn status() -> Result<(), DaemonError> {
    let paths = Paths::resolve()?;

    match daemon_status(&PidLock::new(&paths.pid_file))? {
        DaemonStatus::Running(pid) => println!("Redictum is running (PID {})", pid),
        DaemonStatus::NotRunning {
            cleared_stale: Some(pid),
        } => println!("Redictum is not running (removed stale lock for PID {})", pid),
        DaemonStatus::NotRunning {
            cleared_stale: None,
        } => println!("Redictum is not running"),
    }
    Ok(())
}

/// Diagnose dependencies and record setup
pub fn init() -> Result<(), DaemonError> {
    let paths = Paths::resolve()?;
    let config = Config::load()?;

    println!("Checking dependencies:");
    let checks = setup::diagnose(&config);
    for check in &checks {
        println!("  {}", check);
    }

    setup::complete(&checks, &paths)?;
    println!("\nSetup complete. Start dictating with `redictum start`.");
    Ok(())
}

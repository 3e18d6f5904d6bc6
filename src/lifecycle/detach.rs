//! Detaching the daemon from the launching terminal.
//!
//! Double fork with `setsid` in between, so the daemon is reparented to init
//! and can never reacquire a controlling terminal. The launching process
//! blocks on a readiness pipe until the daemon holds the lock (PID written)
//! or dies during setup (EOF).

use super::lock::{LockError, PidLock};
use nix::fcntl::OFlag;
use nix::sys::stat::{umask, Mode};
use nix::sys::wait::waitpid;
use nix::unistd::{chdir, dup2, fork, pipe2, setsid, ForkResult};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File creation mask applied in the daemon
const DAEMON_UMASK: u32 = 0o022;

/// Readiness reply sent when the lock was lost to a concurrent start
const BUSY_PREFIX: &str = "busy ";

#[derive(Error, Debug)]
pub enum DetachError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("{step} failed: {source}")]
    Sys {
        step: &'static str,
        #[source]
        source: nix::Error,
    },

    #[error("Cannot open daemon log {}: {source}", path.display())]
    Log {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Daemon exited during startup; see {}", log.display())]
    DaemonFailed { log: PathBuf },
}

fn sys(step: &'static str) -> impl FnOnce(nix::Error) -> DetachError {
    move |source| DetachError::Sys { step, source }
}

/// Which side of the fork the caller is on
#[derive(Debug)]
pub enum Detached {
    /// The launching process; the daemon reported ready
    Launcher { daemon_pid: u32 },
    /// The detached daemon
    Daemon(Readiness),
}

/// Write end of the readiness pipe, held by the daemon until setup ends.
///
/// Dropping it without calling [`notify`](Self::notify) tells the launcher
/// that startup failed.
#[derive(Debug)]
pub struct Readiness {
    pipe: Option<File>,
}

impl Readiness {
    /// Placeholder for foreground mode, where nobody is waiting.
    pub fn none() -> Self {
        Self { pipe: None }
    }

    /// Report the daemon PID to the launcher.
    pub fn notify(mut self, pid: u32) {
        if let Some(mut pipe) = self.pipe.take() {
            // A launcher that already went away is not an error.
            let _ = writeln!(pipe, "{pid}");
        }
    }

    /// Tell the launcher another daemon won the lock.
    pub fn refuse(mut self, holder: u32) {
        if let Some(mut pipe) = self.pipe.take() {
            let _ = writeln!(pipe, "{BUSY_PREFIX}{holder}");
        }
    }
}

/// Detach into the background.
///
/// Steps in order: refuse if a live daemon holds the lock, fork, `setsid`,
/// fork again, point stdin at `/dev/null` and stdout/stderr at `log`, then
/// restrict the umask. Signal handlers and the lock are the caller's job
/// once it has a runtime, in that order, followed by
/// [`Readiness::notify`].
///
/// Must be called while the process is single-threaded.
pub fn detach(lock: &PidLock, log: &Path) -> Result<Detached, DetachError> {
    lock.ensure_not_running()?;

    let (read_end, write_end) = pipe2(OFlag::O_CLOEXEC).map_err(sys("pipe"))?;

    // SAFETY: no thread has been spawned yet, so the child cannot inherit a
    // lock held by another thread.
    match unsafe { fork() }.map_err(sys("fork"))? {
        ForkResult::Parent { child } => {
            drop(write_end);
            // The intermediate child exits right after the second fork.
            let _ = waitpid(child, None);
            return await_ready(read_end, log);
        }
        ForkResult::Child => {}
    }

    drop(read_end);
    if let Err(e) = setsid() {
        eprintln!("redictum: setsid failed: {e}");
        std::process::exit(1);
    }

    // SAFETY: still single-threaded.
    match unsafe { fork() } {
        Ok(ForkResult::Parent { .. }) => std::process::exit(0),
        Ok(ForkResult::Child) => {}
        Err(e) => {
            eprintln!("redictum: second fork failed: {e}");
            std::process::exit(1);
        }
    }

    redirect_stdio(log)?;
    restrict_umask();
    chdir("/").map_err(sys("chdir"))?;

    Ok(Detached::Daemon(Readiness {
        pipe: Some(File::from(write_end)),
    }))
}

/// Apply the daemon umask. Also used by `start --foreground`.
pub fn restrict_umask() {
    umask(Mode::from_bits_truncate(DAEMON_UMASK));
}

fn await_ready(read_end: OwnedFd, log: &Path) -> Result<Detached, DetachError> {
    let mut pipe = File::from(read_end);
    let mut reply = String::new();
    // EOF without a PID means the daemon died before signalling readiness.
    let _ = pipe.read_to_string(&mut reply);

    let reply = reply.trim();
    if let Some(holder) = reply.strip_prefix(BUSY_PREFIX).and_then(|p| p.parse().ok()) {
        return Err(LockError::AlreadyRunning(holder).into());
    }
    match reply.parse::<u32>() {
        Ok(daemon_pid) => Ok(Detached::Launcher { daemon_pid }),
        Err(_) => Err(DetachError::DaemonFailed {
            log: log.to_path_buf(),
        }),
    }
}

fn redirect_stdio(log: &Path) -> Result<(), DetachError> {
    let log_error = |source| DetachError::Log {
        path: log.to_path_buf(),
        source,
    };

    if let Some(parent) = log.parent() {
        fs::create_dir_all(parent).map_err(log_error)?;
    }

    let null = File::open("/dev/null").map_err(|source| DetachError::Log {
        path: PathBuf::from("/dev/null"),
        source,
    })?;
    let out = OpenOptions::new()
        .create(true)
        .append(true)
        .mode(0o600)
        .open(log)
        .map_err(log_error)?;

    dup2(null.as_raw_fd(), io::stdin().as_raw_fd()).map_err(sys("dup2 stdin"))?;
    dup2(out.as_raw_fd(), io::stdout().as_raw_fd()).map_err(sys("dup2 stdout"))?;
    dup2(out.as_raw_fd(), io::stderr().as_raw_fd()).map_err(sys("dup2 stderr"))?;

    Ok(())
}

//! PID lock file guaranteeing a single daemon instance.
//!
//! The file holds the decimal PID of the owner followed by a newline. It is
//! published with `link(2)`, which fails if the target exists, so a reader
//! never observes a half-written lock. Replacing a stale lock happens under an
//! exclusive `flock` on a sibling `.guard` file, so two starters that find the
//! same dead PID cannot both remove it and both win.

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::fs::{self, File, OpenOptions, Permissions};
use std::io::{self, ErrorKind, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Owner read/write, everyone else read-only
const LOCK_FILE_MODE: u32 = 0o644;

/// Distinguishes temp files of concurrent `acquire` calls within one process
static PUBLISH_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Error, Debug)]
pub enum LockError {
    #[error("redictum is already running (PID {0})")]
    AlreadyRunning(u32),

    #[error("Lock file error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Whether `pid` names a live process.
///
/// `EPERM` means the process exists but belongs to someone else, which
/// still counts as alive.
pub fn process_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }

    match kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(Errno::ESRCH) => false,
        Err(e) => {
            debug!("kill(0) on {} failed: {}", pid, e);
            false
        }
    }
}

/// What the lock file says about the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    /// No lock file, or one that holds no PID
    Free,
    /// The recorded process is alive
    Held(u32),
    /// The recorded process is gone
    Stale(u32),
}

/// PID lock file at a fixed path.
#[derive(Debug, Clone)]
pub struct PidLock {
    path: PathBuf,
}

impl PidLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> LockError {
        LockError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// PID recorded in the lock file.
    ///
    /// Missing, empty and unparsable files all read as `None`.
    pub fn read(&self) -> Option<u32> {
        fs::read_to_string(&self.path)
            .ok()?
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|pid| *pid > 0)
    }

    pub fn status(&self) -> LockStatus {
        match self.read() {
            None => LockStatus::Free,
            Some(pid) if process_alive(pid) => LockStatus::Held(pid),
            Some(pid) => LockStatus::Stale(pid),
        }
    }

    /// Fail with `AlreadyRunning` if a live process holds the lock.
    ///
    /// A stale file is removed on the way.
    pub fn ensure_not_running(&self) -> Result<(), LockError> {
        match self.status() {
            LockStatus::Held(pid) => Err(LockError::AlreadyRunning(pid)),
            LockStatus::Stale(pid) => {
                self.remove_stale(pid)?;
                Ok(())
            }
            LockStatus::Free => Ok(()),
        }
    }

    fn guard_path(&self) -> PathBuf {
        self.path.with_extension("pid.guard")
    }

    /// Exclusive hold on the guard file; every replacement of the lock file
    /// happens while one is alive.
    fn serialize(&self) -> Result<Flock<File>, LockError> {
        let guard = self.guard_path();
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .mode(LOCK_FILE_MODE)
            .open(&guard)
            .map_err(|e| self.io_error(e))?;

        Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| self.io_error(io::Error::from(errno)))
    }

    /// Remove the lock file if it still records the dead `pid`.
    ///
    /// Returns true if a file was removed.
    pub fn remove_stale(&self, pid: u32) -> Result<bool, LockError> {
        let _serial = self.serialize()?;
        if self.read() != Some(pid) || process_alive(pid) {
            return Ok(false);
        }

        warn!("Removing stale lock file (PID {} is gone)", pid);
        self.remove_file()
    }

    fn remove_file(&self) -> Result<bool, LockError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(self.io_error(e)),
        }
    }

    /// Claim the lock for the current process.
    ///
    /// A lock left behind by a dead process is replaced; a live holder
    /// yields `AlreadyRunning`.
    pub fn acquire(&self) -> Result<u32, LockError> {
        let pid = std::process::id();

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        let _serial = self.serialize()?;
        match self.publish(pid) {
            Ok(()) => return Ok(self.acquired(pid)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => return Err(self.io_error(e)),
        }

        match self.read() {
            Some(holder) if process_alive(holder) => {
                return Err(LockError::AlreadyRunning(holder));
            }
            Some(holder) => {
                warn!("Replacing stale lock file (PID {} is gone)", holder);
            }
            None => {
                warn!("Replacing unreadable lock file {}", self.path.display());
            }
        }
        self.remove_file()?;

        self.publish(pid).map_err(|e| self.io_error(e))?;
        Ok(self.acquired(pid))
    }

    fn acquired(&self, pid: u32) -> u32 {
        info!("Acquired lock {} (PID {})", self.path.display(), pid);
        pid
    }

    /// Write the PID to a private temp file and link it into place.
    fn publish(&self, pid: u32) -> io::Result<()> {
        let seq = PUBLISH_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = self.path.with_extension(format!("pid.{pid}.{seq}.tmp"));
        let _ = fs::remove_file(&tmp);

        let result = (|| {
            let mut file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(LOCK_FILE_MODE)
                .open(&tmp)?;
            // The process umask may have masked bits off the create mode.
            fs::set_permissions(&tmp, Permissions::from_mode(LOCK_FILE_MODE))?;
            writeln!(file, "{pid}")?;
            file.sync_all()?;
            fs::hard_link(&tmp, &self.path)
        })();

        let _ = fs::remove_file(&tmp);
        result
    }

    /// Remove the lock if, and only if, it records the current process.
    ///
    /// Safe to call any number of times. Returns true if a file was removed.
    pub fn release(&self) -> Result<bool, LockError> {
        let own = std::process::id();
        match self.read() {
            Some(pid) if pid == own => {
                let removed = self.remove_file()?;
                if removed {
                    info!("Released lock {}", self.path.display());
                }
                Ok(removed)
            }
            Some(pid) => {
                debug!("Lock held by PID {}, not ours ({}); leaving it", pid, own);
                Ok(false)
            }
            None => Ok(false),
        }
    }
}

/// Releases the lock when dropped.
pub struct LockGuard<'a> {
    lock: &'a PidLock,
}

impl<'a> LockGuard<'a> {
    pub fn new(lock: &'a PidLock) -> Self {
        Self { lock }
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.release() {
            warn!("Failed to release lock: {}", e);
        }
    }
}

//! Process lifecycle: single-instance lock and background detachment.

pub mod detach;
pub mod lock;

pub use detach::{detach, restrict_umask, Detached, DetachError, Readiness};
pub use lock::{process_alive, LockError, LockGuard, LockStatus, PidLock};

//! Redictum library exports for the binary, integration tests and fuzzing.

#[cfg(not(unix))]
compile_error!("redictum only supports Unix-like systems");

pub mod config;
pub mod daemon;
pub mod engine;
pub mod feedback;
pub mod housekeeping;
pub mod input;
pub mod lifecycle;
pub mod logging;
pub mod output;
pub mod panic_handler;
pub mod pipeline;
pub mod platform;
pub mod process;
pub mod session;
pub mod setup;

pub use config::{Config, Paths};
pub use daemon::DaemonError;
pub use lifecycle::{LockError, PidLock};
pub use session::{Mode, SessionState, ShutdownCoordinator};

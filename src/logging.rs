//! tracing subscriber setup.
//!
//! CLI commands and `start --foreground` log to stderr. The detached daemon
//! logs to a file through a non-blocking appender whose guard must be kept
//! alive until exit, or buffered lines are lost.

use std::io;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
}

impl Verbosity {
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        match (verbose, quiet) {
            (true, _) => Verbosity::Verbose,
            (false, true) => Verbosity::Quiet,
            (false, false) => Verbosity::Normal,
        }
    }
}

/// Filter directives for our own crate. `RUST_LOG` wins when set.
pub fn directives(verbosity: Verbosity, level: &str) -> String {
    match verbosity {
        Verbosity::Verbose => "redictum=debug".to_string(),
        Verbosity::Quiet => "redictum=warn".to_string(),
        Verbosity::Normal => format!("redictum={}", level.trim().to_lowercase()),
    }
}

fn filter(verbosity: Verbosity, level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives(verbosity, level)))
}

/// Log to stderr.
pub fn init_stderr(verbosity: Verbosity, level: &str) {
    let _ = tracing_subscriber::registry()
        .with(filter(verbosity, level))
        .with(fmt::layer().with_writer(io::stderr))
        .try_init();
}

/// Log to `path`, appending. Hold the returned guard for the life of the daemon.
pub fn init_file(verbosity: Verbosity, level: &str, path: &Path) -> io::Result<WorkerGuard> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "log path has no directory"))?;
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "log path has no file name"))?;
    std::fs::create_dir_all(dir)?;

    let appender = tracing_appender::rolling::never(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let _ = tracing_subscriber::registry()
        .with(filter(verbosity, level))
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .try_init();

    Ok(guard)
}

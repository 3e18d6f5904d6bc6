//! Bounded execution of external tools.
//!
//! Every helper the daemon shells out to (arecord, ffmpeg, whisper-cli,
//! pactl) runs as a `tokio::process` child under a deadline and can be
//! killed from another thread through an [`AbortSignal`], so a wedged tool
//! never outlives daemon shutdown.
//!
//! Callers are plain threads (the pipeline worker, the event loop's
//! synchronous collaborator calls), so the futures run on a small runtime
//! owned by this module. It is built on first use, which keeps it on the
//! daemon's side of the fork.

use std::ffi::OsStr;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Output, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::runtime::Runtime;
use tokio::sync::Notify;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum RunError {
    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("{program} was aborted")]
    Aborted { program: String },

    #[error("I/O error while running {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Default)]
struct AbortInner {
    raised: AtomicBool,
    wake: Notify,
}

/// Shared flag that asks running tools to be killed.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AbortInner>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.raised.store(true, Ordering::SeqCst);
        self.0.wake.notify_waiters();
    }

    pub fn is_raised(&self) -> bool {
        self.0.raised.load(Ordering::SeqCst)
    }

    /// Resolves once the signal is raised.
    pub async fn raised(&self) {
        let notified = self.0.wake.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.is_raised() {
            return;
        }
        notified.await;
    }
}

/// Output of a tool that ran to completion
#[derive(Debug)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl From<Output> for ToolOutput {
    fn from(output: Output) -> Self {
        Self {
            status: output.status,
            stdout: output.stdout,
            stderr: output.stderr,
        }
    }
}

impl ToolOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Last line of stderr, for error messages
    pub fn stderr_tail(&self) -> String {
        String::from_utf8_lossy(&self.stderr)
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .unwrap_or("")
            .trim()
            .to_string()
    }
}

fn program_name(cmd: &Command) -> String {
    cmd.as_std().get_program().to_string_lossy().into_owned()
}

/// Run `cmd` to completion with stdout and stderr captured.
///
/// The child is killed when the deadline passes or `abort` is raised.
pub async fn run_bounded(
    mut cmd: Command,
    timeout: Duration,
    abort: &AbortSignal,
) -> Result<ToolOutput, RunError> {
    let program = program_name(&cmd);
    if abort.is_raised() {
        return Err(RunError::Aborted { program });
    }

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(|source| RunError::Spawn {
        program: program.clone(),
        source,
    })?;
    debug!("Spawned {} (pid {:?})", program, child.id());

    // Dropping the output future drops the child, which kills it.
    tokio::select! {
        biased;

        () = abort.raised() => {
            warn!("Killing {}: aborted", program);
            Err(RunError::Aborted { program })
        }

        result = tokio::time::timeout(timeout, child.wait_with_output()) => match result {
            Ok(Ok(output)) => Ok(output.into()),
            Ok(Err(source)) => Err(RunError::Io { program, source }),
            Err(_elapsed) => {
                warn!("Killing {}: no result after {:?}", program, timeout);
                Err(RunError::Timeout { program, timeout })
            }
        },
    }
}

static TOOL_RUNTIME: OnceLock<io::Result<Runtime>> = OnceLock::new();

fn tool_runtime() -> io::Result<&'static Runtime> {
    TOOL_RUNTIME
        .get_or_init(|| {
            tokio::runtime::Builder::new_multi_thread()
                .worker_threads(1)
                .thread_name("redictum-tools")
                .enable_all()
                .build()
        })
        .as_ref()
        .map_err(|e| io::Error::new(e.kind(), e.to_string()))
}

/// Drive `future` on the tool runtime and block the calling thread for its
/// result.
///
/// Safe to call from inside another runtime's thread: the future is spawned,
/// not nested.
pub fn block_on_tools<F>(future: F) -> io::Result<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);
    tool_runtime()?.spawn(async move {
        let _ = tx.send(future.await);
    });
    rx.recv()
        .map_err(|_| io::Error::other("tool task ended without a result"))
}

/// Run `future` on the tool runtime without waiting for it.
pub fn spawn_on_tools<F>(future: F) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tool_runtime()?.spawn(future);
    Ok(())
}

/// Blocking form of [`run_bounded`].
pub fn run_blocking(
    cmd: Command,
    timeout: Duration,
    abort: &AbortSignal,
) -> Result<ToolOutput, RunError> {
    let program = program_name(&cmd);
    let abort = abort.clone();
    block_on_tools(async move { run_bounded(cmd, timeout, &abort).await })
        .map_err(|source| RunError::Io { program, source })?
}

/// Locate an executable on `PATH`, or accept an explicit path.
pub fn find_program(name: impl AsRef<OsStr>) -> Option<PathBuf> {
    let name = name.as_ref();
    let candidate = PathBuf::from(name);
    if candidate.components().count() > 1 {
        return is_executable(&candidate).then_some(candidate);
    }

    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|p| is_executable(p))
}

fn is_executable(path: &std::path::Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

//! Shutdown latch and pipeline completion tracking.

use crate::process::AbortSignal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info};

/// Coordinates a graceful stop between signal handlers, the event loop and
/// the pipeline worker.
///
/// `request` is safe to call from any context and any number of times. The
/// event loop waits on [`requested`](Self::requested); the shutdown sequence
/// waits on [`await_completion`](Self::await_completion) for an in-flight
/// pipeline.
pub struct ShutdownCoordinator {
    requested: AtomicBool,
    wake: Notify,
    in_flight: Mutex<usize>,
    done: Condvar,
    abort: AbortSignal,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            requested: AtomicBool::new(false),
            wake: Notify::new(),
            in_flight: Mutex::new(0),
            done: Condvar::new(),
            abort: AbortSignal::new(),
        }
    }

    /// Latch the shutdown request. Returns true on the first call.
    pub fn request(&self) -> bool {
        let first = !self.requested.swap(true, Ordering::SeqCst);
        if first {
            info!("Shutdown requested");
            self.wake.notify_waiters();
        }
        first
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Resolves once shutdown has been requested.
    pub async fn requested(&self) {
        let notified = self.wake.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.is_requested() {
            return;
        }
        notified.await;
    }

    fn count(&self) -> MutexGuard<'_, usize> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark a pipeline as in flight.
    pub fn pipeline_started(&self) {
        *self.count() += 1;
    }

    /// Mark one in-flight pipeline as finished and wake any waiter.
    pub fn pipeline_finished(&self) {
        let mut count = self.count();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.done.notify_all();
        }
        debug!("Pipeline completion signalled ({} still in flight)", *count);
    }

    pub fn pipeline_in_flight(&self) -> bool {
        *self.count() > 0
    }

    /// Block until no pipeline is in flight or `timeout` passes.
    ///
    /// Returns true when the pipeline completed (or none was running).
    pub fn await_completion(&self, timeout: Duration) -> bool {
        let guard = self.count();
        let (guard, _) = self
            .done
            .wait_timeout_while(guard, timeout, |in_flight| *in_flight > 0)
            .unwrap_or_else(PoisonError::into_inner);
        *guard == 0
    }

    /// Signal shared with every tool the pipeline launches
    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    /// Kill whatever tool the abandoned pipeline is still running.
    pub fn abandon(&self) {
        self.abort.raise();
    }
}

//! Hold-to-record debounce.
//!
//! A press only becomes a recording once the key has stayed down strictly
//! longer than the hold delay. Releasing earlier is a tap and does nothing.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingPress {
    translate: bool,
    pressed_at: Instant,
}

/// What a release means for the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseKind {
    /// Released before the hold delay elapsed; no session was started
    Tap,
    /// Released after a committed hold; the session should stop
    EndHold,
}

#[derive(Debug)]
pub struct HoldDebounce {
    hold_delay: Duration,
    pending: Option<PendingPress>,
}

impl HoldDebounce {
    pub fn new(hold_delay: Duration) -> Self {
        Self {
            hold_delay,
            pending: None,
        }
    }

    /// Arm the timer. A press while one is already pending is ignored.
    pub fn press(&mut self, translate: bool, now: Instant) -> bool {
        if self.pending.is_some() {
            return false;
        }
        self.pending = Some(PendingPress {
            translate,
            pressed_at: now,
        });
        true
    }

    pub fn release(&mut self) -> ReleaseKind {
        match self.pending.take() {
            Some(_) => ReleaseKind::Tap,
            None => ReleaseKind::EndHold,
        }
    }

    /// Earliest instant at which [`poll`](Self::poll) can commit.
    ///
    /// One millisecond past the delay, so a timer firing at the deadline
    /// always satisfies the strict comparison.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending
            .map(|p| p.pressed_at + self.hold_delay + Duration::from_millis(1))
    }

    /// Commit the pending press if it has been held long enough.
    ///
    /// Returns the translate flag of the committed press.
    pub fn poll(&mut self, now: Instant) -> Option<bool> {
        let pending = self.pending?;
        if now.saturating_duration_since(pending.pressed_at) > self.hold_delay {
            self.pending = None;
            Some(pending.translate)
        } else {
            None
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

//! The daemon's main loop: hotkey events in, orchestrator calls out.

use super::{HoldDebounce, Orchestrator, ReleaseKind};
use crate::input::HotkeyEvent;
use crate::session::ShutdownCoordinator;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Dispatch hotkey events until shutdown is requested.
///
/// Shutdown takes priority over pending events and is re-checked after each
/// one. A closed event channel also ends the loop, since nothing could ever
/// start a session again.
pub async fn run_event_loop(
    orchestrator: &Orchestrator,
    shutdown: &ShutdownCoordinator,
    events: &mut mpsc::Receiver<HotkeyEvent>,
    hold_delay: Duration,
) {
    let mut debounce = HoldDebounce::new(hold_delay);
    info!("Event loop running (hold delay {:?})", hold_delay);

    loop {
        let deadline = debounce.deadline();

        tokio::select! {
            biased;

            _ = shutdown.requested() => break,

            event = events.recv() => match event {
                Some(HotkeyEvent::Pressed { translate }) => {
                    if debounce.press(translate, Instant::now()) {
                        debug!("Hotkey down (translate: {}), waiting for hold", translate);
                    }
                }
                Some(HotkeyEvent::Released) => match debounce.release() {
                    ReleaseKind::Tap => debug!("Hotkey tap ignored"),
                    ReleaseKind::EndHold => {
                        orchestrator.on_release();
                    }
                },
                None => {
                    error!("Hotkey listener stopped; shutting down");
                    shutdown.request();
                    break;
                }
            },

            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now).into()),
                if deadline.is_some() =>
            {
                if let Some(translate) = debounce.poll(Instant::now()) {
                    orchestrator.on_hold(translate);
                }
            }
        }

        if shutdown.is_requested() {
            break;
        }
    }

    info!("Event loop stopped");
}

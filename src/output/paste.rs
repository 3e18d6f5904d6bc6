//! Paste keystroke using enigo.

use enigo::{Direction, Enigo, Key, Keyboard, Settings};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum PasteError {
    #[error("Failed to initialize input simulator: {0}")]
    InitFailed(String),

    #[error("Failed to send keystroke: {0}")]
    KeyFailed(String),
}

/// Press Ctrl+V in the focused window (text must already be on the clipboard)
pub fn paste_by_ctrl_v() -> Result<(), PasteError> {
    let mut enigo =
        Enigo::new(&Settings::default()).map_err(|e| PasteError::InitFailed(format!("{:?}", e)))?;

    // Small delay so the clipboard owner is ready to serve the request
    thread::sleep(Duration::from_millis(50));

    enigo
        .key(Key::Control, Direction::Press)
        .map_err(|e| PasteError::KeyFailed(format!("{:?}", e)))?;

    let clicked = enigo
        .key(Key::Unicode('v'), Direction::Click)
        .map_err(|e| PasteError::KeyFailed(format!("{:?}", e)));

    // Never leave Ctrl stuck down.
    enigo
        .key(Key::Control, Direction::Release)
        .map_err(|e| PasteError::KeyFailed(format!("{:?}", e)))?;
    clicked?;

    info!("Pasted from clipboard (Ctrl+V)");
    Ok(())
}

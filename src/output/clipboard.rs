//! Clipboard operations using arboard.
//!
//! One `Clipboard` handle lives for the whole daemon: on X11 the owner has
//! to stay alive to keep serving the selection it set.

use crate::output::paste;
use crate::platform::{ClipboardAccess, ClipboardSnapshot, StageError};
use arboard::{Clipboard, ImageData};
use std::borrow::Cow;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum ClipboardError {
    #[error("Failed to access clipboard: {0}")]
    AccessFailed(String),

    #[error("Failed to set clipboard content: {0}")]
    SetFailed(String),

    #[error("Failed to get clipboard content: {0}")]
    GetFailed(String),
}

impl From<ClipboardError> for StageError {
    fn from(e: ClipboardError) -> Self {
        StageError::Clipboard(e.to_string())
    }
}

/// The desktop clipboard plus the Ctrl+V keystroke.
#[derive(Default)]
pub struct SystemClipboard {
    handle: Mutex<Option<Clipboard>>,
}

impl SystemClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self) -> MutexGuard<'_, Option<Clipboard>> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the shared handle, connecting on first use.
    fn with<T>(
        &self,
        f: impl FnOnce(&mut Clipboard) -> Result<T, ClipboardError>,
    ) -> Result<T, ClipboardError> {
        let mut guard = self.handle();
        if guard.is_none() {
            let clipboard =
                Clipboard::new().map_err(|e| ClipboardError::AccessFailed(e.to_string()))?;
            *guard = Some(clipboard);
        }
        match guard.as_mut() {
            Some(clipboard) => f(clipboard),
            None => Err(ClipboardError::AccessFailed("clipboard unavailable".into())),
        }
    }
}

impl ClipboardAccess for SystemClipboard {
    fn save(&self) -> Result<ClipboardSnapshot, StageError> {
        let snapshot = self.with(|clipboard| {
            if let Ok(text) = clipboard.get_text() {
                return Ok(ClipboardSnapshot::Text(text));
            }
            match clipboard.get_image() {
                Ok(image) => Ok(ClipboardSnapshot::Image {
                    width: image.width,
                    height: image.height,
                    bytes: image.bytes.into_owned(),
                }),
                Err(arboard::Error::ContentNotAvailable) => Ok(ClipboardSnapshot::Empty),
                Err(e) => Err(ClipboardError::GetFailed(e.to_string())),
            }
        })?;

        debug!(
            "Saved clipboard ({})",
            match &snapshot {
                ClipboardSnapshot::Empty => "empty",
                ClipboardSnapshot::Text(_) => "text",
                ClipboardSnapshot::Image { .. } => "image",
            }
        );
        Ok(snapshot)
    }

    fn write(&self, text: &str) -> Result<(), StageError> {
        self.with(|clipboard| {
            clipboard
                .set_text(text)
                .map_err(|e| ClipboardError::SetFailed(e.to_string()))
        })?;

        debug!("Copied {} characters to clipboard", text.len());
        Ok(())
    }

    fn paste(&self) -> Result<(), StageError> {
        paste::paste_by_ctrl_v().map_err(|e| StageError::Paste(e.to_string()))
    }

    fn restore(&self, snapshot: ClipboardSnapshot) -> Result<(), StageError> {
        self.with(|clipboard| match snapshot {
            ClipboardSnapshot::Text(text) => clipboard.set_text(text),
            ClipboardSnapshot::Image {
                width,
                height,
                bytes,
            } => clipboard.set_image(ImageData {
                width,
                height,
                bytes: Cow::Owned(bytes),
            }),
            ClipboardSnapshot::Empty => clipboard.clear(),
        }
        .map_err(|e| ClipboardError::SetFailed(e.to_string())))?;

        info!("Clipboard restored");
        Ok(())
    }
}

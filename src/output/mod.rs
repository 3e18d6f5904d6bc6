//! Output handling: clipboard and paste.

pub mod clipboard;
pub mod paste;

pub use clipboard::{ClipboardError, SystemClipboard};
pub use paste::{paste_by_ctrl_v, PasteError};

//! Input handling: hotkey detection and audio capture.

pub mod hotkey;
pub mod recorder;

pub use hotkey::{HotkeyEvent, HotkeyListener, HotkeyListenerError, KeyTracker, Modifier};
pub use recorder::ArecordRecorder;

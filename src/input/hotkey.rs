//! Global hotkey detection using rdev.
//!
//! Listens for keyboard events and emits HotkeyEvents when the configured
//! hotkey goes down or up. Holding the translate modifier (and nothing else)
//! while pressing the key selects translate mode.

use crate::config::HotkeyConfig;
use rdev::{listen, Event, EventType, Key};
use std::thread;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

#[derive(Error, Debug)]
pub enum HotkeyListenerError {
    #[error("Failed to start hotkey listener: {0}")]
    StartFailed(String),

    #[error("Invalid hotkey: {0}")]
    InvalidHotkey(String),
}

/// Events emitted by the hotkey listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotkeyEvent {
    /// Hotkey went down; `translate` if the translate modifier was held alone
    Pressed { translate: bool },
    /// Hotkey came up
    Released,
}

/// Modifier groups; left and right variants count as the same group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    Ctrl,
    Shift,
    Alt,
    Super,
}

impl Modifier {
    fn of(key: Key) -> Option<Self> {
        match key {
            Key::ControlLeft | Key::ControlRight => Some(Modifier::Ctrl),
            Key::ShiftLeft | Key::ShiftRight => Some(Modifier::Shift),
            Key::Alt | Key::AltGr => Some(Modifier::Alt),
            Key::MetaLeft | Key::MetaRight => Some(Modifier::Super),
            _ => None,
        }
    }

    /// Parse a modifier name; empty means "no translate modifier"
    pub fn parse(name: &str) -> Result<Option<Self>, HotkeyListenerError> {
        match name.trim().to_lowercase().as_str() {
            "" => Ok(None),
            "ctrl" | "control" => Ok(Some(Modifier::Ctrl)),
            "shift" => Ok(Some(Modifier::Shift)),
            "alt" => Ok(Some(Modifier::Alt)),
            "super" | "meta" | "win" => Ok(Some(Modifier::Super)),
            other => Err(HotkeyListenerError::InvalidHotkey(format!(
                "Unknown modifier: '{}'. Valid: ctrl, shift, alt, super",
                other
            ))),
        }
    }
}

/// Turns the raw key stream into hotkey events.
#[derive(Debug)]
pub struct KeyTracker {
    trigger: Key,
    translate_modifier: Option<Modifier>,
    held_modifiers: Vec<Key>,
    trigger_down: bool,
}

impl KeyTracker {
    pub fn new(trigger: Key, translate_modifier: Option<Modifier>) -> Self {
        Self {
            trigger,
            translate_modifier,
            held_modifiers: Vec::new(),
            trigger_down: false,
        }
    }

    pub fn handle(&mut self, event: &EventType) -> Option<HotkeyEvent> {
        match *event {
            EventType::KeyPress(key) if key == self.trigger => {
                // Only emit if not already pressed (avoid key repeat)
                if self.trigger_down {
                    return None;
                }
                self.trigger_down = true;
                Some(HotkeyEvent::Pressed {
                    translate: self.translate_held(),
                })
            }
            EventType::KeyRelease(key) if key == self.trigger => {
                if !self.trigger_down {
                    return None;
                }
                self.trigger_down = false;
                Some(HotkeyEvent::Released)
            }
            EventType::KeyPress(key) => {
                if Modifier::of(key).is_some() && !self.held_modifiers.contains(&key) {
                    self.held_modifiers.push(key);
                }
                None
            }
            EventType::KeyRelease(key) => {
                self.held_modifiers.retain(|held| *held != key);
                None
            }
            _ => None,
        }
    }

    /// Exactly the translate modifier group is held, nothing else
    fn translate_held(&self) -> bool {
        let Some(wanted) = self.translate_modifier else {
            return false;
        };
        !self.held_modifiers.is_empty()
            && self
                .held_modifiers
                .iter()
                .all(|key| Modifier::of(*key) == Some(wanted))
    }
}

/// Global hotkey listener
pub struct HotkeyListener {
    key: Key,
    translate_modifier: Option<Modifier>,
    event_tx: mpsc::Sender<HotkeyEvent>,
}

impl HotkeyListener {
    /// Create a new hotkey listener for the configured key
    pub fn new(
        config: &HotkeyConfig,
    ) -> Result<(Self, mpsc::Receiver<HotkeyEvent>), HotkeyListenerError> {
        let key = parse_key(&config.key)?;
        let translate_modifier = Modifier::parse(&config.translate_modifier)?;
        let (event_tx, event_rx) = mpsc::channel(32);

        Ok((
            Self {
                key,
                translate_modifier,
                event_tx,
            },
            event_rx,
        ))
    }

    /// Start listening for hotkey events
    ///
    /// This spawns a background thread that listens for keyboard events.
    /// When the listener dies its sender is dropped, which closes the
    /// receiver.
    pub fn start(self) -> Result<(), HotkeyListenerError> {
        let Self {
            key,
            translate_modifier,
            event_tx,
        } = self;

        thread::Builder::new()
            .name("redictum-hotkey".into())
            .spawn(move || {
                info!("Hotkey listener started for {:?}", key);
                let mut tracker = KeyTracker::new(key, translate_modifier);

                let callback = move |event: Event| {
                    if let Some(hotkey) = tracker.handle(&event.event_type) {
                        debug!("Hotkey event: {:?}", hotkey);
                        if let Err(e) = event_tx.blocking_send(hotkey) {
                            error!("Failed to send hotkey event: {}", e);
                        }
                    }
                };

                if let Err(e) = listen(callback) {
                    error!("Hotkey listener error: {:?}", e);
                }
            })
            .map_err(|e| HotkeyListenerError::StartFailed(e.to_string()))?;

        Ok(())
    }
}

/// Parse a key string into an rdev Key
///
/// Supports formats like:
/// - "Insert", "Pause", "ScrollLock", "Home", "End", "PageUp"
/// - "ControlRight", "ctrl_r", "AltRight", "shift_l"
/// - "F1" through "F12"
/// - "Space", "Escape", "Tab", etc.
pub fn parse_key(key_str: &str) -> Result<Key, HotkeyListenerError> {
    let normalized = key_str.to_lowercase().replace(['_', '-'], "");

    match normalized.as_str() {
        // Navigation block
        "insert" | "ins" => Ok(Key::Insert),
        "delete" | "del" => Ok(Key::Delete),
        "home" => Ok(Key::Home),
        "end" => Ok(Key::End),
        "pageup" | "pgup" => Ok(Key::PageUp),
        "pagedown" | "pgdn" => Ok(Key::PageDown),
        "pause" | "break" => Ok(Key::Pause),
        "scrolllock" | "scroll" => Ok(Key::ScrollLock),
        "printscreen" | "print" | "prtsc" => Ok(Key::PrintScreen),

        // Control keys
        "controlright" | "ctrlr" | "ctrlright" | "rctrl" => Ok(Key::ControlRight),
        "controlleft" | "ctrll" | "ctrlleft" | "lctrl" | "ctrl" => Ok(Key::ControlLeft),

        // Alt keys
        "altright" | "altr" | "ralt" | "altgr" => Ok(Key::AltGr),
        "altleft" | "altl" | "lalt" | "alt" => Ok(Key::Alt),

        // Shift keys
        "shiftright" | "shiftr" | "rshift" => Ok(Key::ShiftRight),
        "shiftleft" | "shiftl" | "lshift" | "shift" => Ok(Key::ShiftLeft),

        // Meta/Super/Windows keys
        "metaleft" | "superleft" | "winleft" | "lsuper" | "lmeta" | "lwin" => Ok(Key::MetaLeft),
        "metaright" | "superright" | "winright" | "rsuper" | "rmeta" | "rwin" => Ok(Key::MetaRight),

        // Function keys
        "f1" => Ok(Key::F1),
        "f2" => Ok(Key::F2),
        "f3" => Ok(Key::F3),
        "f4" => Ok(Key::F4),
        "f5" => Ok(Key::F5),
        "f6" => Ok(Key::F6),
        "f7" => Ok(Key::F7),
        "f8" => Ok(Key::F8),
        "f9" => Ok(Key::F9),
        "f10" => Ok(Key::F10),
        "f11" => Ok(Key::F11),
        "f12" => Ok(Key::F12),

        // Special keys
        "space" => Ok(Key::Space),
        "escape" | "esc" => Ok(Key::Escape),
        "tab" => Ok(Key::Tab),
        "capslock" | "caps" => Ok(Key::CapsLock),
        "backspace" | "back" => Ok(Key::Backspace),
        "enter" | "return" => Ok(Key::Return),

        _ => Err(HotkeyListenerError::InvalidHotkey(format!(
            "Unknown key: '{}'. Valid examples: Insert, ScrollLock, ctrl_r, F12",
            key_str
        ))),
    }
}

//! User feedback: sound cues, popups and volume ducking.

pub mod sound;
pub mod volume;

pub use sound::{render_tones, FeedbackNotifier, SoundError};
pub use volume::{FixedVolume, PactlVolume};

//! Audio processing and transcription through external tools.

pub mod processor;
pub mod whisper;

pub use processor::{signal_rms, FfmpegProcessor};
pub use whisper::{WhisperCli, LANGUAGE_PROMPTS};

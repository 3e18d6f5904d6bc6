//! Transcript log and retention of recordings.

use crate::config::{HousekeepingConfig, Paths};
use crate::platform::SessionArchive;
use chrono::Local;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

/// Keep only the newest `max` files with extension `ext` in `dir`.
///
/// Returns how many were deleted. A missing directory counts as empty.
pub fn rotate(dir: &Path, ext: &str, max: usize) -> io::Result<usize> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut files: Vec<(SystemTime, PathBuf)> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|e| e == ext))
        .filter_map(|path| {
            let modified = path.metadata().and_then(|m| m.modified()).ok()?;
            Some((modified, path))
        })
        .collect();

    if files.len() <= max {
        return Ok(0);
    }

    // Newest first; ties broken by name so the order is stable
    files.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));

    let mut removed = 0;
    for (_, path) in files.into_iter().skip(max) {
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
        }
    }
    Ok(removed)
}

/// Append `text` to today's transcript file in `dir`.
pub fn append_transcript(dir: &Path, text: &str) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;

    let now = Local::now();
    let path = dir.join(format!("{}.txt", now.format("%Y-%m-%d")));
    let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
    writeln!(file, "[{}] {}", now.format("%H:%M:%S"), text)?;
    Ok(path)
}

pub struct Housekeeper {
    audio_dir: PathBuf,
    transcripts_dir: PathBuf,
    config: HousekeepingConfig,
}

impl Housekeeper {
    pub fn new(paths: &Paths, config: &HousekeepingConfig) -> Self {
        Self {
            audio_dir: paths.audio_dir(),
            transcripts_dir: paths.transcripts_dir(),
            config: config.clone(),
        }
    }
}

impl SessionArchive for Housekeeper {
    fn record_transcript(&self, text: &str) {
        if !self.config.log_transcripts {
            return;
        }
        match append_transcript(&self.transcripts_dir, text) {
            Ok(path) => debug!("Transcript logged to {}", path.display()),
            Err(e) => warn!("Failed to log transcript: {}", e),
        }
    }

    fn rotate(&self) {
        for (dir, ext, max) in [
            (&self.audio_dir, "wav", self.config.audio_max_files),
            (&self.transcripts_dir, "txt", self.config.transcripts_max_files),
        ] {
            match rotate(dir, ext, max) {
                Ok(0) => {}
                Ok(n) => debug!("Rotated {} old .{} file(s) in {}", n, ext, dir.display()),
                Err(e) => warn!("Rotation of {} failed: {}", dir.display(), e),
            }
        }
    }
}

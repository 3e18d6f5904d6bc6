//! One-time initialization: dependency diagnosis and the setup marker.
//!
//! `redictum init` checks the external tools the daemon needs and, when the
//! required ones are present, writes a small JSON state file. `start`
//! refuses to run until that file records an `initialized_at` timestamp.

use crate::config::{Config, Paths};
use crate::process::find_program;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum SetupError {
    #[error("Missing required dependencies: {}", .0.join(", "))]
    Incomplete(Vec<String>),

    #[error("Failed to write state file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Contents of the `.state` file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initialized_at: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl SetupState {
    /// Missing, unreadable or malformed files all read as an empty state.
    pub fn load(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("Cannot read {}: {}", path.display(), e);
                }
                return Self::default();
            }
        };

        match serde_json::from_str(&content) {
            Ok(state) => state,
            Err(e) => {
                warn!("Ignoring corrupt state file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), SetupError> {
        let io_err = |source| SetupError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).map_err(io_err)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized_at
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty())
    }
}

pub fn is_initialized(paths: &Paths) -> bool {
    SetupState::load(&paths.state_file()).is_initialized()
}

/// Record a completed setup, keeping any other fields.
pub fn mark_initialized(paths: &Paths) -> Result<SetupState, SetupError> {
    let path = paths.state_file();
    let mut state = SetupState::load(&path);
    state.initialized_at = Some(Utc::now().to_rfc3339());
    state.version = Some(env!("CARGO_PKG_VERSION").to_string());
    state.save(&path)?;
    info!("Setup recorded in {}", path.display());
    Ok(state)
}

/// One line of the `init` report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub name: String,
    pub required: bool,
    pub found: bool,
    pub detail: String,
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = match (self.found, self.required) {
            (true, _) => "ok",
            (false, true) => "MISSING",
            (false, false) => "missing (optional)",
        };
        write!(f, "{:<14} {:<20} {}", self.name, mark, self.detail)
    }
}

fn tool_check(name: &str, required: bool, purpose: &str) -> Check {
    let found = find_program(name);
    Check {
        name: name.to_string(),
        required,
        found: found.is_some(),
        detail: match found {
            Some(path) => path.display().to_string(),
            None => purpose.to_string(),
        },
    }
}

fn configured_check(name: &str, value: &str, exists: impl Fn(&str) -> bool) -> Check {
    let (found, detail) = if value.trim().is_empty() {
        (false, "not configured".to_string())
    } else if exists(value) {
        (true, value.to_string())
    } else {
        (false, format!("{value} not found"))
    };
    Check {
        name: name.to_string(),
        required: true,
        found,
        detail,
    }
}

/// Check every external dependency the daemon uses.
pub fn diagnose(config: &Config) -> Vec<Check> {
    let checks = vec![
        tool_check("arecord", true, "audio capture (alsa-utils)"),
        tool_check("ffmpeg", false, "loudness normalization"),
        tool_check("pactl", false, "volume reduction while recording"),
        tool_check("paplay", false, "sound cues"),
        configured_check("whisper-cli", &config.transcription.whisper_cli, |v| {
            find_program(v).is_some()
        }),
        configured_check("whisper model", &config.transcription.whisper_model, |v| {
            Path::new(v).is_file()
        }),
    ];

    for check in &checks {
        debug!("{}", check);
    }
    checks
}

/// Write the marker unless a required check failed.
pub fn complete(checks: &[Check], paths: &Paths) -> Result<SetupState, SetupError> {
    let missing: Vec<String> = checks
        .iter()
        .filter(|c| c.required && !c.found)
        .map(|c| c.name.clone())
        .collect();
    if !missing.is_empty() {
        return Err(SetupError::Incomplete(missing));
    }

    mark_initialized(paths)
}

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to find config directory")]
    NoConfigDir,

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub hotkey: HotkeyConfig,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub transcription: TranscriptionConfig,

    #[serde(default)]
    pub clipboard: ClipboardConfig,

    /// Sound cues and desktop popups
    #[serde(default)]
    pub feedback: FeedbackConfig,

    /// Shutdown and stage deadlines
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Retention of recordings and transcripts
    #[serde(default)]
    pub housekeeping: HousekeepingConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HotkeyConfig {
    /// The trigger key (e.g., "Insert", "F12", "ControlRight")
    #[serde(default = "default_hotkey")]
    pub key: String,

    /// Modifier that, held together with the key, selects translate mode:
    /// "ctrl", "shift", "alt", "super", or "" to disable
    #[serde(default = "default_translate_modifier")]
    pub translate_modifier: String,

    /// Seconds the key must stay down before recording starts
    #[serde(default = "default_hold_delay")]
    pub hold_delay_secs: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AudioConfig {
    /// ALSA capture device passed to arecord
    #[serde(default = "default_device")]
    pub device: String,

    /// Skip transcription when the recording carries no speech
    #[serde(default = "default_true")]
    pub silence_detection: bool,

    /// RMS level (16-bit sample units) a recording must exceed to count as speech
    #[serde(default = "default_silence_threshold")]
    pub silence_threshold: u32,

    /// Loudness-normalize recordings with ffmpeg before transcription
    #[serde(default = "default_true")]
    pub normalize: bool,

    /// Lower the output volume while recording
    #[serde(default = "default_true")]
    pub volume_reduce: bool,

    /// Output volume while recording, as a percentage of the current volume
    #[serde(default = "default_volume_level")]
    pub volume_level: u8,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TranscriptionConfig {
    /// Path to the whisper.cpp command line binary
    #[serde(default)]
    pub whisper_cli: String,

    /// Path to the ggml model file
    #[serde(default)]
    pub whisper_model: String,

    /// Language: "auto" or ISO code (en, de, etc.); empty lets whisper decide
    #[serde(default = "default_language")]
    pub language: String,

    /// Initial prompt: "auto" picks one matching the language, "" disables
    #[serde(default = "default_prompt")]
    pub prompt: String,

    /// Upper bound for a single whisper run
    #[serde(default = "default_transcription_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClipboardConfig {
    /// Paste at cursor and restore the previous clipboard afterwards.
    /// When false the transcript is only copied.
    #[serde(default = "default_true")]
    pub paste_auto: bool,

    #[serde(default)]
    pub prefix: String,

    #[serde(default = "default_postfix")]
    pub postfix: String,

    /// Time the focused application gets to consume the paste
    #[serde(default = "default_restore_delay")]
    pub restore_delay_secs: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FeedbackConfig {
    #[serde(default = "default_true")]
    pub sound_start: bool,

    #[serde(default)]
    pub sound_processing: bool,

    #[serde(default = "default_true")]
    pub sound_done: bool,

    #[serde(default = "default_true")]
    pub sound_error: bool,

    /// Playback volume for cues, 0-100
    #[serde(default = "default_feedback_volume")]
    pub volume: u8,

    /// Show desktop notifications for errors and results
    #[serde(default)]
    pub desktop: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DaemonConfig {
    /// How long shutdown waits for an in-flight pipeline
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    /// Upper bound for normalization and other helper tools
    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_secs: u64,

    /// How long `redictum stop` waits for the daemon to exit
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HousekeepingConfig {
    /// Recordings kept on disk (0 = keep none after processing)
    #[serde(default = "default_audio_max_files")]
    pub audio_max_files: usize,

    /// Daily transcript files kept on disk
    #[serde(default = "default_transcripts_max_files")]
    pub transcripts_max_files: usize,

    #[serde(default = "default_true")]
    pub log_transcripts: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_hotkey() -> String {
    "Insert".to_string()
}

fn default_translate_modifier() -> String {
    "ctrl".to_string()
}

fn default_hold_delay() -> f64 {
    0.6
}

fn default_device() -> String {
    "default".to_string()
}

fn default_silence_threshold() -> u32 {
    200
}

fn default_volume_level() -> u8 {
    30
}

fn default_language() -> String {
    "auto".to_string()
}

fn default_prompt() -> String {
    "auto".to_string()
}

fn default_transcription_timeout() -> u64 {
    120
}

fn default_postfix() -> String {
    " ".to_string()
}

fn default_restore_delay() -> f64 {
    0.3
}

fn default_feedback_volume() -> u8 {
    30
}

fn default_shutdown_grace() -> u64 {
    10
}

fn default_stage_timeout() -> u64 {
    60
}

fn default_stop_timeout() -> u64 {
    15
}

fn default_audio_max_files() -> usize {
    50
}

fn default_transcripts_max_files() -> usize {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for HotkeyConfig {
    fn default() -> Self {
        Self {
            key: default_hotkey(),
            translate_modifier: default_translate_modifier(),
            hold_delay_secs: default_hold_delay(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            silence_detection: true,
            silence_threshold: default_silence_threshold(),
            normalize: true,
            volume_reduce: true,
            volume_level: default_volume_level(),
        }
    }
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            whisper_cli: String::new(),
            whisper_model: String::new(),
            language: default_language(),
            prompt: default_prompt(),
            timeout_secs: default_transcription_timeout(),
        }
    }
}

impl Default for ClipboardConfig {
    fn default() -> Self {
        Self {
            paste_auto: true,
            prefix: String::new(),
            postfix: default_postfix(),
            restore_delay_secs: default_restore_delay(),
        }
    }
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            sound_start: true,
            sound_processing: false,
            sound_done: true,
            sound_error: true,
            volume: default_feedback_volume(),
            desktop: false,
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_secs: default_shutdown_grace(),
            stage_timeout_secs: default_stage_timeout(),
            stop_timeout_secs: default_stop_timeout(),
        }
    }
}

impl Default for HousekeepingConfig {
    fn default() -> Self {
        Self {
            audio_max_files: default_audio_max_files(),
            transcripts_max_files: default_transcripts_max_files(),
            log_transcripts: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl HotkeyConfig {
    pub fn hold_delay(&self) -> Duration {
        Duration::from_secs_f64(self.hold_delay_secs)
    }
}

impl ClipboardConfig {
    pub fn restore_delay(&self) -> Duration {
        Duration::from_secs_f64(self.restore_delay_secs)
    }
}

impl DaemonConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

impl Config {
    fn project_dirs() -> Result<ProjectDirs, ConfigError> {
        ProjectDirs::from("com", "redictum", "redictum").ok_or(ConfigError::NoConfigDir)
    }

    /// Get the config directory path
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        Ok(Self::project_dirs()?.config_dir().to_path_buf())
    }

    /// Get the data directory path (recordings, transcripts, logs)
    pub fn data_dir() -> Result<PathBuf, ConfigError> {
        Ok(Self::project_dirs()?.data_dir().to_path_buf())
    }

    /// Get the config file path
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load config from file, or create default if not exists
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let contents = fs::read_to_string(path)?;
            let config: Config = toml::from_str(&contents)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=10.0).contains(&self.hotkey.hold_delay_secs) {
            return Err(ConfigError::ValidationError(
                "hold_delay_secs must be between 0 and 10 seconds".into(),
            ));
        }

        if !matches!(
            self.hotkey.translate_modifier.to_lowercase().as_str(),
            "" | "ctrl" | "control" | "shift" | "alt" | "super" | "meta"
        ) {
            return Err(ConfigError::ValidationError(format!(
                "translate_modifier must be one of ctrl, shift, alt, super or empty (got '{}')",
                self.hotkey.translate_modifier
            )));
        }

        if self.audio.volume_level > 100 {
            return Err(ConfigError::ValidationError(
                "volume_level must be between 0 and 100".into(),
            ));
        }

        if self.feedback.volume > 100 {
            return Err(ConfigError::ValidationError(
                "feedback volume must be between 0 and 100".into(),
            ));
        }

        if !(0.0..=5.0).contains(&self.clipboard.restore_delay_secs) {
            return Err(ConfigError::ValidationError(
                "restore_delay_secs must be between 0 and 5 seconds".into(),
            ));
        }

        if self.transcription.timeout_secs == 0 || self.daemon.stage_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "stage timeouts must be positive".into(),
            ));
        }

        if self.daemon.stop_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "stop_timeout_secs must be positive".into(),
            ));
        }

        // The device name ends up as a single argv entry, but a leading dash
        // would be read by arecord as an option.
        if self.audio.device.starts_with('-') {
            return Err(ConfigError::ValidationError(
                "audio device must not start with '-'".into(),
            ));
        }

        Ok(())
    }

    /// Write the config as pretty TOML
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;

        info!("Config saved to: {}", path.display());
        Ok(())
    }
}

/// Filesystem locations used by one daemon instance.
#[derive(Debug, Clone)]
pub struct Paths {
    pub data_dir: PathBuf,
    pub pid_file: PathBuf,
}

impl Paths {
    /// Resolve the per-user locations.
    ///
    /// The PID file lives in the runtime directory so it does not survive a
    /// reboot; systems without one fall back to the cache directory.
    pub fn resolve() -> Result<Self, ConfigError> {
        let data_dir = Config::data_dir()?;
        let run_dir = dirs::runtime_dir()
            .or_else(dirs::cache_dir)
            .ok_or(ConfigError::NoConfigDir)?;

        Ok(Self {
            data_dir,
            pid_file: run_dir.join("redictum.pid"),
        })
    }

    pub fn under(root: &Path) -> Self {
        Self {
            data_dir: root.join("data"),
            pid_file: root.join("redictum.pid"),
        }
    }

    pub fn audio_dir(&self) -> PathBuf {
        self.data_dir.join("audio")
    }

    pub fn transcripts_dir(&self) -> PathBuf {
        self.data_dir.join("transcripts")
    }

    pub fn sounds_dir(&self) -> PathBuf {
        self.data_dir.join("sounds")
    }

    pub fn daemon_log(&self) -> PathBuf {
        self.data_dir.join("logs").join("daemon.log")
    }

    /// Marker written by `redictum init`
    pub fn state_file(&self) -> PathBuf {
        self.data_dir.join(".state")
    }
}

/// Show current configuration
pub fn show() -> anyhow::Result<()> {
    let config = Config::load()?;
    let path = Config::config_path()?;

    println!("Config file: {}\n", path.display());
    println!("{}", toml::to_string_pretty(&config)?);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // ===================
    // Default Value Tests
    // ===================

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.hotkey.key, "Insert");
        assert_eq!(config.hotkey.translate_modifier, "ctrl");
        assert!((config.hotkey.hold_delay_secs - 0.6).abs() < f64::EPSILON);
        assert_eq!(config.audio.device, "default");
        assert!(config.audio.silence_detection);
        assert_eq!(config.audio.silence_threshold, 200);
        assert_eq!(config.transcription.language, "auto");
        assert_eq!(config.transcription.prompt, "auto");
        assert!(config.clipboard.paste_auto);
        assert_eq!(config.clipboard.prefix, "");
        assert_eq!(config.clipboard.postfix, " ");
        assert!(!config.feedback.sound_processing);
        assert_eq!(config.daemon.shutdown_grace_secs, 10);
    }

    #[test]
    fn test_duration_accessors() {
        let config = Config::default();
        assert_eq!(config.hotkey.hold_delay(), Duration::from_millis(600));
        assert_eq!(config.clipboard.restore_delay(), Duration::from_millis(300));
        assert_eq!(config.daemon.shutdown_grace(), Duration::from_secs(10));
        assert_eq!(config.daemon.stop_timeout(), Duration::from_secs(15));
    }

    #[test]
    fn test_fractional_delays_are_exact() {
        let config: Config = toml::from_str(
            "[hotkey]\nhold_delay_secs = 0.7\n[clipboard]\nrestore_delay_secs = 0.1\n",
        )
        .unwrap();
        assert_eq!(config.hotkey.hold_delay(), Duration::from_millis(700));
        assert_eq!(config.clipboard.restore_delay(), Duration::from_millis(100));
    }

    // ===================
    // Validation Tests
    // ===================

    #[test]
    fn test_validate_valid_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_hold_delay_negative() {
        let mut config = Config::default();
        config.hotkey.hold_delay_secs = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_unknown_modifier() {
        let mut config = Config::default();
        config.hotkey.translate_modifier = "hyper".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("translate_modifier"));

        config.hotkey.translate_modifier = String::new();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_volume_level_range() {
        let mut config = Config::default();
        config.audio.volume_level = 101;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_device_option_injection() {
        let mut config = Config::default();
        config.audio.device = "--help".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_timeouts() {
        let mut config = Config::default();
        config.transcription.timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.daemon.stop_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    // ===================
    // TOML Parsing Tests
    // ===================

    #[test]
    fn test_parse_minimal_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.hotkey.key, "Insert");
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml_str = r#"
[clipboard]
paste_auto = false
prefix = "> "
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(!config.clipboard.paste_auto);
        assert_eq!(config.clipboard.prefix, "> ");
        assert_eq!(config.clipboard.postfix, " ");
        assert_eq!(config.hotkey.key, "Insert");
    }

    #[test]
    fn test_serialize_and_deserialize_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.hotkey.key, parsed.hotkey.key);
        assert_eq!(config.audio.volume_level, parsed.audio.volume_level);
        assert_eq!(config.clipboard.postfix, parsed.clipboard.postfix);
    }

    // ===================
    // File Tests
    // ===================

    #[test]
    fn test_load_from_missing_writes_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.hotkey.key, "Insert");
        assert!(path.exists());
    }

    #[test]
    fn test_load_from_rejects_invalid_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[audio]\nvolume_level = 250\n").unwrap();

        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_paths_layout() {
        let paths = Paths::under(Path::new("/tmp/r"));
        assert_eq!(paths.audio_dir(), PathBuf::from("/tmp/r/data/audio"));
        assert_eq!(paths.state_file(), PathBuf::from("/tmp/r/data/.state"));
        assert_eq!(
            paths.daemon_log(),
            PathBuf::from("/tmp/r/data/logs/daemon.log")
        );
    }
}

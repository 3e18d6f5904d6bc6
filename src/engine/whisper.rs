//! Whisper transcription through the whisper.cpp command line tool.

use crate::config::TranscriptionConfig;
use crate::platform::{AudioFile, SpeechToText, StageError, TranscribeMode};
use crate::process::{run_blocking, AbortSignal};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info};

/// Short native-language sentences that prime whisper toward proper
/// punctuation and casing in that language.
pub const LANGUAGE_PROMPTS: &[(&str, &str)] = &[
    ("en", "Hello, how are you? I'm fine, thank you."),
    ("zh", "你好，今天过得怎么样？我很好，谢谢。"),
    ("hi", "नमस्ते, आप कैसे हैं? मैं ठीक हूँ, धन्यवाद।"),
    ("es", "Hola, ¿cómo estás? Estoy bien, gracias."),
    ("ar", "مرحبا، كيف حالك؟ أنا بخير، شكرا."),
    ("fr", "Bonjour, comment allez-vous ? Je vais bien, merci."),
    ("pt", "Olá, como você está? Estou bem, obrigado."),
    ("ru", "Привет, как дела? У меня всё хорошо, спасибо."),
    ("de", "Hallo, wie geht es dir? Mir geht es gut, danke."),
    ("ja", "こんにちは、お元気ですか？元気です、ありがとう。"),
    ("uk", "Привіт, як справи? У мене все добре, дякую."),
    ("ko", "안녕하세요, 잘 지내세요? 네, 잘 지내요. 감사합니다."),
    ("it", "Ciao, come stai? Sto bene, grazie."),
    ("tr", "Merhaba, nasılsın? İyiyim, teşekkür ederim."),
    ("pl", "Cześć, jak się masz? Dobrze, dziękuję."),
];

/// Markers whisper emits for recordings without speech
const BLANK_MARKERS: &[&str] = &["[BLANK_AUDIO]", "[ЗВУК]", "(silence)", "[silence]"];

pub fn language_prompt(language: &str) -> Option<&'static str> {
    LANGUAGE_PROMPTS
        .iter()
        .find(|(code, _)| *code == language)
        .map(|(_, prompt)| *prompt)
}

pub struct WhisperCli {
    cli: PathBuf,
    model: PathBuf,
    language: String,
    prompt: String,
    timeout: Duration,
    abort: AbortSignal,
}

impl WhisperCli {
    pub fn new(config: &TranscriptionConfig, abort: AbortSignal) -> Self {
        Self {
            cli: PathBuf::from(&config.whisper_cli),
            model: PathBuf::from(&config.whisper_model),
            language: config.language.trim().to_string(),
            prompt: config.prompt.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            abort,
        }
    }

    /// `"auto"` picks the language's prompt, `""` disables, anything else is used verbatim.
    pub fn resolve_prompt(&self) -> Option<String> {
        match self.prompt.as_str() {
            "" => None,
            "auto" => language_prompt(&self.language).map(str::to_string),
            custom => Some(custom.to_string()),
        }
    }

    /// Arguments after the binary name.
    ///
    /// Translate mode passes neither language nor prompt: whisper detects the
    /// source language and the prompt would bias it toward the wrong one.
    pub fn build_args(&self, audio: &AudioFile, mode: TranscribeMode) -> Vec<String> {
        let mut args = vec![
            "-m".to_string(),
            self.model.to_string_lossy().into_owned(),
            "-f".to_string(),
            audio.path().to_string_lossy().into_owned(),
            "--no-timestamps".to_string(),
            "--no-prints".to_string(),
        ];

        match mode {
            TranscribeMode::Translate => args.push("--translate".to_string()),
            TranscribeMode::Transcribe => {
                if !self.language.is_empty() {
                    args.push("-l".to_string());
                    args.push(self.language.clone());
                }
                if let Some(prompt) = self.resolve_prompt() {
                    args.push("--prompt".to_string());
                    args.push(prompt);
                }
            }
        }

        args
    }
}

/// Trim whisper output and drop blank-audio markers.
pub fn clean_output(stdout: &str) -> String {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| {
            !BLANK_MARKERS
                .iter()
                .any(|marker| marker.eq_ignore_ascii_case(line))
        })
        .collect::<Vec<_>>()
        .join(" ")
}

impl SpeechToText for WhisperCli {
    fn transcribe(&self, audio: &AudioFile, mode: TranscribeMode) -> Result<String, StageError> {
        if self.cli.as_os_str().is_empty() {
            return Err(StageError::Transcribe(
                "whisper_cli is not configured; run `redictum init`".into(),
            ));
        }

        let args = self.build_args(audio, mode);
        debug!("whisper-cli {:?}", args);

        let started = Instant::now();
        let mut cmd = Command::new(&self.cli);
        cmd.args(&args);
        let output = run_blocking(cmd, self.timeout, &self.abort)
            .map_err(|e| StageError::from_run("transcription", e, StageError::Transcribe))?;

        if !output.status.success() {
            return Err(StageError::Transcribe(format!(
                "whisper-cli failed ({}): {}",
                output.status,
                output.stderr_tail()
            )));
        }

        let text = clean_output(&output.stdout_lossy());
        info!(
            "whisper-cli finished in {}ms ({:?})",
            started.elapsed().as_millis(),
            mode
        );
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn whisper(language: &str, prompt: &str) -> WhisperCli {
        let config = TranscriptionConfig {
            whisper_cli: "/opt/whisper/whisper-cli".into(),
            whisper_model: "/opt/whisper/ggml-large-v3.bin".into(),
            language: language.into(),
            prompt: prompt.into(),
            ..TranscriptionConfig::default()
        };
        WhisperCli::new(&config, AbortSignal::new())
    }

    fn args(language: &str, prompt: &str, mode: TranscribeMode) -> Vec<String> {
        whisper(language, prompt).build_args(&AudioFile::new("/tmp/test.wav"), mode)
    }

    fn has(args: &[String], flag: &str) -> bool {
        args.iter().any(|a| a == flag)
    }

    fn value_after(args: &[String], flag: &str) -> Option<String> {
        let idx = args.iter().position(|a| a == flag)?;
        args.get(idx + 1).cloned()
    }

    // ===================
    // Command Building Tests
    // ===================

    #[test]
    fn test_transcribe_with_custom_prompt() {
        let a = args("ru", "Custom prompt.", TranscribeMode::Transcribe);
        assert_eq!(value_after(&a, "-l").as_deref(), Some("ru"));
        assert_eq!(value_after(&a, "--prompt").as_deref(), Some("Custom prompt."));
        assert!(!has(&a, "--translate"));
    }

    #[test]
    fn test_translate_ignores_language_and_prompt() {
        let a = args("ru", "Custom prompt.", TranscribeMode::Translate);
        assert!(has(&a, "--translate"));
        assert!(!has(&a, "-l"));
        assert!(!has(&a, "--prompt"));

        let a = args("", "", TranscribeMode::Translate);
        assert!(has(&a, "--translate"));
        assert!(!has(&a, "-l"));
    }

    #[test]
    fn test_empty_language_omits_flag() {
        let a = args("", "Custom prompt.", TranscribeMode::Transcribe);
        assert!(!has(&a, "-l"));
        assert!(has(&a, "--prompt"));
    }

    #[test]
    fn test_auto_prompt_unknown_language() {
        let a = args("xx", "auto", TranscribeMode::Transcribe);
        assert_eq!(value_after(&a, "-l").as_deref(), Some("xx"));
        assert!(!has(&a, "--prompt"));
    }

    #[test]
    fn test_disabled_prompt() {
        let a = args("ru", "", TranscribeMode::Transcribe);
        assert!(has(&a, "-l"));
        assert!(!has(&a, "--prompt"));
    }

    #[test]
    fn test_model_and_file_arguments() {
        let a = args("en", "auto", TranscribeMode::Transcribe);
        assert_eq!(
            value_after(&a, "-m").as_deref(),
            Some("/opt/whisper/ggml-large-v3.bin")
        );
        assert_eq!(value_after(&a, "-f").as_deref(), Some("/tmp/test.wav"));
        assert!(has(&a, "--no-timestamps"));
    }

    // ===================
    // Prompt Resolution Tests
    // ===================

    #[test]
    fn test_auto_prompt_every_language() {
        for (lang, prompt) in LANGUAGE_PROMPTS {
            let a = args(lang, "auto", TranscribeMode::Transcribe);
            assert_eq!(
                value_after(&a, "--prompt").as_deref(),
                Some(*prompt),
                "wrong prompt for {}",
                lang
            );
        }
        assert_eq!(LANGUAGE_PROMPTS.len(), 15);
    }

    #[test]
    fn test_resolve_prompt() {
        assert_eq!(
            whisper("ru", "auto").resolve_prompt().as_deref(),
            language_prompt("ru")
        );
        assert_eq!(whisper("xx", "auto").resolve_prompt(), None);
        assert_eq!(
            whisper("ru", "My custom prompt.").resolve_prompt().as_deref(),
            Some("My custom prompt.")
        );
        assert_eq!(whisper("ru", "").resolve_prompt(), None);
    }

    // ===================
    // Output Tests
    // ===================

    #[test]
    fn test_clean_output_trims() {
        assert_eq!(clean_output("  Hello world  \n"), "Hello world");
    }

    #[test]
    fn test_clean_output_blank_markers() {
        for blank in ["[BLANK_AUDIO]", "[ЗВУК]", "(silence)", "", "  ", "\n[BLANK_AUDIO]\n"] {
            assert_eq!(clean_output(blank), "", "not blank: {:?}", blank);
        }
    }

    #[test]
    fn test_clean_output_joins_segments() {
        assert_eq!(
            clean_output(" First part.\n[BLANK_AUDIO]\n Second part.\n"),
            "First part. Second part."
        );
    }

    // ===================
    // Execution Tests
    // ===================

    #[test]
    fn test_transcribe_passes_arguments_to_tool() {
        let config = TranscriptionConfig {
            whisper_cli: "echo".into(),
            whisper_model: "model.bin".into(),
            language: "de".into(),
            prompt: "".into(),
            ..TranscriptionConfig::default()
        };
        let cli = WhisperCli::new(&config, AbortSignal::new());

        let text = cli
            .transcribe(&AudioFile::new("a.wav"), TranscribeMode::Transcribe)
            .unwrap();
        assert_eq!(text, "-m model.bin -f a.wav --no-timestamps --no-prints -l de");
    }

    #[test]
    fn test_transcribe_nonzero_exit() {
        let config = TranscriptionConfig {
            whisper_cli: "false".into(),
            ..TranscriptionConfig::default()
        };
        let err = WhisperCli::new(&config, AbortSignal::new())
            .transcribe(&AudioFile::new("a.wav"), TranscribeMode::Transcribe)
            .unwrap_err();
        assert!(err.to_string().contains("whisper-cli failed"));
    }

    #[test]
    fn test_transcribe_unconfigured() {
        let err = WhisperCli::new(&TranscriptionConfig::default(), AbortSignal::new())
            .transcribe(&AudioFile::new("a.wav"), TranscribeMode::Transcribe)
            .unwrap_err();
        assert!(matches!(err, StageError::Transcribe(_)));
    }
}

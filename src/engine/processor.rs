//! Loudness normalization via ffmpeg and RMS-based speech detection.

use crate::platform::{AudioFile, AudioProcessing, StageError};
use crate::process::{find_program, run_blocking, AbortSignal};
use hound::{SampleFormat, WavReader};
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

pub struct FfmpegProcessor {
    silence_threshold: f64,
    timeout: Duration,
    abort: AbortSignal,
}

impl FfmpegProcessor {
    pub fn new(silence_threshold: u32, timeout: Duration, abort: AbortSignal) -> Self {
        Self {
            silence_threshold: f64::from(silence_threshold),
            timeout,
            abort,
        }
    }

    fn normalized_path(audio: &AudioFile) -> PathBuf {
        let path = audio.path();
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "recording".to_string());
        path.with_file_name(format!("{stem}_norm.wav"))
    }
}

/// Root-mean-square amplitude of a 16-bit integer WAV stream.
///
/// `None` for anything that is not 16-bit PCM or holds no samples.
pub fn signal_rms<R: Read>(reader: R) -> Option<f64> {
    let mut wav = WavReader::new(reader).ok()?;
    let spec = wav.spec();
    if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
        return None;
    }

    let mut sum = 0.0f64;
    let mut count = 0u64;
    for sample in wav.samples::<i16>() {
        let value = f64::from(sample.ok()?);
        sum += value * value;
        count += 1;
    }

    (count > 0).then(|| (sum / count as f64).sqrt())
}

impl AudioProcessing for FfmpegProcessor {
    fn normalize(&self, audio: &AudioFile) -> Result<AudioFile, StageError> {
        if find_program("ffmpeg").is_none() {
            debug!("ffmpeg not installed; skipping normalization");
            return Ok(audio.clone());
        }

        let output = Self::normalized_path(audio);
        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-y", "-hide_banner", "-loglevel", "error", "-i"])
            .arg(audio.path())
            .args(["-af", "loudnorm", "-ar", "16000", "-ac", "1"])
            .arg(&output);

        let result = run_blocking(cmd, self.timeout, &self.abort)
            .map_err(|e| StageError::from_run("normalization", e, StageError::Normalize))?;

        if !result.status.success() {
            let _ = std::fs::remove_file(&output);
            return Err(StageError::Normalize(format!(
                "ffmpeg exited with {}: {}",
                result.status,
                result.stderr_tail()
            )));
        }

        info!("Normalized {}", audio.path().display());
        Ok(AudioFile::new(output))
    }

    fn has_speech(&self, audio: &AudioFile) -> bool {
        let file = match std::fs::File::open(audio.path()) {
            Ok(file) => file,
            Err(e) => {
                warn!("Cannot open {} for speech check: {}", audio.path().display(), e);
                return false;
            }
        };

        match signal_rms(std::io::BufReader::new(file)) {
            Some(rms) => {
                debug!("RMS {:.1} (threshold {})", rms, self.silence_threshold);
                rms > self.silence_threshold
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{WavSpec, WavWriter};
    use std::io::Cursor;
    use std::path::Path;
    use tempfile::TempDir;

    fn spec() -> WavSpec {
        WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        }
    }

    /// Square wave at the given amplitude; its RMS equals the amplitude
    fn write_wav(path: &Path, amplitude: i16, samples: usize) {
        let mut writer = WavWriter::create(path, spec()).unwrap();
        for i in 0..samples {
            let value = if i % 2 == 0 { amplitude } else { -amplitude };
            writer.write_sample(value).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn processor() -> FfmpegProcessor {
        FfmpegProcessor::new(200, Duration::from_secs(10), AbortSignal::new())
    }

    #[test]
    fn test_signal_rms_square_wave() {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut buf, spec()).unwrap();
            for i in 0..1000 {
                writer.write_sample(if i % 2 == 0 { 300i16 } else { -300 }).unwrap();
            }
            writer.finalize().unwrap();
        }
        buf.set_position(0);

        let rms = signal_rms(buf).unwrap();
        assert!((rms - 300.0).abs() < 0.01);
    }

    #[test]
    fn test_signal_rms_rejects_garbage() {
        assert_eq!(signal_rms(Cursor::new(b"not a wav file".to_vec())), None);
    }

    #[test]
    fn test_has_speech_above_threshold() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("loud.wav");
        write_wav(&path, 1000, 16000);
        assert!(processor().has_speech(&AudioFile::new(&path)));
    }

    #[test]
    fn test_has_speech_silence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("quiet.wav");
        write_wav(&path, 50, 16000);
        assert!(!processor().has_speech(&AudioFile::new(&path)));
    }

    #[test]
    fn test_has_speech_threshold_is_configurable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mid.wav");
        write_wav(&path, 300, 16000);

        let audio = AudioFile::new(&path);
        assert!(processor().has_speech(&audio));
        let strict = FfmpegProcessor::new(400, Duration::from_secs(10), AbortSignal::new());
        assert!(!strict.has_speech(&audio));
    }

    #[test]
    fn test_has_speech_empty_or_missing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.wav");
        write_wav(&path, 0, 0);
        assert!(!processor().has_speech(&AudioFile::new(&path)));
        assert!(!processor().has_speech(&AudioFile::new(dir.path().join("missing.wav"))));
    }

    #[test]
    fn test_normalized_path() {
        let audio = AudioFile::new("/data/audio/rec_1.wav");
        assert_eq!(
            FfmpegProcessor::normalized_path(&audio),
            PathBuf::from("/data/audio/rec_1_norm.wav")
        );
    }
}

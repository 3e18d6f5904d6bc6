//! Recording fakes for the collaborator traits.

use super::Collaborators;
use crate::platform::{
    AudioCapture, AudioFile, AudioProcessing, ClipboardAccess, ClipboardSnapshot, Notifier,
    NotifyKind, SessionArchive, SpeechToText, StageError, TranscribeMode, VolumeControl,
};
use crate::session::RecordingHandle;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    RecorderStart(u64),
    RecorderStop(u64),
    RecorderCancel(u64),
    Normalize,
    HasSpeech,
    Transcribe(TranscribeMode),
    ClipboardSave,
    ClipboardWrite(String),
    Paste,
    ClipboardRestore,
    Notify(NotifyKind),
    VolumeReduce,
    VolumeRestore,
    RecordTranscript(String),
    Rotate,
}

struct Behavior {
    speech: bool,
    transcript: String,
    transcribe_delay: Duration,
    fail_start: bool,
    fail_stop: bool,
    fail_normalize: bool,
    fail_transcribe: bool,
    fail_paste: bool,
    panic_transcribe: bool,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            speech: true,
            transcript: "hello".into(),
            transcribe_delay: Duration::ZERO,
            fail_start: false,
            fail_stop: false,
            fail_normalize: false,
            fail_transcribe: false,
            fail_paste: false,
            panic_transcribe: false,
        }
    }
}

#[derive(Default)]
struct Inner {
    calls: Mutex<Vec<Call>>,
    behavior: Mutex<Behavior>,
}

impl Inner {
    fn log(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

/// One fake standing in for every collaborator, sharing a call log.
#[derive(Clone, Default)]
pub struct Fakes {
    inner: Arc<Inner>,
}

impl Fakes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            recorder: self.inner.clone(),
            processor: self.inner.clone(),
            transcriber: self.inner.clone(),
            clipboard: self.inner.clone(),
            notifier: self.inner.clone(),
            volume: self.inner.clone(),
            archive: self.inner.clone(),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    fn with(&self, f: impl FnOnce(&mut Behavior)) {
        f(&mut self.inner.behavior.lock().unwrap());
    }

    pub fn set_speech(&self, speech: bool) {
        self.with(|b| b.speech = speech);
    }

    pub fn set_transcript(&self, text: &str) {
        self.with(|b| b.transcript = text.to_string());
    }

    pub fn set_transcribe_delay(&self, delay: Duration) {
        self.with(|b| b.transcribe_delay = delay);
    }

    pub fn fail_start(&self) {
        self.with(|b| b.fail_start = true);
    }

    pub fn fail_stop(&self) {
        self.with(|b| b.fail_stop = true);
    }

    pub fn fail_normalize(&self) {
        self.with(|b| b.fail_normalize = true);
    }

    pub fn fail_transcribe(&self) {
        self.with(|b| b.fail_transcribe = true);
    }

    pub fn fail_paste(&self) {
        self.with(|b| b.fail_paste = true);
    }

    pub fn panic_transcribe(&self) {
        self.with(|b| b.panic_transcribe = true);
    }
}

impl AudioCapture for Inner {
    fn start(&self, session: &RecordingHandle) -> Result<(), StageError> {
        self.log(Call::RecorderStart(session.id()));
        if self.behavior.lock().unwrap().fail_start {
            return Err(StageError::Capture("arecord missing".into()));
        }
        Ok(())
    }

    fn stop(&self, session: &RecordingHandle) -> Result<AudioFile, StageError> {
        self.log(Call::RecorderStop(session.id()));
        if self.behavior.lock().unwrap().fail_stop {
            return Err(StageError::Capture("no audio captured".into()));
        }
        Ok(AudioFile::new(format!("/tmp/rec_{}.wav", session.id())))
    }

    fn cancel(&self, session: &RecordingHandle) {
        self.log(Call::RecorderCancel(session.id()));
    }
}

impl AudioProcessing for Inner {
    fn normalize(&self, audio: &AudioFile) -> Result<AudioFile, StageError> {
        self.log(Call::Normalize);
        if self.behavior.lock().unwrap().fail_normalize {
            return Err(StageError::Normalize("ffmpeg failed".into()));
        }
        Ok(audio.clone())
    }

    fn has_speech(&self, _audio: &AudioFile) -> bool {
        self.log(Call::HasSpeech);
        self.behavior.lock().unwrap().speech
    }
}

impl SpeechToText for Inner {
    fn transcribe(&self, _audio: &AudioFile, mode: TranscribeMode) -> Result<String, StageError> {
        self.log(Call::Transcribe(mode));
        let (delay, fail, panics, text) = {
            let b = self.behavior.lock().unwrap();
            (
                b.transcribe_delay,
                b.fail_transcribe,
                b.panic_transcribe,
                b.transcript.clone(),
            )
        };
        thread::sleep(delay);
        if panics {
            panic!("transcriber exploded");
        }
        if fail {
            return Err(StageError::Transcribe("whisper-cli failed".into()));
        }
        Ok(text)
    }
}

impl ClipboardAccess for Inner {
    fn save(&self) -> Result<ClipboardSnapshot, StageError> {
        self.log(Call::ClipboardSave);
        Ok(ClipboardSnapshot::Text("previous".into()))
    }

    fn write(&self, text: &str) -> Result<(), StageError> {
        self.log(Call::ClipboardWrite(text.to_string()));
        Ok(())
    }

    fn paste(&self) -> Result<(), StageError> {
        self.log(Call::Paste);
        if self.behavior.lock().unwrap().fail_paste {
            return Err(StageError::Paste("no display".into()));
        }
        Ok(())
    }

    fn restore(&self, _snapshot: ClipboardSnapshot) -> Result<(), StageError> {
        self.log(Call::ClipboardRestore);
        Ok(())
    }
}

impl Notifier for Inner {
    fn signal(&self, kind: NotifyKind) {
        self.log(Call::Notify(kind));
    }
}

impl VolumeControl for Inner {
    fn reduce(&self) {
        self.log(Call::VolumeReduce);
    }

    fn restore(&self) {
        self.log(Call::VolumeRestore);
    }
}

impl SessionArchive for Inner {
    fn record_transcript(&self, text: &str) {
        self.log(Call::RecordTranscript(text.to_string()));
    }

    fn rotate(&self) {
        self.log(Call::Rotate);
    }
}

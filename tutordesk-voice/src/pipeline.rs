use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::level::LevelMeter;
use crate::traits::{AudioRecorder, Transcriber};
use crate::types::AudioClip;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Recording,
    Stopped,
    Transcribing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleOutcome {
    Started,
    /// Recording ended; carries the text appended to the compose box.
    Transcribed(String),
}

#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("Already recording")]
    AlreadyRecording,

    #[error("Not recording")]
    NotRecording,

    #[error("Voice input busy ({0:?})")]
    Busy(CaptureState),

    #[error("Audio capture failed: {0}")]
    Capture(#[source] anyhow::Error),

    #[error("Transcription failed: {0}")]
    Transcription(#[source] anyhow::Error),
}

/// Append dictated text to whatever is already in the compose box.
pub fn append_transcript(compose: &mut String, text: &str) {
    let text = text.trim();
    if text.is_empty() {
        return;
    }
    if !compose.is_empty() && !compose.ends_with(char::is_whitespace) {
        compose.push(' ');
    }
    compose.push_str(text);
}

/// Microphone to compose-box pipeline for one input.
///
/// A single state field gates every transition, so one input can never
/// run two recordings at once.
pub struct VoiceCapturePipeline {
    recorder: Box<dyn AudioRecorder>,
    transcriber: Arc<dyn Transcriber>,
    meter: LevelMeter,
    state: CaptureState,
}

impl VoiceCapturePipeline {
    pub fn new(recorder: Box<dyn AudioRecorder>, transcriber: Arc<dyn Transcriber>) -> Self {
        Self {
            recorder,
            transcriber,
            meter: LevelMeter::default(),
            state: CaptureState::Idle,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == CaptureState::Recording
    }

    pub fn start(&mut self) -> Result<(), VoiceError> {
        match self.state {
            CaptureState::Idle => {}
            CaptureState::Recording => return Err(VoiceError::AlreadyRecording),
            other => return Err(VoiceError::Busy(other)),
        }

        self.recorder.start().map_err(VoiceError::Capture)?;
        self.meter.reset();
        self.state = CaptureState::Recording;
        info!("Voice recording started");
        Ok(())
    }

    /// Current input level, 0-100. Call once per frame while recording.
    pub fn sample_level(&mut self) -> u8 {
        if self.state != CaptureState::Recording {
            return 0;
        }
        let samples = self.recorder.recent_samples();
        self.meter.push(&samples)
    }

    pub fn stop(&mut self) -> Result<AudioClip, VoiceError> {
        if self.state != CaptureState::Recording {
            return Err(VoiceError::NotRecording);
        }
        self.meter.reset();

        match self.recorder.stop() {
            Ok(clip) => {
                self.state = CaptureState::Stopped;
                info!(duration_ms = clip.duration_ms(), "Voice recording stopped");
                Ok(clip)
            }
            Err(e) => {
                self.state = CaptureState::Idle;
                Err(VoiceError::Capture(e))
            }
        }
    }

    /// Discard the recording without transcribing. Returns whether a
    /// recording was running.
    pub fn cancel(&mut self) -> bool {
        if self.state != CaptureState::Recording {
            return false;
        }
        self.recorder.cancel();
        self.meter.reset();
        self.state = CaptureState::Idle;
        info!("Voice recording cancelled");
        true
    }

    /// Transcribe a stopped clip and append the text to `compose`.
    /// On failure `compose` is left as it was.
    pub async fn transcribe_into(&mut self, clip: AudioClip, compose: &mut String) -> Result<String, VoiceError> {
        if self.state != CaptureState::Stopped {
            return Err(VoiceError::Busy(self.state));
        }
        if clip.is_empty() {
            debug!("Empty clip, nothing to transcribe");
            self.state = CaptureState::Idle;
            return Ok(String::new());
        }

        self.state = CaptureState::Transcribing;
        let result = self.transcriber.transcribe(&clip).await;
        self.state = CaptureState::Idle;

        match result {
            Ok(text) => {
                append_transcript(compose, &text);
                Ok(text.trim().to_string())
            }
            Err(e) => {
                warn!("Transcription failed: {}", e);
                Err(VoiceError::Transcription(e))
            }
        }
    }

    /// The microphone button: start when idle, stop and transcribe when
    /// recording.
    pub async fn toggle(&mut self, compose: &mut String) -> Result<ToggleOutcome, VoiceError> {
        match self.state {
            CaptureState::Idle => {
                self.start()?;
                Ok(ToggleOutcome::Started)
            }
            CaptureState::Recording => {
                let clip = self.stop()?;
                let text = self.transcribe_into(clip, compose).await?;
                Ok(ToggleOutcome::Transcribed(text))
            }
            other => Err(VoiceError::Busy(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_adds_single_space() {
        let mut compose = String::from("Hello");
        append_transcript(&mut compose, " there ");
        assert_eq!(compose, "Hello there");
    }

    #[test]
    fn test_append_to_empty_or_trailing_space() {
        let mut compose = String::new();
        append_transcript(&mut compose, "hi");
        assert_eq!(compose, "hi");

        let mut compose = String::from("hi ");
        append_transcript(&mut compose, "again");
        assert_eq!(compose, "hi again");
    }

    #[test]
    fn test_append_blank_is_noop() {
        let mut compose = String::from("keep");
        append_transcript(&mut compose, "   ");
        assert_eq!(compose, "keep");
    }
}

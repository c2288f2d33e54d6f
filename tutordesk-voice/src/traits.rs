use anyhow::Result;
use async_trait::async_trait;

use crate::types::AudioClip;

/// Source of microphone audio
pub trait AudioRecorder: Send {
    /// Begin capturing.
    fn start(&mut self) -> Result<()>;

    /// Samples captured since the previous call, for level metering.
    fn recent_samples(&mut self) -> Vec<f32>;

    /// Stop capturing and return the whole clip as 16kHz mono.
    fn stop(&mut self) -> Result<AudioClip>;

    /// Stop capturing and discard what was recorded.
    fn cancel(&mut self);
}

/// Speech-to-text for a recorded clip
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, clip: &AudioClip) -> Result<String>;
}

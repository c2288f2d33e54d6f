use anyhow::Result;
use api::ConsoleApi;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::traits::Transcriber;
use crate::types::AudioClip;

pub const WAV_MIME: &str = "audio/wav";

/// Uploads clips to the console's transcription endpoint
pub struct HttpTranscriber {
    api: Arc<dyn ConsoleApi>,
}

impl HttpTranscriber {
    pub fn new(api: Arc<dyn ConsoleApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, clip: &AudioClip) -> Result<String> {
        let wav = clip.to_wav();
        debug!(bytes = wav.len(), duration_ms = clip.duration_ms(), "Uploading clip for transcription");
        self.api.transcribe(wav, WAV_MIME).await
    }
}

use crate::utils::{TARGET_SAMPLE_RATE, encode_wav};

/// Recorded audio, normalized to 16kHz mono
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub samples: Vec<f32>,
}

impl AudioClip {
    pub fn new(samples: Vec<f32>) -> Self {
        Self { samples }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_ms(&self) -> f32 {
        (self.samples.len() as f32 / TARGET_SAMPLE_RATE as f32) * 1000.0
    }

    /// 16-bit PCM WAV, the format uploaded for transcription
    pub fn to_wav(&self) -> Vec<u8> {
        encode_wav(&self.samples, TARGET_SAMPLE_RATE)
    }
}

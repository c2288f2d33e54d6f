//! Recorder that plays back a prepared buffer

use anyhow::{Result, bail};

use crate::traits::AudioRecorder;
use crate::types::AudioClip;
use crate::utils::resample_to_16khz;

/// Serves a fixed buffer as if it were arriving from a microphone,
/// `chunk` samples per `recent_samples` call.
#[derive(Debug, Clone)]
pub struct MemoryRecorder {
    samples: Vec<f32>,
    sample_rate: u32,
    chunk: usize,
    cursor: usize,
    recording: bool,
    fail_start: bool,
}

impl MemoryRecorder {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            chunk: 160,
            cursor: 0,
            recording: false,
            fail_start: false,
        }
    }

    pub fn with_chunk(mut self, chunk: usize) -> Self {
        self.chunk = chunk.max(1);
        self
    }

    /// A recorder whose microphone can never be opened.
    pub fn unavailable() -> Self {
        Self {
            fail_start: true,
            ..Self::new(Vec::new(), 16000)
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }
}

impl AudioRecorder for MemoryRecorder {
    fn start(&mut self) -> Result<()> {
        if self.fail_start {
            bail!("No input device available");
        }
        self.cursor = 0;
        self.recording = true;
        Ok(())
    }

    fn recent_samples(&mut self) -> Vec<f32> {
        if !self.recording {
            return Vec::new();
        }
        let end = (self.cursor + self.chunk).min(self.samples.len());
        let block = self.samples[self.cursor..end].to_vec();
        self.cursor = end;
        block
    }

    fn stop(&mut self) -> Result<AudioClip> {
        if !self.recording {
            bail!("Recorder is not running");
        }
        self.recording = false;
        Ok(AudioClip::new(resample_to_16khz(&self.samples, self.sample_rate)))
    }

    fn cancel(&mut self) {
        self.recording = false;
    }
}

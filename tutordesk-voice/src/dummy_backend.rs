//! Recorder used when the crate is built without an audio backend

use anyhow::{Result, anyhow};

use crate::traits::AudioRecorder;
use crate::types::AudioClip;

const UNAVAILABLE: &str = "Audio capture is not available in this build (missing 'backend-cpal' feature)";

#[derive(Debug, Default)]
pub struct DummyRecorder;

impl DummyRecorder {
    pub fn new() -> Result<Self> {
        Ok(Self)
    }
}

impl AudioRecorder for DummyRecorder {
    fn start(&mut self) -> Result<()> {
        Err(anyhow!(UNAVAILABLE))
    }

    fn recent_samples(&mut self) -> Vec<f32> {
        Vec::new()
    }

    fn stop(&mut self) -> Result<AudioClip> {
        Err(anyhow!(UNAVAILABLE))
    }

    fn cancel(&mut self) {}
}

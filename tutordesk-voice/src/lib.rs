//! Voice input for the compose box
//!
//! This crate provides:
//! - `VoiceCapturePipeline`: record, meter, transcribe, append to compose text
//! - Audio capture via `cpal` (feature: `backend-cpal`), otherwise a recorder
//!   that reports capture as unavailable
//! - `MemoryRecorder` for tests and demos
//! - `HttpTranscriber`, which uploads clips to the console backend

pub mod level;
pub mod memory_backend;
pub mod pipeline;
pub mod traits;
pub mod transcription;
pub mod types;
pub mod utils;

#[cfg(feature = "backend-cpal")]
pub mod cpal_backend;

#[cfg(not(feature = "backend-cpal"))]
pub mod dummy_backend;

pub use level::LevelMeter;
pub use memory_backend::MemoryRecorder;
pub use pipeline::{CaptureState, ToggleOutcome, VoiceCapturePipeline, VoiceError};
pub use traits::{AudioRecorder, Transcriber};
pub use transcription::HttpTranscriber;
pub use types::AudioClip;

// Default backend export
#[cfg(feature = "backend-cpal")]
pub use cpal_backend::CpalRecorder as SystemRecorder;

#[cfg(not(feature = "backend-cpal"))]
pub use dummy_backend::DummyRecorder as SystemRecorder;

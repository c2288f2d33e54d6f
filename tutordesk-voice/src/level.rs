use crate::utils::rms;

/// Speech rarely exceeds this RMS; it maps to a full meter.
const FULL_SCALE_RMS: f32 = 0.25;
const DEFAULT_SMOOTHING: f32 = 0.3;

/// Input level on a 0-100 scale, exponentially smoothed so the meter
/// does not flicker between callback buffers.
#[derive(Debug, Clone)]
pub struct LevelMeter {
    smoothing: f32,
    level: f32,
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new(DEFAULT_SMOOTHING)
    }
}

impl LevelMeter {
    /// `smoothing` is the weight of each new sample block, in `(0, 1]`.
    pub fn new(smoothing: f32) -> Self {
        Self {
            smoothing: smoothing.clamp(f32::EPSILON, 1.0),
            level: 0.0,
        }
    }

    /// Fold a block of samples into the meter and return the new level.
    /// An empty block decays toward silence.
    pub fn push(&mut self, samples: &[f32]) -> u8 {
        let raw = (rms(samples) / FULL_SCALE_RMS * 100.0).min(100.0);
        self.level += self.smoothing * (raw - self.level);
        self.level()
    }

    pub fn level(&self) -> u8 {
        self.level.round().clamp(0.0, 100.0) as u8
    }

    pub fn reset(&mut self) {
        self.level = 0.0;
    }
}

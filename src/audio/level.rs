//! Inbound loudness meter
//!
//! Tracks a `0.0..=1.0` level fed by the RMS of each inbound audio chunk and
//! decayed on every periodic tick, so the reported level falls toward zero
//! when nothing is playing.

use super::pipeline;

/// Multiplier applied per tick; at a 100ms tick this drains a full-scale
/// level in roughly a second.
const DECAY: f32 = 0.8;

/// Below this the level snaps to zero instead of decaying forever.
const FLOOR: f32 = 1e-3;

#[derive(Debug, Default)]
pub struct LevelMeter {
    level: f32,
}

impl LevelMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one inbound PCM16 chunk. The level rises immediately to the
    /// chunk's RMS when it is louder than the current value.
    pub fn observe_pcm(&mut self, samples: &[i16]) {
        let floats = pipeline::pcm16_to_f32(samples);
        let rms = pipeline::rms(&floats).min(1.0);
        if rms > self.level {
            self.level = rms;
        }
    }

    /// Apply one decay step and return the current level.
    pub fn tick(&mut self) -> f32 {
        self.level *= DECAY;
        if self.level < FLOOR {
            self.level = 0.0;
        }
        self.level
    }

    pub fn reset(&mut self) {
        self.level = 0.0;
    }
}

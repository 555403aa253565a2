//! Gain stage with a live signal-level reading.
//!
//! A `LevelMeter` sits on the capture path and another on the playback mix.
//! Handles are cheap clones over atomics so device callbacks and any
//! downstream visualizer can share them.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, Clone)]
pub struct LevelMeter {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    gain: AtomicU32,
    level: AtomicU32,
}

impl LevelMeter {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                gain: AtomicU32::new(1.0f32.to_bits()),
                level: AtomicU32::new(0.0f32.to_bits()),
            }),
        }
    }

    pub fn gain(&self) -> f32 {
        f32::from_bits(self.inner.gain.load(Ordering::Relaxed))
    }

    pub fn set_gain(&self, gain: f32) {
        self.inner.gain.store(gain.max(0.0).to_bits(), Ordering::Relaxed);
    }

    /// RMS level of the most recent block passed through [`LevelMeter::process`].
    pub fn level(&self) -> f32 {
        f32::from_bits(self.inner.level.load(Ordering::Relaxed))
    }

    /// Applies the gain in place and records the block's RMS level.
    pub fn process(&self, samples: &mut [f32]) {
        let gain = self.gain();
        let mut sum = 0.0f32;
        for sample in samples.iter_mut() {
            *sample *= gain;
            sum += *sample * *sample;
        }
        let rms = if samples.is_empty() {
            0.0
        } else {
            (sum / samples.len() as f32).sqrt()
        };
        self.inner.level.store(rms.to_bits(), Ordering::Relaxed);
    }
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new()
    }
}

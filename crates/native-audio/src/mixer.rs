//! Sample-accurate mix of scheduled playback sources.
//!
//! The mixer's clock is the number of frames the device has pulled, so
//! "current time" is exactly what has been rendered so far.

use live_voice_core::level::LevelMeter;
use live_voice_core::scheduler::SourceId;
use tokio::sync::mpsc;
use tracing::trace;

struct Voice {
    id: SourceId,
    start_frame: u64,
    samples: Vec<f32>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

pub struct Mixer {
    sample_rate: u32,
    channels: usize,
    frames_rendered: u64,
    voices: Vec<Voice>,
    meter: LevelMeter,
    ended_tx: mpsc::UnboundedSender<SourceId>,
}

impl Mixer {
    pub fn new(
        sample_rate: u32,
        channels: u16,
        meter: LevelMeter,
        ended_tx: mpsc::UnboundedSender<SourceId>,
    ) -> Self {
        Self {
            sample_rate,
            channels: usize::from(channels.max(1)),
            frames_rendered: 0,
            voices: Vec::new(),
            meter,
            ended_tx,
        }
    }

    pub fn current_time(&self) -> f64 {
        self.frames_rendered as f64 / f64::from(self.sample_rate)
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    /// Adds mono `samples` (already at the device rate) covering
    /// `start_at..start_at + duration` seconds. A start time in the past plays
    /// immediately.
    ///
    /// The sample count is fitted to the frame span so sources scheduled back
    /// to back share their boundary frame exactly.
    pub fn add(&mut self, id: SourceId, mut samples: Vec<f32>, start_at: f64, duration: f64) {
        let start_frame = self.frame_at(start_at);
        let end_frame = self.frame_at(start_at + duration);
        samples.resize(end_frame.saturating_sub(start_frame) as usize, 0.0);
        self.voices.push(Voice {
            id,
            start_frame: start_frame.max(self.frames_rendered),
            samples,
        });
    }

    fn frame_at(&self, seconds: f64) -> u64 {
        (seconds.max(0.0) * f64::from(self.sample_rate)).round() as u64
    }

    /// Removes a source without reporting it as ended.
    pub fn stop(&mut self, id: SourceId) {
        self.voices.retain(|voice| voice.id != id);
    }

    /// Fills an interleaved device buffer and advances the clock.
    pub fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        let frames = out.len() / self.channels;
        let block_start = self.frames_rendered;
        let block_end = block_start + frames as u64;

        for voice in &self.voices {
            if voice.start_frame >= block_end || voice.end_frame() <= block_start {
                continue;
            }
            let first = voice.start_frame.max(block_start);
            let last = voice.end_frame().min(block_end);
            for abs in first..last {
                let sample = voice.samples[(abs - voice.start_frame) as usize];
                let frame = (abs - block_start) as usize;
                for slot in &mut out[frame * self.channels..(frame + 1) * self.channels] {
                    *slot += sample;
                }
            }
        }

        self.meter.process(out);
        self.frames_rendered = block_end;

        let ended_tx = &self.ended_tx;
        self.voices.retain(|voice| {
            if voice.end_frame() <= block_end {
                trace!(source_id = voice.id.0, "Playback source finished");
                // The agent may already be gone during shutdown.
                let _ = ended_tx.send(voice.id);
                false
            } else {
                true
            }
        });
    }
}

//! Gap-free scheduling of decoded playback chunks against an audio clock.

use crate::codec::AudioBuffer;
use std::collections::BTreeMap;
use tracing::debug;

/// Identifies one scheduled playback source on an [`AudioOutput`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceId(pub u64);

/// An output mix with its own clock.
///
/// Implementations must eventually report the id of every source that plays
/// to completion, through whatever channel the agent was wired with; the
/// scheduler is then told via [`PlaybackScheduler::on_source_ended`].
pub trait AudioOutput {
    /// Current audio-clock time in seconds.
    fn current_time(&self) -> f64;

    /// Connects `buffer` to the output mix and starts it at `start_at`.
    fn start_source(&mut self, id: SourceId, buffer: &AudioBuffer, start_at: f64);

    /// Stops a source immediately, wherever it is in its playback.
    fn stop_source(&mut self, id: SourceId);
}

/// A source that is currently scheduled or playing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSource {
    pub id: SourceId,
    pub start_time: f64,
    pub duration: f64,
}

pub struct PlaybackScheduler<O> {
    output: O,
    next_start_time: f64,
    active_sources: BTreeMap<SourceId, ScheduledSource>,
    next_id: u64,
}

impl<O: AudioOutput> PlaybackScheduler<O> {
    pub fn new(output: O) -> Self {
        Self {
            output,
            next_start_time: 0.0,
            active_sources: BTreeMap::new(),
            next_id: 0,
        }
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn active_sources(&self) -> impl Iterator<Item = &ScheduledSource> {
        self.active_sources.values()
    }

    pub fn active_count(&self) -> usize {
        self.active_sources.len()
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    /// Schedules `buffer` to start exactly where the previous chunk ends, or
    /// now if the cursor has fallen behind the clock.
    pub fn on_chunk_ready(&mut self, buffer: AudioBuffer) -> ScheduledSource {
        self.next_start_time = self.next_start_time.max(self.output.current_time());

        let id = SourceId(self.next_id);
        self.next_id += 1;
        let source = ScheduledSource {
            id,
            start_time: self.next_start_time,
            duration: buffer.duration(),
        };

        self.output.start_source(id, &buffer, source.start_time);
        self.next_start_time += source.duration;
        self.active_sources.insert(id, source);
        debug!(
            source_id = id.0,
            start_time = source.start_time,
            duration = source.duration,
            "Scheduled playback source"
        );
        source
    }

    /// Stops every active source and rewinds the cursor so the next chunk
    /// starts at the current clock. Returns how many sources were stopped.
    pub fn on_interrupt(&mut self) -> usize {
        let sources = std::mem::take(&mut self.active_sources);
        for id in sources.keys() {
            self.output.stop_source(*id);
        }
        self.next_start_time = 0.0;
        if !sources.is_empty() {
            debug!(stopped = sources.len(), "Playback interrupted");
        }
        sources.len()
    }

    /// Forgets a source that played to completion.
    pub fn on_source_ended(&mut self, id: SourceId) {
        self.active_sources.remove(&id);
    }

    /// Re-anchors the cursor to the audio clock. Used once, when the agent starts.
    pub fn reset(&mut self) {
        self.next_start_time = self.output.current_time();
    }
}

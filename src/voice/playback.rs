//! Gapless playback scheduling of model audio.
//!
//! Model audio arrives as a stream of small chunks. Each chunk is started
//! at `next_start_time` on the output clock, which then advances by the
//! chunk's duration, so chunks play back to back in arrival order. On
//! barge-in every live source is stopped and the cursor resets to zero;
//! the next chunk then starts at whatever the output clock reads.

use std::collections::BTreeMap;

use super::pcm::AudioBuffer;
use crate::error::{LiveError, Result};

/// Handle for one buffer started on an [`OutputContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceId(pub u64);

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "src-{}", self.0)
    }
}

/// Called by an output context when a source finishes on its own.
///
/// Not called for sources ended through [`OutputContext::stop`].
pub type EndedCallback = Box<dyn Fn(SourceId) + Send + Sync>;

/// A speaker-side audio context with its own monotonic clock.
pub trait OutputContext: Send {
    /// Rate the context expects buffers at.
    fn sample_rate(&self) -> u32;

    /// Output clock in seconds.
    fn current_time(&self) -> f64;

    /// Start `buffer` at `when` seconds on the output clock. A time in the
    /// past starts immediately.
    fn start_at(&mut self, buffer: AudioBuffer, when: f64) -> Result<SourceId>;

    /// Stop a source early. Unknown ids are ignored.
    fn stop(&mut self, id: SourceId);

    /// Release the device. Further calls are no-ops.
    fn close(&mut self);
}

/// One scheduled chunk of model audio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackUnit {
    pub id: SourceId,
    /// Start time on the output clock, seconds.
    pub start_time: f64,
    /// Seconds.
    pub duration: f64,
}

/// Owns the playback cursor and the set of sources still playing.
pub struct PlaybackScheduler {
    output: Option<Box<dyn OutputContext>>,
    next_start_time: f64,
    live: BTreeMap<SourceId, PlaybackUnit>,
}

impl PlaybackScheduler {
    pub fn new(output: Box<dyn OutputContext>) -> Self {
        Self {
            output: Some(output),
            next_start_time: 0.0,
            live: BTreeMap::new(),
        }
    }

    /// Schedule `audio` right after everything already queued, or now if
    /// the queue has drained.
    pub fn schedule_unit(&mut self, audio: AudioBuffer) -> Result<PlaybackUnit> {
        let output = self
            .output
            .as_mut()
            .ok_or_else(|| LiveError::device("output context already closed"))?;

        let now = output.current_time();
        self.next_start_time = self.next_start_time.max(now);

        let start_time = self.next_start_time;
        let duration = audio.duration();
        let id = output.start_at(audio, start_time)?;

        self.next_start_time += duration;
        let unit = PlaybackUnit {
            id,
            start_time,
            duration,
        };
        self.live.insert(id, unit);

        tracing::debug!(
            source = %id,
            start = start_time,
            duration = duration,
            live = self.live.len(),
            "Scheduled playback unit"
        );
        Ok(unit)
    }

    /// Natural completion of a source. Unknown ids are ignored.
    pub fn on_unit_ended(&mut self, id: SourceId) {
        if self.live.remove(&id).is_some() {
            tracing::trace!(source = %id, live = self.live.len(), "Playback unit ended");
        }
    }

    /// Stop every live source and reset the cursor. Safe to call repeatedly.
    pub fn interrupt(&mut self) {
        let stopped = self.live.len();
        if let Some(output) = self.output.as_mut() {
            for id in self.live.keys() {
                output.stop(*id);
            }
        }
        self.live.clear();
        self.next_start_time = 0.0;
        if stopped > 0 {
            tracing::debug!(stopped = stopped, "Playback interrupted");
        }
    }

    /// Stop everything and release the output device.
    pub fn shutdown(&mut self) {
        self.interrupt();
        if let Some(mut output) = self.output.take() {
            output.close();
            tracing::debug!("Playback output closed");
        }
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn is_live(&self, id: SourceId) -> bool {
        self.live.contains_key(&id)
    }

    pub fn is_shut_down(&self) -> bool {
        self.output.is_none()
    }

    /// Output clock, or `None` once shut down.
    pub fn current_time(&self) -> Option<f64> {
        self.output.as_ref().map(|o| o.current_time())
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

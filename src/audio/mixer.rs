//! Sample-accurate output mixer.
//!
//! The number of frames rendered so far is the output clock. Each voice
//! starts at the frame its scheduled time maps to, so back-to-back units
//! join without a gap or overlap.

use crate::voice::playback::SourceId;

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
    channels: u16,
    clock: u64,
    voices: Vec<Voice>,
}

impl Mixer {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            channels: channels.max(1),
            clock: 0,
            voices: Vec::new(),
        }
    }

    /// Seconds rendered so far.
    pub fn current_time(&self) -> f64 {
        self.clock as f64 / f64::from(self.sample_rate)
    }

    /// Queue mono `samples` (at the mixer rate) to start at `when` seconds.
    /// A start time already in the past begins at the next rendered frame.
    pub fn schedule(&mut self, id: SourceId, samples: Vec<f32>, when: f64) {
        let requested = (when.max(0.0) * f64::from(self.sample_rate)).round() as u64;
        self.voices.push(Voice {
            id,
            start_frame: requested.max(self.clock),
            samples,
        });
    }

    /// Silence a voice immediately. Returns whether it was still queued.
    pub fn stop(&mut self, id: SourceId) -> bool {
        let before = self.voices.len();
        self.voices.retain(|v| v.id != id);
        self.voices.len() != before
    }

    pub fn clear(&mut self) {
        self.voices.clear();
    }

    pub fn active(&self) -> usize {
        self.voices.len()
    }

    /// Fill an interleaved output buffer and advance the clock.
    ///
    /// Returns the voices that played to their end during this block.
    pub fn render(&mut self, out: &mut [f32]) -> Vec<SourceId> {
        out.fill(0.0);
        let channels = usize::from(self.channels);
        let frames = (out.len() / channels) as u64;
        let block_start = self.clock;
        let block_end = block_start + frames;

        for voice in &self.voices {
            let from = voice.start_frame.max(block_start);
            let to = voice.end_frame().min(block_end);
            for frame in from..to {
                let sample = voice.samples[(frame - voice.start_frame) as usize];
                let base = (frame - block_start) as usize * channels;
                for slot in &mut out[base..base + channels] {
                    *slot += sample;
                }
            }
        }
        for slot in out.iter_mut() {
            *slot = slot.clamp(-1.0, 1.0);
        }

        self.clock = block_end;
        let mut finished = Vec::new();
        self.voices.retain(|v| {
            if v.end_frame() <= block_end {
                finished.push(v.id);
                false
            } else {
                true
            }
        });
        finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_advances_by_rendered_frames() {
        let mut mixer = Mixer::new(10, 2);
        let mut out = vec![0.0; 20];
        mixer.render(&mut out);
        assert!((mixer.current_time() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn voice_starts_on_its_frame() {
        let mut mixer = Mixer::new(10, 1);
        mixer.schedule(SourceId(1), vec![0.5; 3], 0.2);

        let mut out = vec![0.0; 6];
        let finished = mixer.render(&mut out);
        assert_eq!(out, vec![0.0, 0.0, 0.5, 0.5, 0.5, 0.0]);
        assert_eq!(finished, vec![SourceId(1)]);
        assert_eq!(mixer.active(), 0);
    }

    #[test]
    fn back_to_back_voices_have_no_gap() {
        let mut mixer = Mixer::new(10, 1);
        mixer.schedule(SourceId(1), vec![0.25; 2], 0.0);
        mixer.schedule(SourceId(2), vec![0.75; 2], 0.2);

        let mut out = vec![0.0; 4];
        mixer.render(&mut out);
        assert_eq!(out, vec![0.25, 0.25, 0.75, 0.75]);
    }

    #[test]
    fn voice_spanning_blocks_finishes_in_later_block() {
        let mut mixer = Mixer::new(10, 1);
        mixer.schedule(SourceId(7), vec![0.1; 5], 0.0);

        let mut out = vec![0.0; 3];
        assert!(mixer.render(&mut out).is_empty());
        assert_eq!(mixer.active(), 1);
        assert_eq!(mixer.render(&mut out), vec![SourceId(7)]);
        assert_eq!(out[2], 0.0);
    }

    #[test]
    fn stopped_voice_is_silent_and_not_reported() {
        let mut mixer = Mixer::new(10, 1);
        mixer.schedule(SourceId(1), vec![0.5; 4], 0.0);
        assert!(mixer.stop(SourceId(1)));
        assert!(!mixer.stop(SourceId(1)));

        let mut out = vec![0.0; 4];
        assert!(mixer.render(&mut out).is_empty());
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn past_start_time_plays_from_now() {
        let mut mixer = Mixer::new(10, 1);
        let mut out = vec![0.0; 5];
        mixer.render(&mut out);

        mixer.schedule(SourceId(2), vec![0.5; 2], 0.1);
        mixer.render(&mut out);
        assert_eq!(out, vec![0.5, 0.5, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn overlapping_voices_sum_and_clip() {
        let mut mixer = Mixer::new(10, 2);
        mixer.schedule(SourceId(1), vec![0.75; 1], 0.0);
        mixer.schedule(SourceId(2), vec![0.75; 1], 0.0);

        let mut out = vec![0.0; 2];
        mixer.render(&mut out);
        assert_eq!(out, vec![1.0, 1.0]);
    }
}

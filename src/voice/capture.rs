//! Microphone capture: fixed-size windows of raw samples.
//!
//! The pipe attaches a tap to an open microphone stream and re-frames
//! whatever block sizes the device delivers into windows of exactly
//! `chunk_samples`. Encoding is left to the caller.

use crate::error::{LiveError, Result};

/// Receives raw device-side sample blocks. Runs on the audio thread.
pub type SampleTap = Box<dyn FnMut(&[f32]) + Send>;

/// An acquired microphone delivering mono float samples at a fixed rate.
pub trait MicrophoneStream: Send {
    /// Rate of the samples handed to the tap.
    fn sample_rate(&self) -> u32;

    /// Route incoming samples to `tap`, replacing any previous tap.
    fn attach(&mut self, tap: SampleTap) -> Result<()>;

    /// Stop routing samples. The device stays open.
    fn detach(&mut self);

    /// Close the device. Further calls are no-ops.
    fn release(&mut self);
}

/// One capture window.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Re-frames arbitrary sample blocks into fixed-size windows.
#[derive(Debug)]
pub struct ChunkWindow {
    size: usize,
    pending: Vec<f32>,
}

impl ChunkWindow {
    pub fn new(size: usize) -> Self {
        Self {
            size: size.max(1),
            pending: Vec::with_capacity(size.max(1)),
        }
    }

    /// Append `samples`, calling `emit` once per completed window.
    pub fn push(&mut self, mut samples: &[f32], mut emit: impl FnMut(Vec<f32>)) {
        while !samples.is_empty() {
            let take = (self.size - self.pending.len()).min(samples.len());
            self.pending.extend_from_slice(&samples[..take]);
            samples = &samples[take..];
            if self.pending.len() == self.size {
                let full = std::mem::replace(&mut self.pending, Vec::with_capacity(self.size));
                emit(full);
            }
        }
    }

    /// Samples waiting for the current window to fill.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Owns the microphone for the lifetime of a session.
pub struct CapturePipe {
    mic: Option<Box<dyn MicrophoneStream>>,
}

impl CapturePipe {
    /// Attach a windowed tap to `mic`. `on_chunk` runs synchronously on the
    /// audio thread for every full window.
    pub fn start<F>(mut mic: Box<dyn MicrophoneStream>, chunk_samples: usize, on_chunk: F) -> Result<Self>
    where
        F: FnMut(AudioChunk) + Send + 'static,
    {
        if chunk_samples == 0 {
            mic.release();
            return Err(LiveError::configuration("chunk size must be non-zero"));
        }

        let sample_rate = mic.sample_rate();
        let mut window = ChunkWindow::new(chunk_samples);
        let mut on_chunk = on_chunk;
        let tap: SampleTap = Box::new(move |samples: &[f32]| {
            window.push(samples, |full| {
                on_chunk(AudioChunk {
                    samples: full,
                    sample_rate,
                });
            });
        });

        if let Err(e) = mic.attach(tap) {
            mic.release();
            return Err(e);
        }

        tracing::debug!(sample_rate = sample_rate, chunk_samples = chunk_samples, "Capture started");
        Ok(Self { mic: Some(mic) })
    }

    /// Detach the tap and release the microphone. Idempotent.
    pub fn stop(&mut self) {
        if let Some(mut mic) = self.mic.take() {
            mic.detach();
            mic.release();
            tracing::debug!("Capture stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.mic.is_some()
    }
}

impl Drop for CapturePipe {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockMicrophone;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn window_emits_exact_sizes() {
        let mut window = ChunkWindow::new(4);
        let mut out = Vec::new();
        window.push(&[1.0, 2.0, 3.0], |c| out.push(c));
        assert!(out.is_empty());
        window.push(&[4.0, 5.0, 6.0, 7.0, 8.0, 9.0], |c| out.push(c));
        assert_eq!(out, vec![vec![1.0, 2.0, 3.0, 4.0], vec![5.0, 6.0, 7.0, 8.0]]);
        assert_eq!(window.pending(), 1);
    }

    #[test]
    fn pipe_delivers_full_windows_in_order() {
        let (mic, probe) = MockMicrophone::new(16_000);
        let chunks = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&chunks);

        let _pipe = CapturePipe::start(Box::new(mic), 4096, move |chunk| {
            sink.lock().push(chunk);
        })
        .unwrap();

        // Device blocks of 1000 samples: 5000 in, one full window out.
        for i in 0..5 {
            probe.speak(&vec![i as f32 / 10.0; 1000]);
        }

        let chunks = chunks.lock();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].samples.len(), 4096);
        assert_eq!(chunks[0].sample_rate, 16_000);
        assert_eq!(chunks[0].samples[0], 0.0);
        assert_eq!(chunks[0].samples[4095], 0.4);
    }

    #[test]
    fn stop_releases_microphone_once() {
        let (mic, probe) = MockMicrophone::new(16_000);
        let mut pipe = CapturePipe::start(Box::new(mic), 16, |_| {}).unwrap();
        assert!(probe.is_attached());

        pipe.stop();
        pipe.stop();
        assert!(!pipe.is_running());
        assert!(!probe.is_attached());
        assert_eq!(probe.release_count(), 1);
    }

    #[test]
    fn samples_after_stop_are_not_delivered() {
        let (mic, probe) = MockMicrophone::new(16_000);
        let count = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&count);
        let mut pipe = CapturePipe::start(Box::new(mic), 4, move |_| {
            *sink.lock() += 1;
        })
        .unwrap();

        probe.speak(&[0.0; 4]);
        pipe.stop();
        probe.speak(&[0.0; 4]);
        assert_eq!(*count.lock(), 1);
    }

    #[test]
    fn drop_releases_microphone() {
        let (mic, probe) = MockMicrophone::new(16_000);
        let pipe = CapturePipe::start(Box::new(mic), 16, |_| {}).unwrap();
        drop(pipe);
        assert_eq!(probe.release_count(), 1);
    }

    #[test]
    fn zero_chunk_size_rejected_and_mic_released() {
        let (mic, probe) = MockMicrophone::new(16_000);
        let result = CapturePipe::start(Box::new(mic), 0, |_| {});
        assert!(matches!(result, Err(LiveError::Configuration { .. })));
        assert_eq!(probe.release_count(), 1);
    }
}

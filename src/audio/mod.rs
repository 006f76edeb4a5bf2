//! Platform audio devices.
//!
//! The conversation core only sees [`AudioDevices`]: something that can
//! hand out a microphone at a chosen rate and an output context at a
//! chosen rate. The cpal backend is behind the `cpal-audio` feature.

use async_trait::async_trait;

use crate::error::Result;
use crate::voice::capture::MicrophoneStream;
use crate::voice::playback::{EndedCallback, OutputContext};

#[cfg(feature = "cpal-audio")]
pub mod cpal_backend;
#[cfg(feature = "cpal-audio")]
pub mod mixer;
#[cfg(feature = "cpal-audio")]
pub mod resample;

#[cfg(feature = "cpal-audio")]
pub use cpal_backend::CpalDevices;

/// Source of microphone and speaker handles for one controller.
#[async_trait]
pub trait AudioDevices: Send {
    /// Acquire the microphone, delivering mono samples at `sample_rate`.
    ///
    /// Fails with a permission error when no input is available or
    /// access is refused.
    async fn request_microphone(&mut self, sample_rate: u32) -> Result<Box<dyn MicrophoneStream>>;

    /// Open a speaker-side context accepting buffers at `sample_rate`.
    ///
    /// `on_ended` fires for every source that finishes playing on its own.
    async fn open_output(
        &mut self,
        sample_rate: u32,
        on_ended: EndedCallback,
    ) -> Result<Box<dyn OutputContext>>;
}

/// Average interleaved frames down to one channel.
pub fn downmix_to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    let channels = usize::from(channels.max(1));
    if channels == 1 {
        return data.to_vec();
    }
    data.chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

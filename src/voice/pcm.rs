//! PCM codec: float samples to and from 16-bit little-endian wire audio.
//!
//! Capture audio goes out as signed 16-bit little-endian PCM; model audio
//! comes back in the same format. Scaling is by 32768 in both directions,
//! so a round trip loses at most one quantization step.

use crate::error::{LiveError, Result};

/// Scale between float samples and signed 16-bit integers.
const PCM_SCALE: f32 = 32768.0;

/// Encode float samples as 16-bit little-endian PCM.
///
/// Samples are clamped to `[-1.0, 1.0]` first. The float-to-int cast
/// saturates, so `1.0` lands on `i16::MAX`.
pub fn encode(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * PCM_SCALE) as i16;
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Decode 16-bit little-endian PCM back to floats in `[-1.0, 1.0)`.
pub fn decode(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 2 != 0 {
        return Err(LiveError::decode(format!(
            "PCM16 payload has odd length {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / PCM_SCALE)
        .collect())
}

/// Decoded audio ready to hand to an output context.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Frames per second.
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved samples, `frames * channels` long.
    pub samples: Vec<f32>,
}

impl AudioBuffer {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / usize::from(self.channels)
    }

    /// Length in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / f64::from(self.sample_rate)
    }
}

/// Build a playable buffer from a raw network payload.
///
/// Fails with a decode error when the payload is not a whole number of
/// 16-bit samples or does not divide evenly into `channels`.
pub fn decode_to_playable(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<AudioBuffer> {
    if channels == 0 {
        return Err(LiveError::decode("channel count must be at least 1"));
    }
    let samples = decode(bytes)?;
    if samples.len() % usize::from(channels) != 0 {
        return Err(LiveError::decode(format!(
            "{} samples do not divide into {channels} channels",
            samples.len()
        )));
    }
    Ok(AudioBuffer {
        sample_rate,
        channels,
        samples,
    })
}

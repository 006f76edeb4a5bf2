//! Sample-rate conversion with rubato.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use std::collections::VecDeque;

use crate::error::{LiveError, Result};

/// Input frames consumed per streaming step.
const STREAM_CHUNK: usize = 1024;

/// Source frames rendered per step on the output side. Small, since the
/// output clock runs ahead of the speaker by about this much.
const PULL_CHUNK: usize = 256;

fn sinc_params() -> SincInterpolationParameters {
    SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    }
}

fn build(from: u32, to: u32, chunk: usize) -> Result<SincFixedIn<f32>> {
    SincFixedIn::<f32>::new(
        f64::from(to) / f64::from(from),
        2.0,
        sinc_params(),
        chunk,
        1,
    )
    .map_err(|e| LiveError::device(format!("resampler {from}->{to} Hz: {e}")))
}

/// Incremental mono resampler for device callbacks, which deliver
/// arbitrarily sized blocks.
pub struct StreamResampler {
    inner: Option<SincFixedIn<f32>>,
    pending: Vec<f32>,
}

impl StreamResampler {
    pub fn new(from: u32, to: u32) -> Result<Self> {
        let inner = if from == to {
            None
        } else {
            Some(build(from, to, STREAM_CHUNK)?)
        };
        Ok(Self {
            inner,
            pending: Vec::new(),
        })
    }

    /// Feed samples, returning whatever output is ready.
    pub fn push(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(resampler) = self.inner.as_mut() else {
            return samples.to_vec();
        };
        self.pending.extend_from_slice(samples);

        let mut out = Vec::new();
        loop {
            let needed = resampler.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let chunk: Vec<f32> = self.pending.drain(..needed).collect();
            match resampler.process(&[chunk], None) {
                Ok(mut waves) => {
                    if let Some(wave) = waves.pop() {
                        out.extend(wave);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping capture block, resample failed");
                }
            }
        }
        out
    }

    /// Samples waiting for a full step.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Output-side resampler. Fills exactly the number of frames a device
/// callback asks for, rendering source frames on demand through `pull`.
///
/// One instance lives as long as the output stream, so the filter state
/// carries across callbacks and across scheduled units.
pub struct PullResampler {
    inner: Option<SincFixedIn<f32>>,
    source: Vec<f32>,
    ready: VecDeque<f32>,
}

impl PullResampler {
    pub fn new(from: u32, to: u32) -> Result<Self> {
        let inner = if from == to {
            None
        } else {
            Some(build(from, to, PULL_CHUNK)?)
        };
        Ok(Self {
            inner,
            source: Vec::with_capacity(PULL_CHUNK),
            ready: VecDeque::new(),
        })
    }

    pub fn fill<F>(&mut self, out: &mut [f32], mut pull: F)
    where
        F: FnMut(&mut [f32]),
    {
        let Some(resampler) = self.inner.as_mut() else {
            pull(out);
            return;
        };

        while self.ready.len() < out.len() {
            let needed = resampler.input_frames_next();
            self.source.clear();
            self.source.resize(needed, 0.0);
            pull(&mut self.source);

            let produced = match resampler.process(&[self.source.as_slice()], None) {
                Ok(mut waves) => waves.pop().unwrap_or_default(),
                Err(e) => {
                    tracing::warn!(error = %e, "Playback resample failed, emitting silence");
                    Vec::new()
                }
            };
            if produced.is_empty() {
                self.ready.resize(out.len(), 0.0);
                break;
            }
            self.ready.extend(produced);
        }

        for slot in out.iter_mut() {
            *slot = self.ready.pop_front().unwrap_or(0.0);
        }
    }

    /// Output frames already computed but not yet handed out.
    pub fn buffered(&self) -> usize {
        self.ready.len()
    }
}

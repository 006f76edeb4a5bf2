//! cpal-backed microphone and speaker.
//!
//! cpal streams are not `Send` on every platform, so each stream is built,
//! played and dropped on its own thread. The handles returned here only
//! hold a stop signal and the shared state the stream callback reads.

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::oneshot;

use super::mixer::Mixer;
use super::resample::{PullResampler, StreamResampler};
use super::{downmix_to_mono, AudioDevices};
use crate::config::AudioConfig;
use crate::error::{LiveError, Result};
use crate::voice::capture::{MicrophoneStream, SampleTap};
use crate::voice::pcm::AudioBuffer;
use crate::voice::playback::{EndedCallback, OutputContext, SourceId};

/// Default host devices, or the named ones from `[audio]`.
pub struct CpalDevices {
    input_device: Option<String>,
    output_device: Option<String>,
}

impl CpalDevices {
    pub fn new(input_device: Option<String>, output_device: Option<String>) -> Self {
        Self {
            input_device,
            output_device,
        }
    }

    pub fn from_config(config: &AudioConfig) -> Self {
        Self::new(config.input_device.clone(), config.output_device.clone())
    }
}

#[async_trait]
impl AudioDevices for CpalDevices {
    async fn request_microphone(&mut self, sample_rate: u32) -> Result<Box<dyn MicrophoneStream>> {
        let mic = CpalMicrophone::open(self.input_device.clone(), sample_rate).await?;
        Ok(Box::new(mic))
    }

    async fn open_output(
        &mut self,
        sample_rate: u32,
        on_ended: EndedCallback,
    ) -> Result<Box<dyn OutputContext>> {
        let output = CpalOutput::open(self.output_device.clone(), sample_rate, on_ended).await?;
        Ok(Box::new(output))
    }
}

// ── Stream thread ────────────────────────────────────────────────

/// Owns one cpal stream on a dedicated thread until stopped.
struct StreamWorker {
    stop: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl StreamWorker {
    /// Run `build` on a new thread, play the stream it returns and hand
    /// back the accompanying value once playback has started.
    async fn spawn<T, F>(name: &str, build: F) -> Result<(Self, T)>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<(cpal::Stream, T)> + Send + 'static,
    {
        let (ready_tx, ready_rx) = oneshot::channel::<Result<T>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let (stream, value) = match build() {
                    Ok(built) => built,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(LiveError::device(format!("stream start: {e}"))));
                    return;
                }
                if ready_tx.send(Ok(value)).is_err() {
                    return;
                }
                // Blocks until the handle signals or is dropped.
                let _ = stop_rx.recv();
                drop(stream);
            })?;

        let value = ready_rx
            .await
            .map_err(|_| LiveError::device(format!("{name} thread exited during setup")))??;

        Ok((
            Self {
                stop: Some(stop_tx),
                thread: Some(thread),
            },
            value,
        ))
    }

    fn shutdown(&mut self) {
        self.stop.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("Audio stream thread panicked");
            }
        }
    }
}

impl Drop for StreamWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn find_device<I>(devices: I, name: &str) -> Option<cpal::Device>
where
    I: Iterator<Item = cpal::Device>,
{
    devices.into_iter().find(|d| d.name().ok().as_deref() == Some(name))
}

// ── Microphone ───────────────────────────────────────────────────

pub struct CpalMicrophone {
    sample_rate: u32,
    tap: Arc<Mutex<Option<SampleTap>>>,
    worker: Option<StreamWorker>,
}

impl CpalMicrophone {
    async fn open(device_name: Option<String>, sample_rate: u32) -> Result<Self> {
        let tap: Arc<Mutex<Option<SampleTap>>> = Arc::new(Mutex::new(None));
        let callback_tap = Arc::clone(&tap);

        let (worker, ()) = StreamWorker::spawn("lingolive-capture", move || {
            build_input(device_name.as_deref(), sample_rate, callback_tap)
        })
        .await?;

        Ok(Self {
            sample_rate,
            tap,
            worker: Some(worker),
        })
    }
}

fn build_input(
    device_name: Option<&str>,
    target_rate: u32,
    tap: Arc<Mutex<Option<SampleTap>>>,
) -> Result<(cpal::Stream, ())> {
    let host = cpal::default_host();
    let device = match device_name {
        Some(name) => host
            .input_devices()
            .ok()
            .and_then(|devices| find_device(devices, name)),
        None => host.default_input_device(),
    }
    .ok_or_else(|| LiveError::permission("no input device available"))?;

    tracing::info!(
        device = %device.name().unwrap_or_default(),
        "Audio input device"
    );

    let config = device
        .default_input_config()
        .map_err(|e| LiveError::permission(format!("input config: {e}")))?;
    let device_rate = config.sample_rate().0;
    let channels = config.channels();
    tracing::info!(
        rate = device_rate,
        channels,
        format = ?config.sample_format(),
        target_rate,
        "Audio input config selected"
    );

    let mut resampler = StreamResampler::new(device_rate, target_rate)?;
    let mut deliver = move |mono: Vec<f32>| {
        let samples = resampler.push(&mono);
        if samples.is_empty() {
            return;
        }
        if let Some(tap) = tap.lock().as_mut() {
            tap(&samples);
        }
    };

    let err_fn = |err: cpal::StreamError| tracing::error!(error = %err, "Audio input stream error");
    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &config.into(),
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                deliver(downmix_to_mono(data, channels));
            },
            err_fn,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_input_stream(
            &config.into(),
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let floats: Vec<f32> = data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                deliver(downmix_to_mono(&floats, channels));
            },
            err_fn,
            None,
        ),
        other => {
            return Err(LiveError::device(format!(
                "unsupported input sample format {other:?}"
            )))
        }
    }
    .map_err(|e| LiveError::permission(format!("input stream: {e}")))?;

    Ok((stream, ()))
}

impl MicrophoneStream for CpalMicrophone {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn attach(&mut self, tap: SampleTap) -> Result<()> {
        if self.worker.is_none() {
            return Err(LiveError::device("microphone already released"));
        }
        *self.tap.lock() = Some(tap);
        Ok(())
    }

    fn detach(&mut self) {
        self.tap.lock().take();
    }

    fn release(&mut self) {
        self.detach();
        if let Some(mut worker) = self.worker.take() {
            worker.shutdown();
            tracing::debug!("Microphone released");
        }
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        self.release();
    }
}

// ── Speaker ──────────────────────────────────────────────────────

/// Speaker output. Units are mixed at the logical playback rate, and the
/// mixed stream is resampled once to the device rate in the callback.
pub struct CpalOutput {
    sample_rate: u32,
    mixer: Arc<Mutex<Mixer>>,
    next_id: u64,
    worker: Option<StreamWorker>,
}

impl CpalOutput {
    async fn open(
        device_name: Option<String>,
        sample_rate: u32,
        on_ended: EndedCallback,
    ) -> Result<Self> {
        let (worker, mixer) = StreamWorker::spawn("lingolive-playback", move || {
            build_output(device_name.as_deref(), sample_rate, on_ended)
        })
        .await?;

        Ok(Self {
            sample_rate,
            mixer,
            next_id: 0,
            worker: Some(worker),
        })
    }
}

fn build_output(
    device_name: Option<&str>,
    sample_rate: u32,
    on_ended: EndedCallback,
) -> Result<(cpal::Stream, Arc<Mutex<Mixer>>)> {
    let host = cpal::default_host();
    let device = match device_name {
        Some(name) => host
            .output_devices()
            .ok()
            .and_then(|devices| find_device(devices, name)),
        None => host.default_output_device(),
    }
    .ok_or_else(|| LiveError::device("no output device available"))?;

    let config = device
        .default_output_config()
        .map_err(|e| LiveError::device(format!("output config: {e}")))?;
    let device_rate = config.sample_rate().0;
    let channels = config.channels();
    tracing::info!(
        device = %device.name().unwrap_or_default(),
        rate = device_rate,
        channels,
        format = ?config.sample_format(),
        mix_rate = sample_rate,
        "Audio output config selected"
    );

    let mixer = Arc::new(Mutex::new(Mixer::new(sample_rate, 1)));
    let render_mixer = Arc::clone(&mixer);
    let mut resampler = PullResampler::new(sample_rate, device_rate)?;
    let stride = usize::from(channels.max(1));
    let mut mono: Vec<f32> = Vec::new();
    let mut finished: Vec<SourceId> = Vec::new();
    let mut render = move |out: &mut [f32]| {
        mono.resize(out.len() / stride, 0.0);
        resampler.fill(&mut mono, |block| {
            finished.extend(render_mixer.lock().render(block));
        });
        for (frame, &sample) in out.chunks_mut(stride).zip(mono.iter()) {
            frame.fill(sample);
        }
        for id in finished.drain(..) {
            on_ended(id);
        }
    };

    let err_fn = |err: cpal::StreamError| tracing::error!(error = %err, "Audio output stream error");
    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => device.build_output_stream(
            &config.into(),
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| render(data),
            err_fn,
            None,
        ),
        cpal::SampleFormat::I16 => {
            let mut scratch: Vec<f32> = Vec::new();
            device.build_output_stream(
                &config.into(),
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    scratch.resize(data.len(), 0.0);
                    render(&mut scratch);
                    for (dst, &src) in data.iter_mut().zip(scratch.iter()) {
                        *dst = (src * 32767.0) as i16;
                    }
                },
                err_fn,
                None,
            )
        }
        other => {
            return Err(LiveError::device(format!(
                "unsupported output sample format {other:?}"
            )))
        }
    }
    .map_err(|e| LiveError::device(format!("output stream: {e}")))?;

    Ok((stream, mixer))
}

impl OutputContext for CpalOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.mixer.lock().current_time()
    }

    fn start_at(&mut self, buffer: AudioBuffer, when: f64) -> Result<SourceId> {
        if self.worker.is_none() {
            return Err(LiveError::device("output context closed"));
        }
        if buffer.sample_rate != self.sample_rate {
            return Err(LiveError::device(format!(
                "{} Hz buffer on a {} Hz output",
                buffer.sample_rate, self.sample_rate
            )));
        }
        let mono = downmix_to_mono(&buffer.samples, buffer.channels);

        self.next_id += 1;
        let id = SourceId(self.next_id);
        self.mixer.lock().schedule(id, mono, when);
        Ok(id)
    }

    fn stop(&mut self, id: SourceId) {
        self.mixer.lock().stop(id);
    }

    fn close(&mut self) {
        self.mixer.lock().clear();
        if let Some(mut worker) = self.worker.take() {
            worker.shutdown();
            tracing::debug!("Output context closed");
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

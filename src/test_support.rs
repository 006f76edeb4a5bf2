//! In-crate test doubles for devices and the remote service.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

use crate::audio::AudioDevices;
use crate::error::{LiveError, Result};
use crate::voice::capture::{MicrophoneStream, SampleTap};
use crate::voice::controller::ConversationSettings;
use crate::voice::pcm::AudioBuffer;
use crate::voice::playback::{EndedCallback, OutputContext, SourceId};
use crate::voice::transport::{LiveConnector, LiveLink, LiveSessionConfig, OutboundMessage};
use crate::voice::VoiceEvent;

const WAIT: Duration = Duration::from_secs(2);

pub fn test_session_config() -> LiveSessionConfig {
    LiveSessionConfig {
        model: "gemini-test-audio".into(),
        system_instruction: "Respond in the same language the user is speaking.".into(),
        input_transcription: true,
        output_transcription: true,
        voice_name: None,
        vad: None,
        input_sample_rate: 16_000,
        setup_timeout: Duration::from_secs(1),
    }
}

pub fn test_settings() -> ConversationSettings {
    ConversationSettings {
        session: test_session_config(),
        capture_sample_rate: 16_000,
        playback_sample_rate: 24_000,
        chunk_samples: 4096,
    }
}

/// Silent 24 kHz PCM16 of the given length.
pub fn pcm_seconds(seconds: f64) -> Vec<u8> {
    let samples = (seconds * 24_000.0).round() as usize;
    vec![0u8; samples * 2]
}

// ── Microphone ───────────────────────────────────────────────────

#[derive(Default)]
struct MicState {
    tap: Option<SampleTap>,
    released: usize,
}

pub struct MockMicrophone {
    sample_rate: u32,
    state: Arc<Mutex<MicState>>,
}

/// Test-side handle to a [`MockMicrophone`].
#[derive(Clone)]
pub struct MicProbe {
    state: Arc<Mutex<MicState>>,
}

impl MockMicrophone {
    pub fn new(sample_rate: u32) -> (Self, MicProbe) {
        let state = Arc::new(Mutex::new(MicState::default()));
        (
            Self {
                sample_rate,
                state: Arc::clone(&state),
            },
            MicProbe { state },
        )
    }
}

impl MicrophoneStream for MockMicrophone {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn attach(&mut self, tap: SampleTap) -> Result<()> {
        self.state.lock().tap = Some(tap);
        Ok(())
    }

    fn detach(&mut self) {
        self.state.lock().tap = None;
    }

    fn release(&mut self) {
        let mut state = self.state.lock();
        state.tap = None;
        state.released += 1;
    }
}

impl MicProbe {
    /// Deliver samples as the device would.
    pub fn speak(&self, samples: &[f32]) {
        if let Some(tap) = self.state.lock().tap.as_mut() {
            tap(samples);
        }
    }

    pub fn is_attached(&self) -> bool {
        self.state.lock().tap.is_some()
    }

    pub fn release_count(&self) -> usize {
        self.state.lock().released
    }
}

// ── Output ───────────────────────────────────────────────────────

#[derive(Default)]
struct OutputState {
    time: f64,
    next_id: u64,
    started: Vec<(SourceId, f64, f64)>,
    stopped: Vec<SourceId>,
    closed: usize,
    lost: bool,
}

pub struct FakeOutput {
    sample_rate: u32,
    state: Arc<Mutex<OutputState>>,
    on_ended: Arc<Mutex<Option<EndedCallback>>>,
}

/// Test-side handle to a [`FakeOutput`].
#[derive(Clone)]
pub struct OutputProbe {
    state: Arc<Mutex<OutputState>>,
    on_ended: Arc<Mutex<Option<EndedCallback>>>,
}

impl FakeOutput {
    pub fn new(sample_rate: u32) -> (Self, OutputProbe) {
        Self::with_callback(sample_rate, None)
    }

    pub fn with_callback(sample_rate: u32, on_ended: Option<EndedCallback>) -> (Self, OutputProbe) {
        let state = Arc::new(Mutex::new(OutputState::default()));
        let on_ended = Arc::new(Mutex::new(on_ended));
        (
            Self {
                sample_rate,
                state: Arc::clone(&state),
                on_ended: Arc::clone(&on_ended),
            },
            OutputProbe { state, on_ended },
        )
    }
}

impl OutputContext for FakeOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.state.lock().time
    }

    fn start_at(&mut self, buffer: AudioBuffer, when: f64) -> Result<SourceId> {
        let mut state = self.state.lock();
        if state.lost {
            return Err(LiveError::device("output device disconnected"));
        }
        state.next_id += 1;
        let id = SourceId(state.next_id);
        state.started.push((id, when, buffer.duration()));
        Ok(id)
    }

    fn stop(&mut self, id: SourceId) {
        self.state.lock().stopped.push(id);
    }

    fn close(&mut self) {
        self.state.lock().closed += 1;
    }
}

impl OutputProbe {
    pub fn set_time(&self, time: f64) {
        self.state.lock().time = time;
    }

    /// `(id, start time, duration)` in start order.
    pub fn started(&self) -> Vec<(SourceId, f64, f64)> {
        self.state.lock().started.clone()
    }

    pub fn stopped(&self) -> Vec<SourceId> {
        self.state.lock().stopped.clone()
    }

    /// Make every later `start_at` fail as if the device went away.
    pub fn lose_device(&self) {
        self.state.lock().lost = true;
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().closed
    }

    /// Report `id` as having finished on its own.
    pub fn finish(&self, id: SourceId) {
        if let Some(callback) = self.on_ended.lock().as_ref() {
            callback(id);
        }
    }
}

// ── Devices ──────────────────────────────────────────────────────

#[derive(Default)]
struct DeviceState {
    microphone: Option<MicProbe>,
    output: Option<OutputProbe>,
}

pub struct MockDevices {
    deny_microphone: bool,
    fail_output: bool,
    state: Arc<Mutex<DeviceState>>,
}

/// Test-side view of the handles a [`MockDevices`] gave out.
#[derive(Clone)]
pub struct DeviceProbe {
    state: Arc<Mutex<DeviceState>>,
}

impl MockDevices {
    pub fn new() -> (Self, DeviceProbe) {
        Self::build(false, false)
    }

    pub fn denying_microphone() -> (Self, DeviceProbe) {
        Self::build(true, false)
    }

    pub fn failing_output() -> (Self, DeviceProbe) {
        Self::build(false, true)
    }

    fn build(deny_microphone: bool, fail_output: bool) -> (Self, DeviceProbe) {
        let state = Arc::new(Mutex::new(DeviceState::default()));
        (
            Self {
                deny_microphone,
                fail_output,
                state: Arc::clone(&state),
            },
            DeviceProbe { state },
        )
    }
}

#[async_trait]
impl AudioDevices for MockDevices {
    async fn request_microphone(&mut self, sample_rate: u32) -> Result<Box<dyn MicrophoneStream>> {
        if self.deny_microphone {
            return Err(LiveError::permission("user denied microphone access"));
        }
        let (mic, probe) = MockMicrophone::new(sample_rate);
        self.state.lock().microphone = Some(probe);
        Ok(Box::new(mic))
    }

    async fn open_output(
        &mut self,
        sample_rate: u32,
        on_ended: EndedCallback,
    ) -> Result<Box<dyn OutputContext>> {
        if self.fail_output {
            return Err(LiveError::device("no output device"));
        }
        let (output, probe) = FakeOutput::with_callback(sample_rate, Some(on_ended));
        self.state.lock().output = Some(probe);
        Ok(Box::new(output))
    }
}

impl DeviceProbe {
    /// Most recent microphone. Panics if none was handed out.
    pub fn microphone(&self) -> MicProbe {
        self.state
            .lock()
            .microphone
            .clone()
            .expect("no microphone requested")
    }

    /// Most recent output. Panics if none was opened.
    pub fn output(&self) -> OutputProbe {
        self.output_opened().expect("no output opened")
    }

    pub fn output_opened(&self) -> Option<OutputProbe> {
        self.state.lock().output.clone()
    }
}

// ── Remote service ───────────────────────────────────────────────

#[derive(Default)]
struct LinkRecord {
    sent: Vec<OutboundMessage>,
}

/// Test-side handle to one link handed out by [`MockConnector`].
#[derive(Clone)]
pub struct LinkProbe {
    record: Arc<Mutex<LinkRecord>>,
    inbound: Arc<Mutex<Option<mpsc::Sender<VoiceEvent>>>>,
}

impl LinkProbe {
    /// Emit a server event.
    pub fn push(&self, event: VoiceEvent) {
        if let Some(tx) = self.inbound.lock().as_ref() {
            let _ = tx.try_send(event);
        }
    }

    /// Close the server side normally.
    pub fn hang_up(&self) {
        self.inbound.lock().take();
    }

    pub fn audio(&self) -> Vec<Vec<u8>> {
        self.record
            .lock()
            .sent
            .iter()
            .filter_map(|m| match m {
                OutboundMessage::Audio(data) => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn saw_stream_end(&self) -> bool {
        self.record
            .lock()
            .sent
            .iter()
            .any(|m| matches!(m, OutboundMessage::AudioStreamEnd))
    }

    pub fn is_closed(&self) -> bool {
        self.record
            .lock()
            .sent
            .iter()
            .any(|m| matches!(m, OutboundMessage::Close))
    }

    /// Wait until `count` audio chunks have been sent.
    pub async fn wait_for_audio(&self, count: usize) -> Vec<Vec<u8>> {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let audio = self.audio();
            if audio.len() >= count || tokio::time::Instant::now() >= deadline {
                return audio;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub async fn wait_for_close(&self) {
        let deadline = tokio::time::Instant::now() + WAIT;
        while !self.is_closed() {
            assert!(tokio::time::Instant::now() < deadline, "link was never closed");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

enum ConnectMode {
    Succeed,
    Fail(String),
    Gated,
}

/// Connector whose links are in-memory channels.
pub struct MockConnector {
    mode: ConnectMode,
    gate: Notify,
    connects: Mutex<usize>,
    links: Mutex<Vec<LinkProbe>>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Self::with_mode(ConnectMode::Succeed)
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Self::with_mode(ConnectMode::Fail(message.to_string()))
    }

    /// Connects only after [`Self::release`].
    pub fn gated() -> Arc<Self> {
        Self::with_mode(ConnectMode::Gated)
    }

    fn with_mode(mode: ConnectMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            gate: Notify::new(),
            connects: Mutex::new(0),
            links: Mutex::new(Vec::new()),
        })
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }

    pub fn connect_count(&self) -> usize {
        *self.connects.lock()
    }

    pub fn last_link(&self) -> Option<LinkProbe> {
        self.links.lock().last().cloned()
    }
}

#[async_trait]
impl LiveConnector for MockConnector {
    async fn connect(&self, _session_id: &str, _config: &LiveSessionConfig) -> Result<LiveLink> {
        *self.connects.lock() += 1;
        match &self.mode {
            ConnectMode::Fail(message) => return Err(LiveError::connect(message.clone())),
            ConnectMode::Gated => self.gate.notified().await,
            ConnectMode::Succeed => {}
        }

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundMessage>(64);
        let (inbound_tx, inbound_rx) = mpsc::channel::<VoiceEvent>(64);
        let probe = LinkProbe {
            record: Arc::new(Mutex::new(LinkRecord::default())),
            inbound: Arc::new(Mutex::new(Some(inbound_tx))),
        };

        let record = Arc::clone(&probe.record);
        tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                let closing = matches!(msg, OutboundMessage::Close);
                record.lock().sent.push(msg);
                if closing {
                    break;
                }
            }
        });

        self.links.lock().push(probe);
        Ok(LiveLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

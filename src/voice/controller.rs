//! Conversation controller: the session state machine.
//!
//! ```text
//! Idle ──start()──▶ Connecting ──Opened──▶ Active ──stop()/Closed──▶ Idle
//!                        │                    │
//!                        └──failure──▶ Error ◀┘──▶ (teardown) ──▶ Idle
//! ```
//!
//! Every asynchronous outcome (connect result, server events, captured
//! microphone windows, finished playback sources) is posted to one queue
//! as a [`SessionEvent`] tagged with the id of the session that produced
//! it. [`ConversationController::handle_event`] is the only place session
//! state changes, and it ignores anything tagged with a session that is no
//! longer current, so a late open acknowledgement after `stop()` cannot
//! bring a session back.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::capture::{AudioChunk, CapturePipe, MicrophoneStream};
use super::pcm;
use super::playback::{EndedCallback, PlaybackScheduler, SourceId};
use super::transport::{LiveConnector, LiveSessionConfig, SessionTransport};
use super::VoiceEvent;
use crate::audio::AudioDevices;
use crate::config::Config;
use crate::error::{LiveError, Result};

pub const STATUS_INITIALIZING: &str = "Initializing...";
pub const STATUS_REQUESTING_MICROPHONE: &str = "Requesting microphone access...";
pub const STATUS_SETTING_UP_AUDIO: &str = "Setting up audio streams...";
pub const STATUS_CONNECTING: &str = "Connecting to Gemini Live...";

/// Model audio is always mono.
const PLAYBACK_CHANNELS: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationStatus {
    Idle,
    Connecting,
    Active,
    Error,
}

impl std::fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Active => write!(f, "active"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Agent,
}

impl Speaker {
    pub fn label(self) -> &'static str {
        match self {
            Self::User => "You",
            Self::Agent => "Gemini",
        }
    }
}

/// One finalized utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptTurn {
    pub speaker: Speaker,
    pub text: String,
}

/// Notification for UI layers that render reactively.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationUpdate {
    Status {
        status: ConversationStatus,
        message: String,
    },
    TurnFinalized(TranscriptTurn),
    Error(String),
}

/// An asynchronous outcome for a specific session.
#[derive(Debug)]
pub struct SessionEvent {
    pub session_id: Uuid,
    pub kind: SessionEventKind,
}

impl SessionEvent {
    pub fn new(session_id: Uuid, kind: SessionEventKind) -> Self {
        Self { session_id, kind }
    }
}

#[derive(Debug)]
pub enum SessionEventKind {
    /// Remote acknowledged the session.
    Opened,
    ConnectFailed(LiveError),
    Server(VoiceEvent),
    /// One full microphone window.
    Captured(AudioChunk),
    PlaybackEnded(SourceId),
    /// Remote closed the link normally.
    Closed,
}

impl SessionEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Opened => "opened",
            Self::ConnectFailed(_) => "connect_failed",
            Self::Server(event) => event.name(),
            Self::Captured(_) => "captured",
            Self::PlaybackEnded(_) => "playback_ended",
            Self::Closed => "closed",
        }
    }
}

/// Everything a session needs besides the devices and the connector.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationSettings {
    pub session: LiveSessionConfig,
    pub capture_sample_rate: u32,
    pub playback_sample_rate: u32,
    pub chunk_samples: usize,
}

impl ConversationSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            session: config.live_session_config(),
            capture_sample_rate: config.audio.capture_sample_rate,
            playback_sample_rate: config.audio.playback_sample_rate,
            chunk_samples: config.audio.chunk_samples,
        }
    }
}

/// Resources held for one session. Dropped only through teardown.
struct Session {
    id: Uuid,
    created_at: DateTime<Utc>,
    transport: SessionTransport,
    /// Held until the remote acknowledges, then moved into `capture`.
    microphone: Option<Box<dyn MicrophoneStream>>,
    capture: Option<CapturePipe>,
    playback: PlaybackScheduler,
}

pub struct ConversationController<D: AudioDevices> {
    devices: D,
    connector: Arc<dyn LiveConnector>,
    settings: ConversationSettings,

    status: ConversationStatus,
    status_message: String,
    error_message: Option<String>,
    transcript: Vec<TranscriptTurn>,
    pending_input: String,
    pending_output: String,

    session: Option<Session>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    subscribers: Vec<mpsc::UnboundedSender<ConversationUpdate>>,
}

impl<D: AudioDevices> ConversationController<D> {
    pub fn new(devices: D, connector: Arc<dyn LiveConnector>, settings: ConversationSettings) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            devices,
            connector,
            settings,
            status: ConversationStatus::Idle,
            status_message: String::new(),
            error_message: None,
            transcript: Vec::new(),
            pending_input: String::new(),
            pending_output: String::new(),
            session: None,
            events_tx,
            events_rx,
            subscribers: Vec::new(),
        }
    }

    // ── Readable state ───────────────────────────────────────────

    pub fn status(&self) -> ConversationStatus {
        self.status
    }

    pub fn connection_status_message(&self) -> &str {
        &self.status_message
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Finalized turns, oldest first.
    pub fn transcript(&self) -> &[TranscriptTurn] {
        &self.transcript
    }

    pub fn pending_input(&self) -> &str {
        &self.pending_input
    }

    pub fn pending_output(&self) -> &str {
        &self.pending_output
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session.as_ref().map(|s| s.id)
    }

    pub fn playback(&self) -> Option<&PlaybackScheduler> {
        self.session.as_ref().map(|s| &s.playback)
    }

    /// Receive status, turn and error notifications.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ConversationUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    // ── Commands ─────────────────────────────────────────────────

    /// Acquire devices and begin connecting.
    ///
    /// Returns once the connect is under way; the session becomes
    /// `Active` when the `Opened` event is handled. Only valid from `Idle`.
    pub async fn start(&mut self) -> Result<()> {
        if self.status != ConversationStatus::Idle {
            return Err(LiveError::InvalidState {
                operation: "start".to_string(),
                status: self.status.to_string(),
            });
        }

        self.error_message = None;
        self.transcript.clear();
        self.pending_input.clear();
        self.pending_output.clear();
        self.set_status(ConversationStatus::Connecting, STATUS_INITIALIZING);

        self.set_status_message(STATUS_REQUESTING_MICROPHONE);
        let microphone = match self
            .devices
            .request_microphone(self.settings.capture_sample_rate)
            .await
        {
            Ok(mic) => mic,
            Err(e) => return Err(self.fail(e)),
        };

        self.set_status_message(STATUS_SETTING_UP_AUDIO);
        let session_id = Uuid::new_v4();
        let on_ended: EndedCallback = {
            let events = self.events_tx.clone();
            Box::new(move |id| {
                let _ = events.send(SessionEvent::new(
                    session_id,
                    SessionEventKind::PlaybackEnded(id),
                ));
            })
        };
        let output = match self
            .devices
            .open_output(self.settings.playback_sample_rate, on_ended)
            .await
        {
            Ok(output) => output,
            Err(e) => {
                let mut microphone = microphone;
                microphone.release();
                return Err(self.fail(e));
            }
        };

        self.set_status_message(STATUS_CONNECTING);
        let transport = SessionTransport::open(
            Arc::clone(&self.connector),
            self.settings.session.clone(),
            session_id,
            self.events_tx.clone(),
        );

        self.session = Some(Session {
            id: session_id,
            created_at: Utc::now(),
            transport,
            microphone: Some(microphone),
            capture: None,
            playback: PlaybackScheduler::new(output),
        });
        tracing::info!(session_id = %session_id, "Conversation starting");
        Ok(())
    }

    /// Close the session and release every device. Safe in any state.
    pub fn stop(&mut self) {
        if self.session.is_none() && self.status == ConversationStatus::Idle {
            return;
        }
        self.teardown();
        self.set_status(ConversationStatus::Idle, "");
    }

    // ── Event queue ──────────────────────────────────────────────

    /// Wait for the next session event.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events_rx.recv().await
    }

    /// Wait for one event and handle it.
    pub async fn process_next(&mut self) {
        if let Some(event) = self.next_event().await {
            self.handle_event(event);
        }
    }

    /// Apply one event. Events for any session other than the current
    /// one are dropped.
    pub fn handle_event(&mut self, event: SessionEvent) {
        if self.session_id() != Some(event.session_id) {
            tracing::debug!(
                session_id = %event.session_id,
                kind = event.kind.name(),
                "Ignoring event for stale session"
            );
            return;
        }

        match event.kind {
            SessionEventKind::Opened => self.on_opened(),
            SessionEventKind::ConnectFailed(e) => {
                self.fail(e);
            }
            SessionEventKind::Server(server_event) => self.on_server_event(server_event),
            SessionEventKind::Captured(chunk) => self.on_captured(chunk),
            SessionEventKind::PlaybackEnded(id) => {
                if let Some(session) = self.session.as_mut() {
                    session.playback.on_unit_ended(id);
                }
            }
            SessionEventKind::Closed => {
                tracing::info!(session_id = %event.session_id, "Remote closed the session");
                self.teardown();
                self.set_status(ConversationStatus::Idle, "");
            }
        }
    }

    fn on_opened(&mut self) {
        if self.status != ConversationStatus::Connecting {
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.transport.mark_open();

        let Some(microphone) = session.microphone.take() else {
            return;
        };
        let session_id = session.id;
        let events = self.events_tx.clone();
        let capture = CapturePipe::start(microphone, self.settings.chunk_samples, move |chunk| {
            let _ = events.send(SessionEvent::new(session_id, SessionEventKind::Captured(chunk)));
        });

        match capture {
            Ok(capture) => {
                session.capture = Some(capture);
                tracing::info!(session_id = %session_id, "Conversation active");
                self.set_status(ConversationStatus::Active, "");
            }
            Err(e) => {
                self.fail(e);
            }
        }
    }

    fn on_server_event(&mut self, event: VoiceEvent) {
        match event {
            VoiceEvent::SetupComplete => {}
            VoiceEvent::OutputTranscript { text } => self.pending_output.push_str(&text),
            VoiceEvent::InputTranscript { text } => self.pending_input.push_str(&text),
            VoiceEvent::TurnComplete => self.finalize_turn(),
            VoiceEvent::Interrupted => {
                if let Some(session) = self.session.as_mut() {
                    session.playback.interrupt();
                }
            }
            VoiceEvent::Audio { data } => self.play_audio(&data),
            VoiceEvent::Error { message } => {
                self.fail(LiveError::remote(message));
            }
        }
    }

    fn on_captured(&mut self, chunk: AudioChunk) {
        if self.status != ConversationStatus::Active {
            return;
        }
        if let Some(session) = self.session.as_mut() {
            session.transport.send(pcm::encode(&chunk.samples));
        }
    }

    fn play_audio(&mut self, data: &[u8]) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let scheduled =
            pcm::decode_to_playable(data, self.settings.playback_sample_rate, PLAYBACK_CHANNELS)
                .and_then(|buffer| session.playback.schedule_unit(buffer));
        // Playback failures cost the payload, never the session.
        if let Err(e) = scheduled {
            tracing::warn!(session_id = %session.id, error = %e, "Dropping audio payload");
        }
    }

    /// Move both partial transcripts into the transcript, user first.
    fn finalize_turn(&mut self) {
        let input = std::mem::take(&mut self.pending_input);
        let output = std::mem::take(&mut self.pending_output);

        for (speaker, text) in [(Speaker::User, input), (Speaker::Agent, output)] {
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            let turn = TranscriptTurn {
                speaker,
                text: text.to_string(),
            };
            self.transcript.push(turn.clone());
            self.notify(ConversationUpdate::TurnFinalized(turn));
        }
    }

    // ── Failure and teardown ─────────────────────────────────────

    /// Surface `error`, tear down, and land in `Idle`. Returns the error
    /// for callers that propagate it.
    fn fail(&mut self, error: LiveError) -> LiveError {
        tracing::warn!(
            session_id = ?self.session_id(),
            error = %error,
            "Conversation failed"
        );
        let message = error.user_message();
        self.error_message = Some(message.clone());
        self.set_status(ConversationStatus::Error, &message);
        self.notify(ConversationUpdate::Error(message));
        self.teardown();
        self.set_status(ConversationStatus::Idle, "");
        error
    }

    /// Release everything the session holds. Runs at most once per session.
    fn teardown(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };

        session.transport.close();
        if let Some(mut capture) = session.capture.take() {
            capture.stop();
        }
        if let Some(mut microphone) = session.microphone.take() {
            microphone.release();
        }
        session.playback.shutdown();

        let lifetime = Utc::now().signed_duration_since(session.created_at);
        tracing::info!(
            session_id = %session.id,
            duration_ms = lifetime.num_milliseconds(),
            turns = self.transcript.len(),
            "Session torn down"
        );
    }

    fn set_status(&mut self, status: ConversationStatus, message: &str) {
        self.status_message = message.to_string();
        if self.status == status {
            return;
        }
        tracing::debug!(from = %self.status, to = %status, "Conversation status");
        self.status = status;
        self.notify(ConversationUpdate::Status {
            status,
            message: message.to_string(),
        });
    }

    fn set_status_message(&mut self, message: &str) {
        self.status_message = message.to_string();
        self.notify(ConversationUpdate::Status {
            status: self.status,
            message: message.to_string(),
        });
    }

    fn notify(&mut self, update: ConversationUpdate) {
        self.subscribers.retain(|tx| tx.send(update.clone()).is_ok());
    }
}

impl<D: AudioDevices> Drop for ConversationController<D> {
    fn drop(&mut self) {
        self.teardown();
    }
}

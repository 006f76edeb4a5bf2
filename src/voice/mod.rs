//! Real-time voice conversation core.
//!
//! Microphone audio is captured in fixed windows, encoded to 16-bit PCM and
//! streamed to a Gemini Live session; the model's audio comes back as a
//! stream of PCM chunks that are scheduled back to back on the speaker,
//! while transcripts of both sides accumulate into finalized turns.
//!
//! ## Design
//! - [`controller::ConversationController`] is a typed state machine driven
//!   by a single event queue; nothing else mutates session state
//! - [`transport::LiveConnector`] is the seam to the remote service, with
//!   [`gemini_live::GeminiLiveConnector`] as the real implementation
//! - [`playback::OutputContext`] and [`capture::MicrophoneStream`] are the
//!   seams to the audio devices

pub mod capture;
pub mod controller;
pub mod gemini_live;
pub mod pcm;
pub mod playback;
pub mod transport;

// ── Shared voice event type ──────────────────────────────────────

/// Event produced by a live session link.
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceEvent {
    /// Server acknowledged the setup message.
    SetupComplete,
    /// Model audio chunk (PCM16, 24kHz mono).
    Audio { data: Vec<u8> },
    /// Partial transcription of the user's speech.
    InputTranscript { text: String },
    /// Partial transcription of the model's speech.
    OutputTranscript { text: String },
    /// Model finished a response turn.
    TurnComplete,
    /// The user started speaking over the model.
    Interrupted,
    /// Error from the server or the connection.
    Error { message: String },
}

impl VoiceEvent {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetupComplete => "setup_complete",
            Self::Audio { .. } => "audio",
            Self::InputTranscript { .. } => "input_transcript",
            Self::OutputTranscript { .. } => "output_transcript",
            Self::TurnComplete => "turn_complete",
            Self::Interrupted => "interrupted",
            Self::Error { .. } => "error",
        }
    }
}

pub use capture::{AudioChunk, CapturePipe, MicrophoneStream};
pub use controller::{
    ConversationController, ConversationSettings, ConversationStatus, ConversationUpdate,
    Speaker, TranscriptTurn,
};
pub use gemini_live::{GeminiLiveConnector, VadConfig};
pub use playback::{OutputContext, PlaybackScheduler, SourceId};
pub use transport::{LiveConnector, LiveSessionConfig, SessionTransport};

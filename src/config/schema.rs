use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::voice::gemini_live::VadConfig;

/// Default native-audio model for live conversation.
pub const DEFAULT_LIVE_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

/// Default model for text translation and sentiment analysis.
pub const DEFAULT_TEXT_MODEL: &str = "gemini-2.5-flash";

pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a helpful and friendly AI assistant. \
Respond in the same language the user is speaking. Keep your responses concise and conversational.";

pub const DEFAULT_TEXT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Top-level configuration, loaded from `~/.lingolive/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Gemini API key. Environment variables take precedence.
    pub api_key: Option<String>,
    pub live: LiveConfig,
    pub audio: AudioConfig,
    pub text: TextConfig,
    pub history: HistoryConfig,

    /// Path the config was loaded from (not serialized).
    #[serde(skip)]
    pub config_path: PathBuf,
}

// ── Live conversation ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub model: String,
    pub system_instruction: String,
    /// Ask the server to transcribe what the user says.
    pub input_transcription: bool,
    /// Ask the server to transcribe what the model says.
    pub output_transcription: bool,
    /// Prebuilt voice name (e.g. "Aoede"). Server default when unset.
    pub voice_name: Option<String>,
    /// Seconds to wait for `setupComplete` after the socket opens.
    pub setup_timeout_secs: u64,
    /// Automatic activity detection tuning. Server defaults when unset.
    pub vad: Option<VadConfig>,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_LIVE_MODEL.to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            input_transcription: true,
            output_transcription: true,
            voice_name: None,
            setup_timeout_secs: 15,
            vad: None,
        }
    }
}

// ── Audio devices ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Rate microphone audio is delivered to the model at.
    pub capture_sample_rate: u32,
    /// Rate of the audio the model sends back.
    pub playback_sample_rate: u32,
    /// Samples per capture window.
    pub chunk_samples: usize,
    /// Input device name; system default when unset.
    pub input_device: Option<String>,
    /// Output device name; system default when unset.
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_sample_rate: 16_000,
            playback_sample_rate: 24_000,
            chunk_samples: 4096,
            input_device: None,
            output_device: None,
        }
    }
}

// ── Text features ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TextConfig {
    pub model: String,
    pub endpoint: String,
    pub request_timeout_secs: u64,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_TEXT_MODEL.to_string(),
            endpoint: DEFAULT_TEXT_ENDPOINT.to_string(),
            request_timeout_secs: 30,
        }
    }
}

// ── History ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// History file; `~/.lingolive/history.json` when unset.
    pub path: Option<PathBuf>,
    pub max_entries: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_entries: 50,
        }
    }
}

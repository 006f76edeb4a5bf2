//! Error taxonomy for the conversation core and the text features.
//!
//! Only configuration, permission and connect failures are meant to reach
//! the user as a visible string (see [`LiveError::user_message`]). Decode
//! and playback failures are contained where they happen and only logged.

use thiserror::Error;

/// Message shown for any connect or remote failure. Raw transport detail
/// stays in the logs.
pub const CONNECTION_FAILED_MESSAGE: &str =
    "Connection failed. Please check your network or API key.";

/// Message shown when the microphone cannot be acquired.
pub const PERMISSION_DENIED_MESSAGE: &str =
    "Microphone access denied. Please allow microphone access and try again.";

#[derive(Error, Debug)]
pub enum LiveError {
    /// Missing credential or invalid configuration value.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Microphone missing or access refused.
    #[error("Microphone unavailable: {message}")]
    Permission { message: String },

    /// The remote session could not be opened.
    #[error("Failed to open live session: {message}")]
    Connect { message: String },

    /// A payload that is not a whole number of 16-bit samples, or a
    /// server frame that is not valid JSON.
    #[error("Malformed payload: {message}")]
    Decode { message: String },

    /// Output device could not be opened or used.
    #[error("Audio device error: {message}")]
    Device { message: String },

    /// Server-initiated termination with an error.
    #[error("Remote session error: {message}")]
    Remote { message: String },

    /// Operation not allowed in the controller's current state.
    #[error("Cannot {operation} while {status}")]
    InvalidState { operation: String, status: String },

    /// Translation / sentiment request failed or returned an unusable body.
    #[error("Text model error: {message}")]
    TextModel { message: String },

    /// History file could not be read or written.
    #[error("History store error: {message}")]
    History { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl LiveError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn permission(message: impl Into<String>) -> Self {
        Self::Permission {
            message: message.into(),
        }
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect {
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    pub fn device(message: impl Into<String>) -> Self {
        Self::Device {
            message: message.into(),
        }
    }

    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
        }
    }

    pub fn text_model(message: impl Into<String>) -> Self {
        Self::TextModel {
            message: message.into(),
        }
    }

    /// String suitable for showing to the user.
    ///
    /// Connect and remote failures collapse to a generic connectivity
    /// message; everything else uses its display text.
    pub fn user_message(&self) -> String {
        match self {
            Self::Connect { .. } | Self::Remote { .. } => CONNECTION_FAILED_MESSAGE.to_string(),
            Self::Permission { .. } => PERMISSION_DENIED_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }}

pub type Result<T> = std::result::Result<T, LiveError>;

//! lingolive: real-time voice conversation, translation and sentiment
//! analysis on top of Gemini.
//!
//! The voice core lives in [`voice`]; [`audio`] adapts it to real devices.
//! [`translate`] and [`history`] back the text commands of the CLI.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod audio;
pub mod config;
pub mod error;
pub mod history;
pub mod translate;
pub mod voice;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::Config;
pub use error::{LiveError, Result};
pub use history::{HistoryItem, HistoryStore};
pub use translate::{LanguageCode, SentimentLabel, SentimentResult, TextClient};
pub use voice::{
    ConversationController, ConversationSettings, ConversationStatus, ConversationUpdate,
    GeminiLiveConnector, Speaker, TranscriptTurn,
};

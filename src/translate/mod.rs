//! Text translation and sentiment analysis through `generateContent`.

pub mod client;
pub mod language;

pub use client::{SentimentLabel, SentimentResult, TextClient};
pub use language::LanguageCode;

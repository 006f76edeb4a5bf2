//! Configuration loading and credential resolution.
//!
//! The config file lives at `~/.lingolive/config.toml`; every section is
//! optional and falls back to defaults. The API key is resolved from the
//! environment first and the file second, and its absence is reported
//! before any session or request is attempted.

pub mod schema;

pub use schema::{AudioConfig, Config, HistoryConfig, LiveConfig, TextConfig};

use std::path::{Path, PathBuf};

use crate::error::{LiveError, Result};
use crate::voice::transport::LiveSessionConfig;

/// Environment variables checked for the API key, in order.
pub const API_KEY_ENV_VARS: [&str; 3] = ["GEMINI_API_KEY", "API_KEY", "GOOGLE_API_KEY"];

/// `~/.lingolive`
pub fn default_config_dir() -> Result<PathBuf> {
    use directories::UserDirs;

    let home = UserDirs::new()
        .map(|u| u.home_dir().to_path_buf())
        .ok_or_else(|| LiveError::configuration("Could not find home directory"))?;
    Ok(home.join(".lingolive"))
}

impl Config {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing file is not an error; the defaults are returned with
    /// `config_path` pointing at where the file would be.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => default_config_dir()?.join("config.toml"),
        };

        let mut config = if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)?;
            let parsed: Config = toml::from_str(&contents)?;
            tracing::debug!(path = %config_path.display(), "Loaded config");
            parsed
        } else {
            tracing::debug!(path = %config_path.display(), "No config file, using defaults");
            Config::default()
        };
        config.config_path = config_path;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the audio pipeline cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.audio.capture_sample_rate == 0 || self.audio.playback_sample_rate == 0 {
            return Err(LiveError::configuration("Sample rates must be non-zero"));
        }
        if self.audio.capture_sample_rate == self.audio.playback_sample_rate {
            return Err(LiveError::configuration(format!(
                "audio.capture_sample_rate and audio.playback_sample_rate must differ (both {} Hz)",
                self.audio.capture_sample_rate
            )));
        }
        if self.audio.chunk_samples == 0 {
            return Err(LiveError::configuration("audio.chunk_samples must be non-zero"));
        }
        if self.live.model.trim().is_empty() {
            return Err(LiveError::configuration("live.model must not be empty"));
        }
        if self.history.max_entries == 0 {
            return Err(LiveError::configuration("history.max_entries must be non-zero"));
        }
        Ok(())
    }

    /// Resolve the API key from the process environment, then the file.
    pub fn resolve_api_key(&self) -> Result<String> {
        self.resolve_api_key_with(|name| std::env::var(name).ok())
    }

    /// Same as [`Self::resolve_api_key`] with an explicit variable lookup.
    pub fn resolve_api_key_with<F>(&self, lookup: F) -> Result<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        API_KEY_ENV_VARS
            .iter()
            .filter_map(|name| lookup(name))
            .chain(self.api_key.clone())
            .map(|key| key.trim().to_string())
            .find(|key| !key.is_empty())
            .ok_or_else(|| {
                LiveError::configuration("API key not configured. Set GEMINI_API_KEY env var.")
            })
    }

    /// History file location.
    pub fn history_path(&self) -> Result<PathBuf> {
        match &self.history.path {
            Some(p) => Ok(p.clone()),
            None => Ok(default_config_dir()?.join("history.json")),
        }
    }

    /// Session parameters handed to the transport on every `start()`.
    pub fn live_session_config(&self) -> LiveSessionConfig {
        LiveSessionConfig {
            model: self.live.model.clone(),
            system_instruction: self.live.system_instruction.clone(),
            input_transcription: self.live.input_transcription,
            output_transcription: self.live.output_transcription,
            voice_name: self.live.voice_name.clone(),
            vad: self.live.vad.clone(),
            input_sample_rate: self.audio.capture_sample_rate,
            setup_timeout: std::time::Duration::from_secs(self.live.setup_timeout_secs),
        }
    }
}

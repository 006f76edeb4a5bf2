//! Translation history persisted as a JSON array.
//!
//! Newest entries come first. Re-adding an identical translation is a
//! no-op, and the list is capped so the file stays small.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{LiveError, Result};
use crate::translate::{LanguageCode, SentimentResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    pub id: String,
    pub input_text: String,
    pub translated_text: String,
    pub sentiment: SentimentResult,
    pub target_language: String,
    pub target_language_name: String,
    /// Unix epoch milliseconds.
    pub timestamp: i64,
}

impl HistoryItem {
    pub fn new(
        input_text: impl Into<String>,
        translated_text: impl Into<String>,
        sentiment: SentimentResult,
        target: LanguageCode,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            input_text: input_text.into(),
            translated_text: translated_text.into(),
            sentiment,
            target_language: target.as_str().to_string(),
            target_language_name: target.display_name().to_string(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    fn same_translation(&self, other: &HistoryItem) -> bool {
        self.input_text == other.input_text
            && self.translated_text == other.translated_text
            && self.target_language == other.target_language
    }
}

pub struct HistoryStore {
    path: PathBuf,
    max_entries: usize,
    items: Vec<HistoryItem>,
}

impl HistoryStore {
    /// Read the store at `path`. A missing file is an empty history.
    pub fn load(path: impl Into<PathBuf>, max_entries: usize) -> Result<Self> {
        let path = path.into();
        let items = match std::fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => Vec::new(),
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| LiveError::History {
                message: format!("{} is corrupt: {e}", path.display()),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(LiveError::History {
                    message: format!("cannot read {}: {e}", path.display()),
                })
            }
        };
        tracing::debug!(path = %path.display(), entries = items.len(), "History loaded");

        let mut store = Self {
            path,
            max_entries: max_entries.max(1),
            items,
        };
        store.items.truncate(store.max_entries);
        Ok(store)
    }

    /// Insert at the front. Returns `false` if an identical translation
    /// is already recorded.
    pub fn add(&mut self, item: HistoryItem) -> bool {
        if self.items.iter().any(|existing| existing.same_translation(&item)) {
            return false;
        }
        self.items.insert(0, item);
        self.items.truncate(self.max_entries);
        true
    }

    /// Remove the entry with `id`. Returns whether one was removed.
    pub fn delete(&mut self, id: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|item| item.id != id);
        self.items.len() != before
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn items(&self) -> &[HistoryItem] {
        &self.items
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.items)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

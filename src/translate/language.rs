//! Supported translation target languages.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::LiveError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LanguageCode {
    Ko,
    Ja,
    Zh,
    ZhTw,
    Th,
    Vi,
    Id,
    Ms,
    Tl,
    Hi,
    En,
    Es,
    Fr,
    De,
    It,
    Pt,
    Nl,
    Pl,
    Cs,
    Sv,
    Da,
    Ru,
    Uk,
    Tr,
    Ar,
}

/// `(language, ISO tag, display name)` in menu order.
const LANGUAGES: [(LanguageCode, &str, &str); 25] = [
    (LanguageCode::En, "en", "English"),
    (LanguageCode::Es, "es", "Spanish"),
    (LanguageCode::Fr, "fr", "French"),
    (LanguageCode::De, "de", "German"),
    (LanguageCode::It, "it", "Italian"),
    (LanguageCode::Pt, "pt", "Portuguese"),
    (LanguageCode::Nl, "nl", "Dutch"),
    (LanguageCode::Pl, "pl", "Polish"),
    (LanguageCode::Cs, "cs", "Czech"),
    (LanguageCode::Sv, "sv", "Swedish"),
    (LanguageCode::Da, "da", "Danish"),
    (LanguageCode::Ru, "ru", "Russian"),
    (LanguageCode::Uk, "uk", "Ukrainian"),
    (LanguageCode::Tr, "tr", "Turkish"),
    (LanguageCode::Ar, "ar", "Arabic"),
    (LanguageCode::Hi, "hi", "Hindi"),
    (LanguageCode::Ko, "ko", "Korean"),
    (LanguageCode::Ja, "ja", "Japanese"),
    (LanguageCode::Zh, "zh", "Chinese (Simplified)"),
    (LanguageCode::ZhTw, "zh-TW", "Chinese (Traditional)"),
    (LanguageCode::Th, "th", "Thai"),
    (LanguageCode::Vi, "vi", "Vietnamese"),
    (LanguageCode::Id, "id", "Indonesian"),
    (LanguageCode::Ms, "ms", "Malay"),
    (LanguageCode::Tl, "tl", "Filipino"),
];

impl LanguageCode {
    fn entry(self) -> (LanguageCode, &'static str, &'static str) {
        LANGUAGES
            .iter()
            .copied()
            .find(|(code, _, _)| *code == self)
            .unwrap_or((self, "en", "English"))
    }

    /// ISO 639-1 tag (with region where needed).
    pub fn as_str(self) -> &'static str {
        self.entry().1
    }

    pub fn display_name(self) -> &'static str {
        self.entry().2
    }

    pub fn all() -> impl Iterator<Item = LanguageCode> {
        LANGUAGES.iter().map(|(code, _, _)| *code)
    }
}

impl fmt::Display for LanguageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LanguageCode {
    type Err = LiveError;

    /// Accepts the tag in any case, with `_` or `-` before the region.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace('_', "-");
        LANGUAGES
            .iter()
            .find(|(_, tag, _)| tag.eq_ignore_ascii_case(&wanted))
            .map(|(code, _, _)| *code)
            .ok_or_else(|| LiveError::configuration(format!("unsupported language '{s}'")))
    }
}

impl TryFrom<String> for LanguageCode {
    type Error = LiveError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LanguageCode> for String {
    fn from(code: LanguageCode) -> Self {
        code.as_str().to_string()
    }
}

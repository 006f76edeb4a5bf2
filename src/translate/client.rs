//! One-shot `generateContent` client for translation and sentiment.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;

use super::language::LanguageCode;
use crate::config::TextConfig;
use crate::error::{LiveError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
}

impl fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Positive => "Positive",
            Self::Negative => "Negative",
            Self::Neutral => "Neutral",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentimentResult {
    pub sentiment: SentimentLabel,
    pub explanation: String,
}

impl SentimentResult {
    fn no_text() -> Self {
        Self {
            sentiment: SentimentLabel::Neutral,
            explanation: "No text provided.".into(),
        }
    }
}

// ── Wire types ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

pub(crate) fn translate_prompt(text: &str, target: LanguageCode) -> String {
    format!(
        "Translate the following text to {}. Provide only the translated text, \
         without any additional commentary or explanation. Text to translate: \"{}\"",
        target.display_name(),
        text
    )
}

pub(crate) fn sentiment_prompt(text: &str) -> String {
    format!("Analyze the sentiment of the following text. Text: \"{text}\"")
}

pub(crate) fn build_translate_request(text: &str, target: LanguageCode) -> Value {
    json!({
        "contents": [{ "parts": [{ "text": translate_prompt(text, target) }] }]
    })
}

pub(crate) fn build_sentiment_request(text: &str) -> Value {
    json!({
        "contents": [{ "parts": [{ "text": sentiment_prompt(text) }] }],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": {
                "type": "OBJECT",
                "properties": {
                    "sentiment": {
                        "type": "STRING",
                        "description": "The sentiment of the text. Must be one of \"Positive\", \"Negative\", or \"Neutral\"."
                    },
                    "explanation": {
                        "type": "STRING",
                        "description": "A brief explanation for the sentiment classification."
                    }
                },
                "required": ["sentiment", "explanation"]
            }
        }
    })
}

/// Concatenated text of the first candidate.
fn response_text(body: &str) -> Result<String> {
    let parsed: GenerateResponse = serde_json::from_str(body)
        .map_err(|e| LiveError::text_model(format!("unreadable response: {e}")))?;
    let text: String = parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    if text.is_empty() {
        return Err(LiveError::text_model("response contained no text"));
    }
    Ok(text)
}

/// Validate the model's JSON answer. Both fields must be present and the
/// explanation non-empty.
pub(crate) fn parse_sentiment(text: &str) -> Result<SentimentResult> {
    let result: SentimentResult = serde_json::from_str(text.trim()).map_err(|e| {
        LiveError::text_model(format!(
            "invalid response format from sentiment analysis: {e}"
        ))
    })?;
    if result.explanation.trim().is_empty() {
        return Err(LiveError::text_model(
            "invalid response format from sentiment analysis: empty explanation",
        ));
    }
    Ok(result)
}

// ── Client ───────────────────────────────────────────────────────

pub struct TextClient {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
}

impl TextClient {
    pub fn new(api_key: impl Into<String>, config: &TextConfig) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(LiveError::configuration("API key is empty"));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http,
            api_key,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    fn generate_url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }

    async fn generate(&self, body: &Value) -> Result<String> {
        let resp = self
            .http
            .post(self.generate_url())
            .query(&[("key", self.api_key.as_str())])
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            tracing::warn!(status = %status, model = %self.model, "generateContent failed");
            return Err(LiveError::text_model(format!("request failed ({status}): {text}")));
        }
        response_text(&text)
    }

    /// Translate `text` into `target`. Whitespace-only input returns an
    /// empty string without a request.
    pub async fn translate_text(&self, text: &str, target: LanguageCode) -> Result<String> {
        if text.trim().is_empty() {
            return Ok(String::new());
        }
        tracing::debug!(target_language = %target, chars = text.chars().count(), "Translating");
        self.generate(&build_translate_request(text, target)).await
    }

    pub async fn analyze_sentiment(&self, text: &str) -> Result<SentimentResult> {
        if text.trim().is_empty() {
            return Ok(SentimentResult::no_text());
        }
        tracing::debug!(chars = text.chars().count(), "Analyzing sentiment");
        let answer = self.generate(&build_sentiment_request(text)).await?;
        parse_sentiment(&answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn candidate(text: &str) -> Value {
        json!({ "candidates": [{ "content": { "parts": [{ "text": text }] } }] })
    }

    fn client_for(server: &MockServer) -> TextClient {
        let config = TextConfig {
            endpoint: server.uri(),
            ..TextConfig::default()
        };
        TextClient::new("test-key", &config).unwrap()
    }

    #[test]
    fn translate_prompt_names_the_language() {
        let prompt = translate_prompt("Hola", LanguageCode::En);
        assert!(prompt.starts_with("Translate the following text to English."));
        assert!(prompt.ends_with("Text to translate: \"Hola\""));
    }

    #[test]
    fn sentiment_request_requires_both_fields() {
        let body = build_sentiment_request("great");
        let config = &body["generationConfig"];
        assert_eq!(config["responseMimeType"], "application/json");
        assert_eq!(
            config["responseSchema"]["required"],
            json!(["sentiment", "explanation"])
        );
    }

    #[test]
    fn response_text_joins_parts() {
        let body = json!({
            "candidates": [{ "content": { "parts": [{ "text": "Hel" }, { "text": "lo" }] } }]
        });
        assert_eq!(response_text(&body.to_string()).unwrap(), "Hello");
    }

    #[test]
    fn response_without_candidates_is_error() {
        let err = response_text("{}").unwrap_err();
        assert!(matches!(err, LiveError::TextModel { .. }));
    }

    #[test]
    fn sentiment_parse_validates_shape() {
        let ok = parse_sentiment(r#" {"sentiment":"Positive","explanation":"Upbeat."} "#).unwrap();
        assert_eq!(ok.sentiment, SentimentLabel::Positive);

        assert!(parse_sentiment(r#"{"sentiment":"Positive"}"#).is_err());
        assert!(parse_sentiment(r#"{"sentiment":"Happy","explanation":"x"}"#).is_err());
        assert!(parse_sentiment(r#"{"sentiment":"Neutral","explanation":"  "}"#).is_err());
        assert!(parse_sentiment("not json").is_err());
    }

    #[test]
    fn empty_key_rejected() {
        let err = TextClient::new("  ", &TextConfig::default()).err().unwrap();
        assert!(matches!(err, LiveError::Configuration { .. }));
    }

    #[tokio::test]
    async fn blank_input_makes_no_request() {
        let server = MockServer::start().await;
        let client = client_for(&server);

        assert_eq!(client.translate_text("   ", LanguageCode::Fr).await.unwrap(), "");
        let sentiment = client.analyze_sentiment("\n").await.unwrap();
        assert_eq!(sentiment.sentiment, SentimentLabel::Neutral);
        assert_eq!(sentiment.explanation, "No text provided.");
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn translate_posts_to_model_with_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-2.5-flash:generateContent"))
            .and(query_param("key", "test-key"))
            .and(body_string_contains("to French"))
            .respond_with(ResponseTemplate::new(200).set_body_json(candidate("Bonjour")))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let out = client.translate_text("Hello", LanguageCode::Fr).await.unwrap();
        assert_eq!(out, "Bonjour");
    }

    #[tokio::test]
    async fn sentiment_round_trip_through_model() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("responseSchema"))
            .respond_with(ResponseTemplate::new(200).set_body_json(candidate(
                r#"{"sentiment":"Negative","explanation":"Complaint about delays."}"#,
            )))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let result = client.analyze_sentiment("The train is late again").await.unwrap();
        assert_eq!(result.sentiment, SentimentLabel::Negative);
        assert_eq!(result.explanation, "Complaint about delays.");
    }

    #[tokio::test]
    async fn http_error_is_text_model_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("API key not valid"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client.translate_text("Hi", LanguageCode::De).await.unwrap_err();
        match err {
            LiveError::TextModel { message } => assert!(message.contains("403")),
            other => panic!("unexpected error {other:?}"),
        }
    }
}

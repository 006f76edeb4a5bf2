//! Gemini Live WebSocket client for real-time voice conversation.
//!
//! Implements the bidirectional streaming protocol for Google's Gemini
//! Live API (BidiGenerateContent) behind the [`LiveConnector`] seam.
//!
//! ## Protocol Overview
//!
//! 1. **Connect**: open WebSocket to the Gemini Live endpoint
//! 2. **Setup**: send model, modality, transcription flags and system
//!    instruction; wait for `setupComplete`
//! 3. **Stream**: send microphone audio as `realtimeInput`, receive
//!    audio, transcripts and turn signals as `serverContent`
//! 4. **Close**: send `audioStreamEnd`, then a close frame
//!
//! ## Binary frames
//!
//! Gemini Live sends its JSON messages in WebSocket Binary frames,
//! `setupComplete` included. Text and Binary frames go through the same
//! parser; a Binary frame that is not JSON is logged and skipped.

use async_trait::async_trait;
use base64::Engine;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::transport::{LiveConnector, LiveLink, LiveSessionConfig, OutboundMessage};
use super::VoiceEvent;
use crate::error::{LiveError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ── Constants ──────────────────────────────────────────────────────

/// Gemini Live WebSocket endpoint.
pub const GEMINI_LIVE_WS_URL: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Capacity of the per-link channels.
const LINK_CHANNEL_CAPACITY: usize = 256;

/// MIME type for outgoing 16-bit PCM at `rate`.
pub fn input_audio_mime(rate: u32) -> String {
    format!("audio/pcm;rate={rate}")
}

// ── VAD Configuration ──────────────────────────────────────────────

/// Voice Activity Detection sensitivity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VadSensitivity {
    #[serde(rename = "START_SENSITIVITY_HIGH", alias = "high")]
    High,
    #[serde(rename = "START_SENSITIVITY_LOW", alias = "low")]
    Low,
}

/// End-of-speech detection sensitivity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndSensitivity {
    #[serde(rename = "END_SENSITIVITY_HIGH", alias = "high")]
    High,
    #[serde(rename = "END_SENSITIVITY_LOW", alias = "low")]
    Low,
}

/// Automatic activity detection tuning.
///
/// Turn boundaries are left to the server; these knobs only shape how
/// eagerly it decides the user started or stopped talking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    pub disabled: bool,
    #[serde(rename = "startOfSpeechSensitivity", alias = "start_sensitivity")]
    pub start_sensitivity: VadSensitivity,
    #[serde(rename = "endOfSpeechSensitivity", alias = "end_sensitivity")]
    pub end_sensitivity: EndSensitivity,
    /// Milliseconds of audio before detected speech start to include.
    #[serde(rename = "prefixPaddingMs", alias = "prefix_padding_ms")]
    pub prefix_padding_ms: u32,
    /// Milliseconds of silence before declaring speech ended.
    #[serde(rename = "silenceDurationMs", alias = "silence_duration_ms")]
    pub silence_duration_ms: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            start_sensitivity: VadSensitivity::High,
            end_sensitivity: EndSensitivity::High,
            prefix_padding_ms: 100,
            silence_duration_ms: 500,
        }
    }
}

// ── Setup message (JSON sent as first frame) ───────────────────────

/// Top-level setup message for Gemini Live session initialization.
#[derive(Debug, Serialize)]
pub struct SetupMessage {
    pub setup: SetupPayload,
}

#[derive(Debug, Serialize)]
pub struct SetupPayload {
    pub model: String,
    #[serde(rename = "generationConfig")]
    pub generation_config: GenerationConfig,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<SystemInstruction>,
    #[serde(rename = "inputAudioTranscription", skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<AudioTranscriptionConfig>,
    #[serde(rename = "outputAudioTranscription", skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<AudioTranscriptionConfig>,
    #[serde(rename = "realtimeInputConfig", skip_serializing_if = "Option::is_none")]
    pub realtime_input_config: Option<RealtimeInputConfig>,
}

#[derive(Debug, Serialize)]
pub struct GenerationConfig {
    #[serde(rename = "responseModalities")]
    pub response_modalities: Vec<String>,
    #[serde(rename = "speechConfig", skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Serialize)]
pub struct SpeechConfig {
    #[serde(rename = "voiceConfig")]
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
pub struct VoiceConfig {
    #[serde(rename = "prebuiltVoiceConfig")]
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
pub struct PrebuiltVoiceConfig {
    #[serde(rename = "voiceName")]
    pub voice_name: String,
}

#[derive(Debug, Serialize)]
pub struct SystemInstruction {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
pub struct TextPart {
    pub text: String,
}

/// Empty object; its presence switches transcription on.
#[derive(Debug, Default, Serialize)]
pub struct AudioTranscriptionConfig {}

#[derive(Debug, Serialize)]
pub struct RealtimeInputConfig {
    #[serde(rename = "automaticActivityDetection")]
    pub automatic_activity_detection: VadConfig,
}

/// Build the setup message for a conversation session.
pub fn build_setup_message(config: &LiveSessionConfig) -> SetupMessage {
    let model = if config.model.starts_with("models/") {
        config.model.clone()
    } else {
        format!("models/{}", config.model)
    };

    let system_instruction = if config.system_instruction.trim().is_empty() {
        None
    } else {
        Some(SystemInstruction {
            parts: vec![TextPart {
                text: config.system_instruction.clone(),
            }],
        })
    };

    SetupMessage {
        setup: SetupPayload {
            model,
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: config.voice_name.as_ref().map(|name| SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: name.clone(),
                        },
                    },
                }),
            },
            system_instruction,
            input_audio_transcription: config
                .input_transcription
                .then(AudioTranscriptionConfig::default),
            output_audio_transcription: config
                .output_transcription
                .then(AudioTranscriptionConfig::default),
            realtime_input_config: config.vad.clone().map(|vad| RealtimeInputConfig {
                automatic_activity_detection: vad,
            }),
        },
    }
}

// ── Audio input message ────────────────────────────────────────────

/// Audio input message sent to Gemini Live.
///
/// `mediaChunks` is what the official SDKs still put on the wire.
#[derive(Debug, Serialize)]
pub struct RealtimeInputMessage {
    #[serde(rename = "realtimeInput")]
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Serialize)]
pub struct RealtimeInput {
    #[serde(rename = "mediaChunks")]
    pub media_chunks: Vec<MediaChunk>,
}

/// Audio chunk with MIME type and base64-encoded data.
#[derive(Debug, Serialize)]
pub struct MediaChunk {
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub data: String,
}

/// Tells Gemini the microphone closed so it processes buffered input.
#[derive(Debug, Serialize)]
pub struct AudioStreamEndMessage {
    #[serde(rename = "realtimeInput")]
    pub realtime_input: AudioStreamEndPayload,
}

#[derive(Debug, Serialize)]
pub struct AudioStreamEndPayload {
    #[serde(rename = "audioStreamEnd")]
    pub audio_stream_end: bool,
}

/// Build a realtime audio input message from raw PCM bytes.
///
/// Wire format: `{"realtimeInput": {"mediaChunks": [{"mimeType": "audio/pcm;rate=16000", "data": "<base64>"}]}}`
pub fn build_audio_message(pcm_data: &[u8], sample_rate: u32) -> RealtimeInputMessage {
    RealtimeInputMessage {
        realtime_input: RealtimeInput {
            media_chunks: vec![MediaChunk {
                mime_type: input_audio_mime(sample_rate),
                data: base64::engine::general_purpose::STANDARD.encode(pcm_data),
            }],
        },
    }
}

pub fn build_audio_stream_end_message() -> AudioStreamEndMessage {
    AudioStreamEndMessage {
        realtime_input: AudioStreamEndPayload {
            audio_stream_end: true,
        },
    }
}

// ── Server messages ────────────────────────────────────────────────

/// Parse one JSON server message into events.
///
/// Events come out in the order the conversation handles them: output
/// transcription, input transcription, turn complete, interruption, then
/// inline audio. Text parts of `modelTurn` are ignored; the spoken answer
/// is covered by output transcription.
pub fn parse_server_message(json_text: &str) -> Result<Vec<VoiceEvent>> {
    let value: serde_json::Value = serde_json::from_str(json_text)
        .map_err(|e| LiveError::decode(format!("server message is not JSON: {e}")))?;

    let mut events = Vec::new();

    if value.get("setupComplete").is_some() {
        events.push(VoiceEvent::SetupComplete);
    }

    if let Some(content) = value.get("serverContent") {
        if let Some(text) = transcription_text(content, "outputTranscription") {
            events.push(VoiceEvent::OutputTranscript { text });
        }
        if let Some(text) = transcription_text(content, "inputTranscription") {
            events.push(VoiceEvent::InputTranscript { text });
        }
        if content.get("turnComplete").and_then(|v| v.as_bool()) == Some(true) {
            events.push(VoiceEvent::TurnComplete);
        }
        if content.get("interrupted").and_then(|v| v.as_bool()) == Some(true) {
            events.push(VoiceEvent::Interrupted);
        }
        if let Some(parts) = content
            .pointer("/modelTurn/parts")
            .and_then(|v| v.as_array())
        {
            for part in parts {
                let Some(data_b64) = part.pointer("/inlineData/data").and_then(|v| v.as_str())
                else {
                    continue;
                };
                match base64::engine::general_purpose::STANDARD.decode(data_b64) {
                    Ok(data) => events.push(VoiceEvent::Audio { data }),
                    Err(e) => {
                        tracing::warn!(error = %e, "Dropping audio part with invalid base64");
                    }
                }
            }
        }
    }

    if let Some(go_away) = value.get("goAway") {
        tracing::info!(time_left = %go_away, "Gemini Live announced disconnect");
    }

    if let Some(err) = value.get("error") {
        let message = err
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("Unknown server error");
        events.push(VoiceEvent::Error {
            message: message.to_string(),
        });
    }

    Ok(events)
}

fn transcription_text(content: &serde_json::Value, key: &str) -> Option<String> {
    content
        .get(key)
        .and_then(|t| t.get("text"))
        .and_then(|v| v.as_str())
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

/// Pull the JSON text out of a frame, if it carries any.
fn frame_json(msg: &WsMessage) -> Option<&str> {
    match msg {
        WsMessage::Text(text) => Some(text.as_str()),
        WsMessage::Binary(data) if data.first() == Some(&b'{') => std::str::from_utf8(data).ok(),
        _ => None,
    }
}

/// A close frame the conversation should treat as a failure.
fn abnormal_close_reason(msg: &WsMessage) -> Option<String> {
    match msg {
        WsMessage::Close(Some(frame))
            if !matches!(frame.code, CloseCode::Normal | CloseCode::Away) =>
        {
            let reason = frame.reason.to_string();
            Some(if reason.is_empty() {
                format!("connection closed with code {}", u16::from(frame.code))
            } else {
                reason
            })
        }
        _ => None,
    }
}

// ── Connector ──────────────────────────────────────────────────────

/// Opens Gemini Live sessions with a fixed API key.
pub struct GeminiLiveConnector {
    api_key: String,
    endpoint: String,
}

impl GeminiLiveConnector {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(LiveError::configuration(
                "API key not configured. Set GEMINI_API_KEY env var.",
            ));
        }
        Ok(Self {
            api_key,
            endpoint: GEMINI_LIVE_WS_URL.to_string(),
        })
    }

    /// Point at a different WebSocket endpoint (proxies, local fakes).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn await_setup_complete(
        ws_stream: &mut WsStream,
        session_id: &str,
        timeout: std::time::Duration,
    ) -> Result<()> {
        let wait = async {
            while let Some(msg_result) = ws_stream.next().await {
                let msg = msg_result
                    .map_err(|e| LiveError::connect(format!("WebSocket error before setupComplete: {e}")))?;

                if let Some(reason) = abnormal_close_reason(&msg) {
                    return Err(LiveError::connect(format!(
                        "Connection closed before setupComplete: {reason}"
                    )));
                }
                if matches!(msg, WsMessage::Close(_)) {
                    return Err(LiveError::connect("Connection closed before setupComplete"));
                }

                let Some(text) = frame_json(&msg) else {
                    tracing::debug!(session_id = %session_id, msg = ?msg, "Setup phase: non-JSON frame");
                    continue;
                };
                let events = match parse_server_message(text) {
                    Ok(events) => events,
                    Err(e) => {
                        tracing::warn!(
                            session_id = %session_id,
                            error = %e,
                            "Setup phase: dropping server frame"
                        );
                        continue;
                    }
                };
                for event in events {
                    match event {
                        VoiceEvent::SetupComplete => return Ok(()),
                        VoiceEvent::Error { message } => return Err(LiveError::connect(message)),
                        _ => {}
                    }
                }
            }
            Err(LiveError::connect("Stream ended before setupComplete"))
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(LiveError::connect(format!(
                "setupComplete timeout ({}s)",
                timeout.as_secs()
            ))),
        }
    }

    /// Outbound loop: encode audio and send to the WebSocket.
    async fn outbound_loop(
        mut rx: mpsc::Receiver<OutboundMessage>,
        mut ws_sender: SplitSink<WsStream, WsMessage>,
        input_sample_rate: u32,
        session_id: String,
    ) {
        let mut audio_chunk_count: u64 = 0;
        let mut total_bytes: u64 = 0;

        while let Some(msg) = rx.recv().await {
            let json = match msg {
                OutboundMessage::Audio(pcm) => {
                    audio_chunk_count += 1;
                    total_bytes += pcm.len() as u64;
                    if audio_chunk_count == 1 || audio_chunk_count.is_multiple_of(50) {
                        tracing::info!(
                            session_id = %session_id,
                            chunk = audio_chunk_count,
                            pcm_bytes = pcm.len(),
                            total_bytes = total_bytes,
                            "Sending audio chunk to Gemini"
                        );
                    }
                    serde_json::to_string(&build_audio_message(&pcm, input_sample_rate))
                }
                OutboundMessage::AudioStreamEnd => {
                    tracing::debug!(session_id = %session_id, "Sending audioStreamEnd");
                    serde_json::to_string(&build_audio_stream_end_message())
                }
                OutboundMessage::Close => {
                    let _ = ws_sender.send(WsMessage::Close(None)).await;
                    break;
                }
            };

            match json {
                Ok(json) => {
                    if ws_sender.send(WsMessage::Text(json.into())).await.is_err() {
                        tracing::warn!(
                            session_id = %session_id,
                            "WebSocket send failed, closing outbound loop"
                        );
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(
                        session_id = %session_id,
                        error = %e,
                        "Failed to serialize outbound message"
                    );
                }
            }
        }

        tracing::debug!(
            session_id = %session_id,
            chunks = audio_chunk_count,
            total_bytes = total_bytes,
            "Outbound loop terminated"
        );
    }

    /// Inbound loop: parse server frames and forward events in order.
    async fn inbound_loop(
        mut ws_receiver: SplitStream<WsStream>,
        event_tx: mpsc::Sender<VoiceEvent>,
        session_id: String,
    ) {
        let start_time = std::time::Instant::now();
        let mut audio_response_count: u64 = 0;
        let mut turn_count: u64 = 0;

        while let Some(msg_result) = ws_receiver.next().await {
            let msg = match msg_result {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::error!(session_id = %session_id, error = %e, "Gemini Live WebSocket error");
                    let _ = event_tx
                        .send(VoiceEvent::Error {
                            message: format!("WebSocket error: {e}"),
                        })
                        .await;
                    break;
                }
            };

            if let WsMessage::Close(frame) = &msg {
                tracing::info!(session_id = %session_id, close_frame = ?frame, "Gemini Live connection closed");
                if let Some(reason) = abnormal_close_reason(&msg) {
                    let _ = event_tx.send(VoiceEvent::Error { message: reason }).await;
                }
                break;
            }

            let Some(text) = frame_json(&msg) else {
                if let WsMessage::Binary(data) = &msg {
                    tracing::warn!(
                        session_id = %session_id,
                        len = data.len(),
                        "Unexpected non-JSON binary frame from Gemini Live, skipping"
                    );
                }
                continue;
            };

            let events = match parse_server_message(text) {
                Ok(events) => events,
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "Dropping server frame");
                    continue;
                }
            };

            let elapsed = start_time.elapsed().as_secs_f32();
            for event in events {
                match &event {
                    VoiceEvent::Audio { data } => {
                        audio_response_count += 1;
                        tracing::debug!(
                            session_id = %session_id,
                            t = format!("{elapsed:.1}s"),
                            audio_n = audio_response_count,
                            bytes = data.len(),
                            "Gemini audio response"
                        );
                    }
                    VoiceEvent::TurnComplete => {
                        turn_count += 1;
                        tracing::info!(
                            session_id = %session_id,
                            t = format!("{elapsed:.1}s"),
                            turn = turn_count,
                            audio_chunks = audio_response_count,
                            "Turn complete"
                        );
                    }
                    VoiceEvent::Interrupted => {
                        tracing::info!(session_id = %session_id, t = format!("{elapsed:.1}s"), "Interrupted");
                    }
                    _ => {}
                }
                if event_tx.send(event).await.is_err() {
                    tracing::debug!(session_id = %session_id, "Event receiver dropped, closing inbound loop");
                    return;
                }
            }
        }

        tracing::debug!(session_id = %session_id, "Inbound loop terminated");
    }
}

impl GeminiLiveConnector {
    async fn open_link(&self, session_id: &str, config: &LiveSessionConfig) -> Result<LiveLink> {
        let url = format!("{}?key={}", self.endpoint, self.api_key);

        tracing::info!(
            session_id = %session_id,
            model = %config.model,
            "Connecting to Gemini Live"
        );

        let (mut ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| LiveError::connect(format!("Failed to connect to Gemini Live: {e}")))?;

        let setup_json = serde_json::to_string(&build_setup_message(config))?;
        tracing::debug!(session_id = %session_id, setup = %setup_json, "Sending Gemini Live setup");
        ws_stream
            .send(WsMessage::Text(setup_json.into()))
            .await
            .map_err(|e| LiveError::connect(format!("Failed to send setup message: {e}")))?;

        Self::await_setup_complete(&mut ws_stream, session_id, config.setup_timeout).await?;
        tracing::info!(session_id = %session_id, "Gemini Live setup complete, ready to stream");

        let (ws_sender, ws_receiver) = ws_stream.split();
        let (outbound_tx, outbound_rx) = mpsc::channel::<OutboundMessage>(LINK_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel::<VoiceEvent>(LINK_CHANNEL_CAPACITY);

        tokio::spawn(Self::outbound_loop(
            outbound_rx,
            ws_sender,
            config.input_sample_rate,
            session_id.to_string(),
        ));
        tokio::spawn(Self::inbound_loop(ws_receiver, event_tx, session_id.to_string()));

        Ok(LiveLink {
            outbound: outbound_tx,
            inbound: event_rx,
        })
    }
}

#[async_trait]
impl LiveConnector for GeminiLiveConnector {
    async fn connect(&self, session_id: &str, config: &LiveSessionConfig) -> Result<LiveLink> {
        self.open_link(session_id, config).await.map_err(|e| match e {
            LiveError::Connect { .. } => e,
            other => LiveError::connect(other.to_string()),
        })
    }
}

// ── Tests ──────────────────────────────────────────────────────────

//! Session transport: lifecycle of one remote streaming session.
//!
//! `Closed → Opening → Open → Closed`, with `Opening → Closed` on connect
//! failure. The transport owns the link to the remote service through a
//! spawned pump task and reports everything it learns as
//! [`SessionEvent`]s tagged with the session id, so the controller can
//! drop events that belong to a session it has already torn down.
//!
//! Sends issued while `Opening` queue up and flush in order once the link
//! is up. Sends while `Closed` are dropped.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::controller::{SessionEvent, SessionEventKind};
use super::gemini_live::VadConfig;
use super::VoiceEvent;
use crate::error::Result;

/// Parameters for opening a live session.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveSessionConfig {
    /// Model id without the `models/` prefix.
    pub model: String,
    pub system_instruction: String,
    pub input_transcription: bool,
    pub output_transcription: bool,
    pub voice_name: Option<String>,
    pub vad: Option<VadConfig>,
    /// Rate of outgoing PCM, advertised in the chunk MIME type.
    pub input_sample_rate: u32,
    /// How long to wait for the server to acknowledge setup.
    pub setup_timeout: Duration,
}

/// Client-to-server traffic on an open link.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// 16-bit little-endian PCM at the session's input rate.
    Audio(Vec<u8>),
    /// Microphone closed; flush buffered input server-side.
    AudioStreamEnd,
    /// Close the connection.
    Close,
}

/// An acknowledged connection to the remote service.
///
/// Dropping `inbound` or the remote closing ends the link; the connector's
/// tasks exit once `outbound` is dropped or carries `Close`.
pub struct LiveLink {
    pub outbound: mpsc::Sender<OutboundMessage>,
    pub inbound: mpsc::Receiver<VoiceEvent>,
}

/// Opens links to a remote live model. Implemented by the Gemini Live
/// client and by test doubles.
#[async_trait]
pub trait LiveConnector: Send + Sync {
    /// Connect and wait for the server to acknowledge setup.
    async fn connect(&self, session_id: &str, config: &LiveSessionConfig) -> Result<LiveLink>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Opening,
    Open,
    Closed,
}

impl std::fmt::Display for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Opening => write!(f, "opening"),
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Handle to one remote session. Created in `Opening`.
pub struct SessionTransport {
    session_id: Uuid,
    state: TransportState,
    outbound: mpsc::UnboundedSender<OutboundMessage>,
    sent_chunks: u64,
    dropped_chunks: u64,
}

impl SessionTransport {
    /// Begin connecting. Outcome arrives on `events` as `Opened` or
    /// `ConnectFailed`, followed by `Server` events and finally `Closed`.
    pub fn open(
        connector: Arc<dyn LiveConnector>,
        config: LiveSessionConfig,
        session_id: Uuid,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        tracing::info!(
            session_id = %session_id,
            model = %config.model,
            "Opening live session"
        );

        tokio::spawn(pump(connector, config, session_id, outbound_rx, events));

        Self {
            session_id,
            state: TransportState::Opening,
            outbound: outbound_tx,
            sent_chunks: 0,
            dropped_chunks: 0,
        }
    }

    /// The remote acknowledged open. Only meaningful from `Opening`.
    pub fn mark_open(&mut self) {
        if self.state == TransportState::Opening {
            self.state = TransportState::Open;
        }
    }

    /// Queue one encoded audio chunk. Returns `false` when dropped.
    pub fn send(&mut self, encoded: Vec<u8>) -> bool {
        if self.state == TransportState::Closed || encoded.is_empty() {
            self.dropped_chunks += 1;
            tracing::debug!(
                session_id = %self.session_id,
                dropped = self.dropped_chunks,
                "Dropping audio chunk, transport not open"
            );
            return false;
        }
        if self.outbound.send(OutboundMessage::Audio(encoded)).is_err() {
            self.dropped_chunks += 1;
            return false;
        }
        self.sent_chunks += 1;
        true
    }

    /// Request graceful shutdown. Idempotent; later sends are dropped.
    pub fn close(&mut self) {
        if self.state == TransportState::Closed {
            return;
        }
        if self.state == TransportState::Open {
            let _ = self.outbound.send(OutboundMessage::AudioStreamEnd);
        }
        let _ = self.outbound.send(OutboundMessage::Close);
        // The pump exits on its own once it has forwarded the close.
        self.state = TransportState::Closed;
        tracing::info!(
            session_id = %self.session_id,
            sent = self.sent_chunks,
            dropped = self.dropped_chunks,
            "Live session closed"
        );
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn sent_chunks(&self) -> u64 {
        self.sent_chunks
    }

    pub fn dropped_chunks(&self) -> u64 {
        self.dropped_chunks
    }
}

impl Drop for SessionTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Connects, then shuttles outbound messages to the link and server
/// events to the controller until either side closes.
async fn pump(
    connector: Arc<dyn LiveConnector>,
    config: LiveSessionConfig,
    session_id: Uuid,
    mut outbound_rx: mpsc::UnboundedReceiver<OutboundMessage>,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    let post = |kind: SessionEventKind| events.send(SessionEvent::new(session_id, kind)).is_ok();

    let link = match connector.connect(&session_id.to_string(), &config).await {
        Ok(link) => link,
        Err(e) => {
            tracing::warn!(session_id = %session_id, error = %e, "Live session connect failed");
            post(SessionEventKind::ConnectFailed(e));
            return;
        }
    };

    let LiveLink {
        outbound,
        mut inbound,
    } = link;

    if !post(SessionEventKind::Opened) {
        let _ = outbound.send(OutboundMessage::Close).await;
        return;
    }

    loop {
        tokio::select! {
            msg = outbound_rx.recv() => match msg {
                Some(OutboundMessage::Close) | None => {
                    let _ = outbound.send(OutboundMessage::Close).await;
                    break;
                }
                Some(msg) => {
                    if outbound.send(msg).await.is_err() {
                        tracing::debug!(session_id = %session_id, "Link outbound closed");
                    }
                }
            },
            event = inbound.recv() => match event {
                Some(event) => {
                    if !post(SessionEventKind::Server(event)) {
                        let _ = outbound.send(OutboundMessage::Close).await;
                        break;
                    }
                }
                None => {
                    post(SessionEventKind::Closed);
                    break;
                }
            },
        }
    }

    tracing::debug!(session_id = %session_id, "Transport pump terminated");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LiveError;
    use crate::test_support::{test_session_config, MockConnector};

    async fn next_kind(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEventKind {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for session event")
            .expect("event channel closed")
            .kind
    }

    #[tokio::test]
    async fn open_reports_opened_with_session_id() {
        let connector = MockConnector::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();

        let transport = SessionTransport::open(connector.clone(), test_session_config(), id, tx);
        assert_eq!(transport.state(), TransportState::Opening);

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.session_id, id);
        assert!(matches!(event.kind, SessionEventKind::Opened));
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn connect_failure_reports_connect_failed() {
        let connector = MockConnector::failing("dns lookup failed");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _transport = SessionTransport::open(connector, test_session_config(), Uuid::new_v4(), tx);

        match next_kind(&mut rx).await {
            SessionEventKind::ConnectFailed(LiveError::Connect { message }) => {
                assert!(message.contains("dns"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn sends_while_opening_flush_in_order() {
        let connector = MockConnector::gated();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut transport =
            SessionTransport::open(connector.clone(), test_session_config(), Uuid::new_v4(), tx);

        assert!(transport.send(vec![1, 1]));
        assert!(transport.send(vec![2, 2]));
        connector.release();

        assert!(matches!(next_kind(&mut rx).await, SessionEventKind::Opened));
        transport.mark_open();
        assert!(transport.send(vec![3, 3]));

        let link = connector.last_link().unwrap();
        let sent = link.wait_for_audio(3).await;
        assert_eq!(sent, vec![vec![1, 1], vec![2, 2], vec![3, 3]]);
    }

    #[tokio::test]
    async fn send_after_close_is_dropped() {
        let connector = MockConnector::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut transport =
            SessionTransport::open(connector.clone(), test_session_config(), Uuid::new_v4(), tx);
        assert!(matches!(next_kind(&mut rx).await, SessionEventKind::Opened));
        transport.mark_open();

        transport.close();
        assert_eq!(transport.state(), TransportState::Closed);
        assert!(!transport.send(vec![0, 0]));
        assert_eq!(transport.dropped_chunks(), 1);

        let link = connector.last_link().unwrap();
        link.wait_for_close().await;
        assert!(link.audio().is_empty());
        assert!(link.saw_stream_end());
    }

    #[tokio::test]
    async fn server_events_forwarded_in_order() {
        let connector = MockConnector::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _transport =
            SessionTransport::open(connector.clone(), test_session_config(), Uuid::new_v4(), tx);
        assert!(matches!(next_kind(&mut rx).await, SessionEventKind::Opened));

        let link = connector.last_link().unwrap();
        link.push(VoiceEvent::InputTranscript { text: "a".into() });
        link.push(VoiceEvent::OutputTranscript { text: "b".into() });
        link.push(VoiceEvent::TurnComplete);

        assert!(matches!(
            next_kind(&mut rx).await,
            SessionEventKind::Server(VoiceEvent::InputTranscript { text }) if text == "a"
        ));
        assert!(matches!(
            next_kind(&mut rx).await,
            SessionEventKind::Server(VoiceEvent::OutputTranscript { text }) if text == "b"
        ));
        assert!(matches!(
            next_kind(&mut rx).await,
            SessionEventKind::Server(VoiceEvent::TurnComplete)
        ));
    }

    #[tokio::test]
    async fn remote_hangup_reports_closed() {
        let connector = MockConnector::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _transport =
            SessionTransport::open(connector.clone(), test_session_config(), Uuid::new_v4(), tx);
        assert!(matches!(next_kind(&mut rx).await, SessionEventKind::Opened));

        connector.last_link().unwrap().hang_up();
        assert!(matches!(next_kind(&mut rx).await, SessionEventKind::Closed));
    }

    #[tokio::test]
    async fn close_while_opening_closes_link_after_connect() {
        let connector = MockConnector::gated();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut transport =
            SessionTransport::open(connector.clone(), test_session_config(), Uuid::new_v4(), tx);

        transport.close();
        connector.release();

        // The late acknowledgement is still reported; the link is then closed.
        assert!(matches!(next_kind(&mut rx).await, SessionEventKind::Opened));
        let link = connector.last_link().unwrap();
        link.wait_for_close().await;
        assert!(!link.saw_stream_end());
    }
}

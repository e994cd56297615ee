//! Transport abstraction and the WebSocket implementation
//!
//! The engine only needs a bidirectional channel: open it, push frames,
//! receive an ordered stream of inbound events, close it. Everything about
//! the wire (framing, TLS, authentication) stays behind this seam, which is
//! also what lets the integration tests drive the engine with an in-memory
//! transport.
//!
//! # Connection flow (WebSocket)
//!
//! 1. `open()` - establish the WebSocket with a bearer credential
//! 2. Send `session.setup`, wait for `session.ready`
//! 3. A reader task parses server messages into `TransportEvent`s
//! 4. `send()` pushes frames; `close()` aborts the reader and closes cleanly

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Message},
    MaybeTlsStream, WebSocketStream,
};

use super::protocol::{decode_audio, ClientMessage, ServerMessage};
use super::SessionError;
use crate::config::SessionConfig;
use crate::sink::Role;

/// Connection timeout for the WebSocket handshake
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for the endpoint to acknowledge the setup message
const SETUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Capacity of the inbound event channel
const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Inbound events surfaced to the session actor, in strict arrival order.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Incremental transcript text for one role's open turn
    Partial { role: Role, text: String },
    /// A decoded chunk of model audio (PCM16)
    Audio(Vec<i16>),
    /// The open turns are complete
    TurnComplete,
    /// The model's in-progress turn was cut off
    Interrupted,
    /// The connection closed; the engine decides whether that is expected
    Closed { reason: String },
    /// The endpoint reported a fatal protocol error
    ProtocolError(String),
}

/// The bidirectional channel to the remote endpoint.
#[async_trait]
pub trait Transport: Send {
    /// Open the channel and return the ordered inbound event stream.
    async fn open(
        &mut self,
        config: &SessionConfig,
    ) -> Result<mpsc::Receiver<TransportEvent>, SessionError>;

    /// Push one frame. Only valid after a successful `open`.
    async fn send(&mut self, msg: ClientMessage) -> Result<(), SessionError>;

    /// Close the channel. Safe to call at any time.
    async fn close(&mut self);
}

type WsSink = futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// WebSocket transport to a live voice endpoint.
pub struct WsTransport {
    write: Option<WsSink>,
    reader_task: Option<tokio::task::JoinHandle<()>>,
}

impl WsTransport {
    pub fn new() -> Self {
        Self {
            write: None,
            reader_task: None,
        }
    }

    async fn send_message(&mut self, msg: &ClientMessage) -> Result<(), SessionError> {
        let json =
            serde_json::to_string(msg).map_err(|e| SessionError::ProtocolError(e.to_string()))?;

        let write = self
            .write
            .as_mut()
            .ok_or_else(|| SessionError::SendFailed("transport is not open".to_string()))?;

        write
            .send(Message::Text(json))
            .await
            .map_err(|e| SessionError::SendFailed(e.to_string()))
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(
        &mut self,
        config: &SessionConfig,
    ) -> Result<mpsc::Receiver<TransportEvent>, SessionError> {
        let mut request = config
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| SessionError::ConnectionFailed(e.to_string()))?;

        request.headers_mut().insert(
            "Authorization",
            HeaderValue::from_str(&format!("Bearer {}", config.api_key))
                .map_err(|e| SessionError::AuthenticationFailed(e.to_string()))?,
        );

        log::info!("Connecting to {}...", config.endpoint);

        // disable_nagle: we want low latency on small audio frames
        let (ws_stream, _response) = timeout(
            CONNECTION_TIMEOUT,
            connect_async_with_config(request, None, false),
        )
        .await
        .map_err(|_| SessionError::ConnectionFailed("Connection timeout".to_string()))?
        .map_err(|e| SessionError::ConnectionFailed(e.to_string()))?;

        let (write, mut read) = ws_stream.split();
        self.write = Some(write);

        self.send_message(&ClientMessage::setup(config)).await?;

        log::info!("WebSocket connected, waiting for session.ready...");

        // Wait for the endpoint to accept the setup before streaming audio.
        timeout(SETUP_TIMEOUT, async {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(ServerMessage::SessionReady { id }) => {
                            log::info!("Session ready: {:?}", id);
                            return Ok(());
                        }
                        Ok(ServerMessage::Error { error }) => {
                            return Err(SessionError::AuthenticationFailed(error.message));
                        }
                        Ok(_) => {
                            log::debug!("Ignoring message while waiting for session.ready");
                        }
                        Err(e) => {
                            log::warn!("Failed to parse message: {}", e);
                        }
                    },
                    Ok(Message::Close(_)) => {
                        return Err(SessionError::Disconnected(
                            "Connection closed before session ready".to_string(),
                        ));
                    }
                    Err(e) => {
                        return Err(SessionError::ProtocolError(e.to_string()));
                    }
                    _ => {} // Ignore ping/pong/binary
                }
            }
            Err(SessionError::Disconnected("Stream ended".to_string()))
        })
        .await
        .map_err(|_| SessionError::ConnectionFailed("Setup acknowledgement timeout".to_string()))??;

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        // Reader task: parse server messages into ordered transport events.
        let reader_task = tokio::spawn(async move {
            let mut close_reason = "stream ended".to_string();

            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(msg) => {
                            let Some(event) = map_server_message(msg) else {
                                continue;
                            };
                            if event_tx.send(event).await.is_err() {
                                log::debug!("Event receiver dropped, reader exiting");
                                return;
                            }
                        }
                        Err(e) => {
                            log::warn!("Failed to parse message: {}", e);
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        close_reason = frame
                            .map(|f| f.reason.to_string())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "closed by server".to_string());
                        break;
                    }
                    Err(e) => {
                        close_reason = e.to_string();
                        break;
                    }
                    _ => {} // Ignore ping/pong/binary
                }
            }

            let _ = event_tx
                .send(TransportEvent::Closed {
                    reason: close_reason,
                })
                .await;
            log::debug!("Reader task exiting");
        });
        self.reader_task = Some(reader_task);

        Ok(event_rx)
    }

    async fn send(&mut self, msg: ClientMessage) -> Result<(), SessionError> {
        self.send_message(&msg).await
    }

    async fn close(&mut self) {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        if let Some(mut write) = self.write.take() {
            if let Err(e) = write.close().await {
                log::warn!("Error closing WebSocket: {}", e);
            }
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        // Ensure the reader task dies with the transport.
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
    }
}

/// Map a parsed server message to the event the actor consumes.
fn map_server_message(msg: ServerMessage) -> Option<TransportEvent> {
    match msg {
        ServerMessage::TranscriptDelta { role, delta } => {
            Some(TransportEvent::Partial { role, text: delta })
        }
        ServerMessage::AudioDelta { audio } => match decode_audio(&audio) {
            Ok(pcm) => Some(TransportEvent::Audio(pcm)),
            Err(e) => {
                log::warn!("Dropping undecodable audio chunk: {}", e);
                None
            }
        },
        ServerMessage::TurnComplete => Some(TransportEvent::TurnComplete),
        ServerMessage::Interrupted => Some(TransportEvent::Interrupted),
        ServerMessage::Error { error } => Some(TransportEvent::ProtocolError(error.message)),
        ServerMessage::SessionReady { .. } => {
            log::debug!("Ignoring duplicate session.ready");
            None
        }
        ServerMessage::Unknown => {
            log::debug!("Ignoring unknown server message");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine};

    #[test]
    fn transcript_delta_maps_to_partial() {
        let msg = ServerMessage::TranscriptDelta {
            role: Role::Model,
            delta: "Hi".to_string(),
        };
        match map_server_message(msg) {
            Some(TransportEvent::Partial { role, text }) => {
                assert_eq!(role, Role::Model);
                assert_eq!(text, "Hi");
            }
            other => panic!("unexpected mapping: {:?}", other),
        }
    }

    #[test]
    fn audio_delta_decodes_to_samples() {
        let payload = STANDARD.encode([0x34u8, 0x12, 0x78, 0x56]);
        let msg = ServerMessage::AudioDelta { audio: payload };
        match map_server_message(msg) {
            Some(TransportEvent::Audio(pcm)) => assert_eq!(pcm, vec![0x1234, 0x5678]),
            other => panic!("unexpected mapping: {:?}", other),
        }
    }

    #[test]
    fn bad_audio_payload_is_dropped_not_fatal() {
        let msg = ServerMessage::AudioDelta {
            audio: "not base64!!".to_string(),
        };
        assert!(map_server_message(msg).is_none());
    }

    #[test]
    fn server_error_maps_to_protocol_error() {
        let msg: ServerMessage = serde_json::from_str(
            r#"{"type": "error", "error": {"message": "quota exceeded"}}"#,
        )
        .unwrap();
        match map_server_message(msg) {
            Some(TransportEvent::ProtocolError(text)) => assert_eq!(text, "quota exceeded"),
            other => panic!("unexpected mapping: {:?}", other),
        }
    }

    #[test]
    fn unknown_messages_are_ignored() {
        assert!(map_server_message(ServerMessage::Unknown).is_none());
    }

    #[tokio::test]
    async fn send_before_open_fails_cleanly() {
        let mut transport = WsTransport::new();
        let result = transport.send(ClientMessage::text_input("hello")).await;
        assert!(matches!(result, Err(SessionError::SendFailed(_))));
    }

    #[tokio::test]
    async fn close_before_open_is_a_noop() {
        let mut transport = WsTransport::new();
        transport.close().await;
        transport.close().await;
    }
}

//! Session Push Channel
//!
//! WebSocket client for server-pushed session events. Subscribes to the
//! per-session topic and forwards decoded events over an mpsc channel; the
//! driver treats this as the fast path and keeps polling as the fallback.

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{error, info, warn};

use super::token::RotatingToken;

#[derive(Debug, Error)]
pub enum PushError {
    #[error("websocket connect failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("subscribe message could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Messages sent to the push endpoint
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum OutgoingMessage {
    #[serde(rename = "SUBSCRIBE")]
    Subscribe { topic: String },
}

/// Messages received on the session topic
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IncomingMessage {
    #[serde(rename = "type")]
    kind: String,
    #[allow(dead_code)]
    session_id: Option<String>,
    data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Qr2ActivatedData {
    rotating_token: String,
    valid_for_ms: Option<u64>,
}

/// Events emitted by the push client
#[derive(Debug, Clone)]
pub enum PushEvent {
    Connected,
    /// Stage two opened; carries the current rotating token
    Qr2Activated { token: RotatingToken },
    /// Instructor closed the session
    SessionEnded,
    Disconnected,
}

pub struct PushClient {
    url: String,
    session_id: String,
}

impl PushClient {
    pub fn new(url: &str, session_id: &str) -> Self {
        Self {
            url: url.to_string(),
            session_id: session_id.to_string(),
        }
    }

    pub fn topic(&self) -> String {
        format!("/topic/session/{}", self.session_id)
    }

    /// Connect, subscribe to the session topic and run the read loop.
    /// Returns the event channel; the loop ends when the socket closes or
    /// the receiver is dropped.
    pub async fn connect(&self) -> Result<mpsc::Receiver<PushEvent>, PushError> {
        info!("connecting push channel: {}", self.url);

        let (ws_stream, _) = connect_async(&self.url).await?;
        let (mut write, mut read) = ws_stream.split();

        let subscribe = OutgoingMessage::Subscribe { topic: self.topic() };
        let json = serde_json::to_string(&subscribe)?;
        write.send(Message::Text(json.into())).await?;

        info!("push channel subscribed to {}", self.topic());

        let (event_tx, event_rx) = mpsc::channel::<PushEvent>(32);

        tokio::spawn(async move {
            if event_tx.send(PushEvent::Connected).await.is_err() {
                return;
            }
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        match serde_json::from_str::<IncomingMessage>(&text) {
                            Ok(incoming) => {
                                if let Some(event) = map_incoming(incoming) {
                                    if event_tx.send(event).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            Err(e) => {
                                warn!("unparsable push message: {} - {}", text, e);
                            }
                        }
                    }
                    Ok(Message::Ping(payload)) => {
                        let _ = write.send(Message::Pong(payload)).await;
                    }
                    Ok(Message::Close(_)) => {
                        info!("push channel closed by server");
                        let _ = event_tx.send(PushEvent::Disconnected).await;
                        break;
                    }
                    Err(e) => {
                        error!("push channel error: {}", e);
                        let _ = event_tx.send(PushEvent::Disconnected).await;
                        break;
                    }
                    _ => {}
                }
            }
        });

        Ok(event_rx)
    }
}

fn map_incoming(msg: IncomingMessage) -> Option<PushEvent> {
    match msg.kind.as_str() {
        "QR2_ACTIVATED" => {
            let data = msg.data?;
            match serde_json::from_value::<Qr2ActivatedData>(data) {
                Ok(d) => Some(PushEvent::Qr2Activated {
                    token: RotatingToken::new(d.rotating_token, d.valid_for_ms),
                }),
                Err(e) => {
                    warn!("QR2_ACTIVATED with bad payload: {}", e);
                    None
                }
            }
        }
        "SESSION_ENDED" => Some(PushEvent::SessionEnded),
        other => {
            // Unknown event types are forward-compatibility, not errors
            warn!("ignoring push event type: {}", other);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_format() {
        let client = PushClient::new("ws://localhost:8080/ws", "abc123");
        assert_eq!(client.topic(), "/topic/session/abc123");
    }

    #[test]
    fn test_subscribe_wire_format() {
        let msg = OutgoingMessage::Subscribe {
            topic: "/topic/session/s1".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"SUBSCRIBE","topic":"/topic/session/s1"}"#);
    }

    #[test]
    fn test_qr2_activated_maps_to_event() {
        let msg: IncomingMessage = serde_json::from_str(
            r#"{"type":"QR2_ACTIVATED","sessionId":"s1","data":{"rotatingToken":"STEP-s1.2.sig","validForMs":20000}}"#,
        )
        .unwrap();
        match map_incoming(msg) {
            Some(PushEvent::Qr2Activated { token }) => {
                assert_eq!(token.value, "STEP-s1.2.sig");
                assert_eq!(token.valid_for_ms, Some(20000));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_event_type_is_ignored() {
        let msg: IncomingMessage =
            serde_json::from_str(r#"{"type":"ATTENDANCE_UPDATED","sessionId":"s1"}"#).unwrap();
        assert!(map_incoming(msg).is_none());
    }

    #[test]
    fn test_qr2_activated_without_payload_is_ignored() {
        let msg: IncomingMessage =
            serde_json::from_str(r#"{"type":"QR2_ACTIVATED","sessionId":"s1"}"#).unwrap();
        assert!(map_incoming(msg).is_none());
    }

    #[test]
    fn test_session_ended_maps_to_event() {
        let msg: IncomingMessage =
            serde_json::from_str(r#"{"type":"SESSION_ENDED","sessionId":"s1"}"#).unwrap();
        assert!(matches!(map_incoming(msg), Some(PushEvent::SessionEnded)));
    }
}

//! Connection Lifecycle Manager
//!
//! Accepts WebSocket connections, tracks the open-connection set, and turns
//! inbound frames into registry mutations and dispatcher calls. Each accepted
//! socket is split into a read loop plus one writer task fed by an unbounded
//! channel, so emission never blocks and never touches the socket from two
//! tasks. A connection may stay open without ever identifying; it then
//! receives presence snapshots but no message emissions.

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AppState;
use crate::delivery::SendRequest;
use crate::models::{PresenceEntry, UserProfile};

/// Inbound realtime events, tagged by their `event` field
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum InboundEvent {
    #[serde(rename_all = "camelCase")]
    Identify { user_id: String },
    #[serde(rename_all = "camelCase")]
    SendMessage {
        sender_id: String,
        #[serde(default)]
        receiver_id: Option<String>,
        message: String,
        conversation_id: String,
    },
}

/// Outbound realtime events
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum OutboundEvent {
    #[serde(rename_all = "camelCase")]
    PresenceSnapshot { users: Vec<PresenceEntry> },
    #[serde(rename_all = "camelCase")]
    MessageDelivered {
        sender_id: String,
        message: String,
        conversation_id: String,
        receiver_id: Option<String>,
        user: UserProfile,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        reason: &'static str,
        detail: String,
    },
}

/// One live connection: an id plus the sending half of its outbound channel
#[derive(Clone)]
pub struct ConnectionHandle {
    id: String,
    tx: mpsc::UnboundedSender<OutboundEvent>,
}

impl ConnectionHandle {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: Uuid::new_v4().to_string(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Fire-and-forget emission. A closed channel means the connection is
    /// already going away; the event is dropped.
    pub fn emit(&self, event: OutboundEvent) {
        let _ = self.tx.send(event);
    }
}

/// Every open connection, identified or not. Presence snapshots broadcast
/// here; message emissions go through the Presence Registry instead.
#[derive(Default)]
pub struct ConnectionSet {
    connections: RwLock<HashMap<String, ConnectionHandle>>,
}

impl ConnectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: ConnectionHandle) {
        self.connections
            .write()
            .insert(handle.id().to_string(), handle);
    }

    pub fn remove(&self, handle: &ConnectionHandle) {
        self.connections.write().remove(handle.id());
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Send `event` to every open connection. Handles are cloned out under
    /// the lock and emitted to after it is released.
    pub fn broadcast(&self, event: OutboundEvent) {
        let handles: Vec<ConnectionHandle> =
            self.connections.read().values().cloned().collect();
        for handle in handles {
            handle.emit(event.clone());
        }
    }
}

/// GET /ws
pub async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (handle, mut outbound_rx) = ConnectionHandle::new();

    state.connections.insert(handle.clone());
    info!(
        "[Realtime] Connection {} open ({} total)",
        handle.id(),
        state.connections.len()
    );

    let writer = tokio::spawn(async move {
        while let Some(event) = outbound_rx.recv().await {
            let frame = match serde_json::to_string(&event) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("[Realtime] Failed to encode outbound event: {}", e);
                    continue;
                }
            };
            if ws_tx.send(WsMessage::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => handle_frame(&state, &handle, text.as_str()).await,
            Ok(WsMessage::Close(_)) | Err(_) => break,
            // Binary frames and pings are ignored; the transport answers
            // pings itself
            Ok(_) => {}
        }
    }

    state.connections.remove(&handle);
    if state.presence.unregister(&handle) > 0 {
        state.connections.broadcast(OutboundEvent::PresenceSnapshot {
            users: state.presence.snapshot(),
        });
    }
    writer.abort();

    info!(
        "[Realtime] Connection {} closed ({} total)",
        handle.id(),
        state.connections.len()
    );
}

/// Decode and dispatch one inbound frame. Failures are reported back to the
/// issuing connection only and never close it.
async fn handle_frame(state: &AppState, handle: &ConnectionHandle, text: &str) {
    let event: InboundEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            warn!("[Realtime] Malformed frame on {}: {}", handle.id(), e);
            handle.emit(OutboundEvent::Error {
                reason: "invalid_request",
                detail: e.to_string(),
            });
            return;
        }
    };

    match event {
        InboundEvent::Identify { user_id } => {
            if user_id.trim().is_empty() {
                handle.emit(OutboundEvent::Error {
                    reason: "invalid_request",
                    detail: "identify requires a userId".to_string(),
                });
                return;
            }
            if state.presence.register(&user_id, handle.clone()) {
                info!("[Realtime] {} identified as {}", handle.id(), user_id);
                state.connections.broadcast(OutboundEvent::PresenceSnapshot {
                    users: state.presence.snapshot(),
                });
            }
        }
        InboundEvent::SendMessage {
            sender_id,
            receiver_id,
            message,
            conversation_id,
        } => {
            let request = SendRequest {
                sender_id,
                receiver_id,
                text: message,
                conversation_id,
            };
            match state.dispatcher.send_message(request).await {
                Ok(receipt) => info!(
                    "[Realtime] Message {} persisted, {} live emission(s)",
                    receipt.message.id, receipt.emissions
                ),
                Err(e) => {
                    warn!("[Realtime] Send failed on {}: {}", handle.id(), e);
                    handle.emit(OutboundEvent::Error {
                        reason: e.reason(),
                        detail: e.to_string(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn inbound_events_decode_from_tagged_frames() {
        let identify: InboundEvent =
            serde_json::from_str(r#"{"event":"identify","userId":"alice"}"#).unwrap();
        assert!(matches!(identify, InboundEvent::Identify { user_id } if user_id == "alice"));

        let send: InboundEvent = serde_json::from_str(
            r#"{"event":"sendMessage","senderId":"alice","receiverId":"bob","message":"hi","conversationId":"c1"}"#,
        )
        .unwrap();
        match send {
            InboundEvent::SendMessage {
                sender_id,
                receiver_id,
                message,
                conversation_id,
            } => {
                assert_eq!(sender_id, "alice");
                assert_eq!(receiver_id.as_deref(), Some("bob"));
                assert_eq!(message, "hi");
                assert_eq!(conversation_id, "c1");
            }
            _ => panic!("expected sendMessage"),
        }
    }

    #[test]
    fn unknown_event_is_rejected() {
        let result: Result<InboundEvent, _> =
            serde_json::from_str(r#"{"event":"typing","userId":"alice"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn outbound_events_encode_with_camel_case_keys() {
        let snapshot = OutboundEvent::PresenceSnapshot {
            users: vec![PresenceEntry {
                user_id: "alice".into(),
                connection_handle: "h1".into(),
            }],
        };
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "presenceSnapshot",
                "users": [{"userId": "alice", "connectionHandle": "h1"}]
            })
        );

        let delivered = OutboundEvent::MessageDelivered {
            sender_id: "alice".into(),
            message: "hi".into(),
            conversation_id: "c1".into(),
            receiver_id: Some("bob".into()),
            user: UserProfile {
                id: "alice".into(),
                full_name: "Alice".into(),
                email: "alice@example.com".into(),
            },
        };
        let value = serde_json::to_value(&delivered).unwrap();
        assert_eq!(value["event"], "messageDelivered");
        assert_eq!(value["user"]["fullName"], "Alice");
    }

    #[test]
    fn broadcast_reaches_every_open_connection() {
        let set = ConnectionSet::new();
        let (h1, mut rx1) = ConnectionHandle::new();
        let (h2, mut rx2) = ConnectionHandle::new();
        set.insert(h1);
        set.insert(h2);

        set.broadcast(OutboundEvent::PresenceSnapshot { users: vec![] });

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }
}

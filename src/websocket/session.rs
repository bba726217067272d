use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::config::WebSocketConfig;
use crate::websocket::protocol::{self, ClientMessage, Envelope};
use crate::websocket::registry::{ConnectionRegistry, OutboundSender};

/// One client's view of the gateway: dispatches the control messages it
/// sends and keeps its heartbeat. Identity is resolved before the
/// session exists; the session performs no authorization.
pub struct Session {
    user_id: String,
    registry: Arc<ConnectionRegistry>,
    tx: OutboundSender,
    last_heartbeat: Arc<RwLock<Instant>>,
}

impl Session {
    pub fn new(user_id: String, registry: Arc<ConnectionRegistry>, tx: OutboundSender) -> Self {
        Self {
            user_id,
            registry,
            tx,
            last_heartbeat: Arc::new(RwLock::new(Instant::now())),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Handles one inbound text frame. Parse failures and unknown types
    /// are reported back to this connection only and never escape the
    /// receive loop.
    pub async fn handle_text(&self, text: &str) {
        let message = match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(user_id = %self.user_id, error = %e, "Rejected malformed message");
                self.reply(protocol::error_reply(&format!(
                    "Invalid message format: {}",
                    e
                )));
                return;
            }
        };

        match message {
            ClientMessage::JoinRoom { room_id } => {
                self.registry.join_room(&self.user_id, &room_id).await;
                self.reply(protocol::room_joined(&room_id));
            }
            ClientMessage::LeaveRoom { room_id } => {
                self.registry.leave_room(&self.user_id, &room_id).await;
                self.reply(protocol::room_left(&room_id));
            }
            ClientMessage::Ping => {
                self.touch().await;
                self.reply(Envelope::pong().to_message());
            }
            ClientMessage::GetStatus => {
                let rooms = self
                    .registry
                    .user_rooms(&self.user_id)
                    .await
                    .into_iter()
                    .collect();
                self.reply(Envelope::status(&self.user_id, rooms).to_message());
            }
        }
    }

    /// Records traffic from the client so the heartbeat does not time it
    /// out.
    pub async fn touch(&self) {
        *self.last_heartbeat.write().await = Instant::now();
    }

    fn reply(&self, message: Message) {
        // A failed reply means the writer is gone; the receive loop is
        // about to observe the same and tear the session down.
        if self.tx.send(message).is_err() {
            warn!(user_id = %self.user_id, "Failed to queue reply, writer gone");
        }
    }

    /// Periodically pings the client over the protocol and closes the
    /// connection when it stays silent past the timeout.
    pub fn start_heartbeat(&self, config: &WebSocketConfig) {
        let interval = Duration::from_secs(config.heartbeat_interval_secs);
        let timeout = Duration::from_secs(config.heartbeat_timeout_secs);
        let last_heartbeat = self.last_heartbeat.clone();
        let tx = self.tx.clone();
        let user_id = self.user_id.clone();

        tokio::spawn(async move {
            loop {
                sleep(interval).await;

                let elapsed = last_heartbeat.read().await.elapsed();
                if elapsed > timeout {
                    info!(user_id = %user_id, "Heartbeat timeout, closing connection");
                    let _ = tx.send(Message::Close(None));
                    break;
                }

                if tx.send(Message::Ping(vec![])).is_err() {
                    break;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn session_with(
        registry: &Arc<ConnectionRegistry>,
        user_id: &str,
    ) -> (Session, UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Session::new(user_id.to_string(), registry.clone(), tx);
        (session, rx)
    }

    fn recv_json(rx: &mut UnboundedReceiver<Message>) -> Value {
        match rx.try_recv() {
            Ok(Message::Text(text)) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected a text frame, got {:?}", other),
        }
    }

    fn assert_empty(rx: &mut UnboundedReceiver<Message>) {
        assert!(rx.try_recv().is_err(), "expected no pending messages");
    }

    #[tokio::test]
    async fn test_ping_yields_one_pong_to_sender_only() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (session, mut rx) = session_with(&registry, "u1");
        let (other_tx, mut other_rx) = mpsc::unbounded_channel();
        registry.connect("u2", other_tx).await;

        session.handle_text(r#"{"type":"ping"}"#).await;

        assert_eq!(recv_json(&mut rx)["type"], "pong");
        assert_empty(&mut rx);
        assert_empty(&mut other_rx);
    }

    #[tokio::test]
    async fn test_unknown_type_yields_error_to_sender_only() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (session, mut rx) = session_with(&registry, "u1");
        let (other_tx, mut other_rx) = mpsc::unbounded_channel();
        registry.connect("u2", other_tx).await;
        registry.join_room("u2", "p1").await;

        session.handle_text(r#"{"type":"bogus"}"#).await;

        let value = recv_json(&mut rx);
        assert_eq!(value["type"], "error");
        assert!(value["message"].as_str().unwrap().contains("Invalid message format"));
        assert_empty(&mut rx);
        assert_empty(&mut other_rx);
    }

    #[tokio::test]
    async fn test_invalid_json_yields_error() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (session, mut rx) = session_with(&registry, "u1");

        session.handle_text("{not json").await;

        assert_eq!(recv_json(&mut rx)["type"], "error");
        assert_empty(&mut rx);
    }

    #[tokio::test]
    async fn test_join_and_leave_room_messages() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (reg_tx, _reg_rx) = mpsc::unbounded_channel();
        registry.connect("u1", reg_tx).await;
        let (session, mut rx) = session_with(&registry, "u1");

        session
            .handle_text(r#"{"type":"join_room","room_id":"p42"}"#)
            .await;
        let value = recv_json(&mut rx);
        assert_eq!(value["type"], "room_joined");
        assert_eq!(value["room_id"], "p42");
        assert!(registry.room_members("p42").await.contains("u1"));

        session
            .handle_text(r#"{"type":"leave_room","room_id":"p42"}"#)
            .await;
        let value = recv_json(&mut rx);
        assert_eq!(value["type"], "room_left");
        assert!(registry.room_members("p42").await.is_empty());
    }

    #[tokio::test]
    async fn test_get_status_reports_rooms() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (reg_tx, _reg_rx) = mpsc::unbounded_channel();
        registry.connect("u1", reg_tx).await;
        registry.join_room("u1", "p1").await;
        let (session, mut rx) = session_with(&registry, "u1");

        session.handle_text(r#"{"type":"get_status"}"#).await;

        let value = recv_json(&mut rx);
        assert_eq!(value["type"], "status");
        assert_eq!(value["data"]["user_id"], "u1");
        assert_eq!(value["data"]["rooms"][0], "p1");
    }
}

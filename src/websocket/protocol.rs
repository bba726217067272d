use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;

/// Control messages accepted from a client, tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    JoinRoom { room_id: String },
    LeaveRoom { room_id: String },
    Ping,
    GetStatus,
}

/// Outbound event envelope: `{"type": ..., "data": ..., "timestamp": ...}`.
///
/// The `data` payload is opaque to the gateway; producers (comment, task
/// and project handlers) decide its shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
    pub timestamp: String,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn notification(data: Value) -> Self {
        Self::new("notification", data)
    }

    pub fn project_update(data: Value) -> Self {
        Self::new("project_update", data)
    }

    pub fn comment_update(data: Value) -> Self {
        Self::new("comment_update", data)
    }

    pub fn user_activity(user_id: &str, activity: &str) -> Self {
        Self::new(
            "user_activity",
            json!({
                "user_id": user_id,
                "activity": activity,
                "timestamp": Utc::now().to_rfc3339(),
            }),
        )
    }

    pub fn pong() -> Self {
        Self::new("pong", json!({}))
    }

    pub fn connection_established(user_id: &str) -> Self {
        Self::new("connection_established", json!({ "user_id": user_id }))
    }

    pub fn status(user_id: &str, rooms: Vec<String>) -> Self {
        Self::new("status", json!({ "user_id": user_id, "rooms": rooms }))
    }

    pub fn to_message(&self) -> Message {
        // Envelope fields are a string and a Value; serialization cannot fail
        Message::Text(serde_json::to_string(self).unwrap_or_default())
    }
}

/// `{"type":"error","message":...}`, sent back to the offending
/// connection only. Deliberately not an [`Envelope`]: clients key on the
/// flat `message` field.
pub fn error_reply(message: &str) -> Message {
    Message::Text(json!({ "type": "error", "message": message }).to_string())
}

pub fn room_joined(room_id: &str) -> Message {
    Message::Text(json!({ "type": "room_joined", "room_id": room_id }).to_string())
}

pub fn room_left(room_id: &str) -> Message {
    Message::Text(json!({ "type": "room_left", "room_id": room_id }).to_string())
}

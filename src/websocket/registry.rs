use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::websocket::protocol::Envelope;

/// Sender half of a connection's writer channel. The registry never
/// touches the socket directly; the session's writer task drains this
/// channel into the sink, so registry writes never block on I/O.
pub type OutboundSender = mpsc::UnboundedSender<Message>;

#[derive(Debug, Clone)]
struct ConnectionHandle {
    session: Uuid,
    sender: OutboundSender,
    connected_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct RegistryState {
    connections: HashMap<String, ConnectionHandle>,
    user_rooms: HashMap<String, HashSet<String>>,
    room_members: HashMap<String, HashSet<String>>,
}

impl RegistryState {
    /// Drops a connection and purges its memberships in one step, so no
    /// reader can observe a dangling membership. Rooms left empty are
    /// removed outright.
    fn remove_connection(&mut self, user_id: &str) -> bool {
        if self.connections.remove(user_id).is_none() {
            return false;
        }
        if let Some(rooms) = self.user_rooms.remove(user_id) {
            for room_id in rooms {
                if let Some(members) = self.room_members.get_mut(&room_id) {
                    members.remove(user_id);
                    if members.is_empty() {
                        self.room_members.remove(&room_id);
                    }
                }
            }
        }
        true
    }
}

/// Tracks live connections and room memberships, and fans events out to
/// one user, one room, or everyone.
///
/// All state sits behind a single lock: mutations are atomic with
/// respect to each other, and broadcasts snapshot their target set under
/// the lock before performing the actual writes outside it. A write
/// failure reaps that connection and never aborts delivery to the rest.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection for `user_id` and returns its session id,
    /// used by the serving layer to scope later cleanup to this exact
    /// registration.
    ///
    /// A second `connect` for the same user supersedes the first: the old
    /// transport is told to close and only the new one receives messages
    /// from then on. Room memberships survive the swap; the user
    /// reconnected, they did not leave their projects.
    pub async fn connect(&self, user_id: &str, sender: OutboundSender) -> Uuid {
        let session = Uuid::new_v4();
        let handle = ConnectionHandle {
            session,
            sender,
            connected_at: Utc::now(),
        };

        let mut state = self.state.write().await;
        state.user_rooms.entry(user_id.to_string()).or_default();
        if let Some(old) = state.connections.insert(user_id.to_string(), handle) {
            info!(user_id, "Superseding existing connection");
            let _ = old.sender.send(Message::Close(None));
        } else {
            info!(user_id, "User connected");
        }
        session
    }

    /// Deregisters `user_id` and purges its room memberships. Idempotent:
    /// disconnecting an unknown user is a no-op.
    pub async fn disconnect(&self, user_id: &str) {
        let mut state = self.state.write().await;
        if state.remove_connection(user_id) {
            info!(user_id, "User disconnected");
        }
    }

    /// Like [`disconnect`](Self::disconnect), but only if `session` is
    /// still the user's current registration. A superseded connection's
    /// receive loop calls this on exit without evicting its replacement.
    pub async fn disconnect_session(&self, user_id: &str, session: Uuid) {
        let mut state = self.state.write().await;
        let current = state
            .connections
            .get(user_id)
            .map_or(false, |handle| handle.session == session);
        if current && state.remove_connection(user_id) {
            info!(user_id, "User disconnected");
        }
    }

    /// Adds `user_id` to a room. Requires an active connection; callers
    /// perform any project-membership authorization before this point.
    /// Idempotent.
    pub async fn join_room(&self, user_id: &str, room_id: &str) {
        let mut state = self.state.write().await;
        if !state.connections.contains_key(user_id) {
            warn!(user_id, room_id, "Ignoring join_room for unconnected user");
            return;
        }
        state
            .user_rooms
            .entry(user_id.to_string())
            .or_default()
            .insert(room_id.to_string());
        state
            .room_members
            .entry(room_id.to_string())
            .or_default()
            .insert(user_id.to_string());
        info!(user_id, room_id, "User joined room");
    }

    /// Removes `user_id` from a room, deleting the room entry once its
    /// last member leaves. Idempotent.
    pub async fn leave_room(&self, user_id: &str, room_id: &str) {
        let mut state = self.state.write().await;
        if let Some(rooms) = state.user_rooms.get_mut(user_id) {
            rooms.remove(room_id);
        }
        if let Some(members) = state.room_members.get_mut(room_id) {
            members.remove(user_id);
            if members.is_empty() {
                state.room_members.remove(room_id);
            }
        }
        info!(user_id, room_id, "User left room");
    }

    /// Delivers an envelope to one user. A no-op if the user has no
    /// active connection; a write failure reaps the connection instead of
    /// surfacing to the caller.
    pub async fn send_to_user(&self, user_id: &str, envelope: &Envelope) {
        let handle = {
            let state = self.state.read().await;
            state.connections.get(user_id).cloned()
        };
        let Some(handle) = handle else {
            debug!(user_id, "Dropping message for unconnected user");
            return;
        };
        if handle.sender.send(envelope.to_message()).is_err() {
            self.reap(user_id, handle.session).await;
        }
    }

    /// Delivers an envelope to every member of a room except `exclude`.
    /// Each member's write is independent: a failure reaps that member
    /// and delivery to the others continues.
    pub async fn broadcast_to_room(&self, room_id: &str, envelope: &Envelope, exclude: Option<&str>) {
        let targets = {
            let state = self.state.read().await;
            let Some(members) = state.room_members.get(room_id) else {
                return;
            };
            members
                .iter()
                .filter(|user_id| exclude != Some(user_id.as_str()))
                .filter_map(|user_id| {
                    state
                        .connections
                        .get(user_id)
                        .map(|handle| (user_id.clone(), handle.clone()))
                })
                .collect::<Vec<_>>()
        };
        let recipients = self.fan_out(targets, envelope).await;
        debug!(room_id, recipients, "Room broadcast delivered");
    }

    /// Delivers an envelope to every connected user.
    pub async fn broadcast_to_all(&self, envelope: &Envelope) {
        let targets = {
            let state = self.state.read().await;
            state
                .connections
                .iter()
                .map(|(user_id, handle)| (user_id.clone(), handle.clone()))
                .collect::<Vec<_>>()
        };
        let recipients = self.fan_out(targets, envelope).await;
        debug!(recipients, "Global broadcast delivered");
    }

    /// Writes one serialized message to each snapshotted target, reaping
    /// every target that fails. Returns the number of successful writes.
    async fn fan_out(&self, targets: Vec<(String, ConnectionHandle)>, envelope: &Envelope) -> usize {
        let message = envelope.to_message();
        let mut delivered = 0;
        let mut failed = Vec::new();
        for (user_id, handle) in targets {
            if handle.sender.send(message.clone()).is_ok() {
                delivered += 1;
            } else {
                failed.push((user_id, handle.session));
            }
        }
        for (user_id, session) in failed {
            self.reap(&user_id, session).await;
        }
        delivered
    }

    /// Stale-connection reclamation: every write-failure site funnels
    /// here. Scoped by session so a user who reconnected between the
    /// snapshot and the failed write is not evicted.
    async fn reap(&self, user_id: &str, session: Uuid) {
        let mut state = self.state.write().await;
        let current = state
            .connections
            .get(user_id)
            .map_or(false, |handle| handle.session == session);
        if current && state.remove_connection(user_id) {
            warn!(user_id, "Reaped stale connection after write failure");
        }
    }

    pub async fn send_notification(&self, user_id: &str, data: Value) {
        self.send_to_user(user_id, &Envelope::notification(data)).await;
    }

    pub async fn send_project_update(&self, room_id: &str, data: Value, exclude: Option<&str>) {
        self.broadcast_to_room(room_id, &Envelope::project_update(data), exclude)
            .await;
    }

    pub async fn send_comment_update(&self, room_id: &str, data: Value, exclude: Option<&str>) {
        self.broadcast_to_room(room_id, &Envelope::comment_update(data), exclude)
            .await;
    }

    /// Announces `user_id`'s activity to the rest of the room; the acting
    /// user does not hear their own echo.
    pub async fn send_user_activity(&self, room_id: &str, user_id: &str, activity: &str) {
        self.broadcast_to_room(room_id, &Envelope::user_activity(user_id, activity), Some(user_id))
            .await;
    }

    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }

    pub async fn room_count(&self) -> usize {
        self.state.read().await.room_members.len()
    }

    pub async fn room_members(&self, room_id: &str) -> HashSet<String> {
        self.state
            .read()
            .await
            .room_members
            .get(room_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn user_rooms(&self, user_id: &str) -> HashSet<String> {
        self.state
            .read()
            .await
            .user_rooms
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn is_connected(&self, user_id: &str) -> bool {
        self.state.read().await.connections.contains_key(user_id)
    }

    /// When the user's current connection was registered, for last-seen
    /// style diagnostics.
    pub async fn connected_at(&self, user_id: &str) -> Option<DateTime<Utc>> {
        self.state
            .read()
            .await
            .connections
            .get(user_id)
            .map(|handle| handle.connected_at)
    }

    /// Closes every connection and clears all state. Used on shutdown.
    pub async fn close_all(&self) {
        let mut state = self.state.write().await;
        for handle in state.connections.values() {
            let _ = handle.sender.send(Message::Close(None));
        }
        let count = state.connections.len();
        *state = RegistryState::default();
        info!(count, "Closed all connections");
    }
}

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::websocket::protocol::Envelope;
use crate::websocket::registry::ConnectionRegistry;
use crate::websocket::session::Session;

pub struct WebSocketServer {
    registry: Arc<ConnectionRegistry>,
    settings: Arc<Settings>,
}

impl WebSocketServer {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            settings,
        }
    }

    /// The shared registry, for the REST layer and admin diagnostics.
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    /// Serves one client connection to completion: handshake, identity
    /// resolution from the request path, registration, receive loop,
    /// deregistration.
    ///
    /// Token validation happens upstream (the reverse proxy / REST layer
    /// terminates auth before traffic reaches this listener); by the
    /// time a path like `/ws/{user_id}` arrives here the identity is
    /// taken at face value. A path without a user id gets an anonymous
    /// identity.
    pub async fn handle_connection(
        self: Arc<Self>,
        raw_stream: tokio::net::TcpStream,
        addr: SocketAddr,
    ) {
        info!(%addr, "New WebSocket connection");

        let mut path = String::new();
        let callback = |req: &Request, resp: Response| {
            path = req.uri().path().to_string();
            Ok(resp)
        };
        let ws_stream = match tokio_tungstenite::accept_hdr_async(raw_stream, callback).await {
            Ok(ws) => ws,
            Err(e) => {
                error!(%addr, error = %e, "WebSocket handshake failed");
                return;
            }
        };

        let user_id = identity_from_path(&path);
        let (ws_sink, mut ws_stream) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel();

        // Writer task: the only place that touches the sink. Everything
        // else, registry included, queues frames through the channel.
        let writer_user = user_id.clone();
        tokio::spawn(async move {
            let mut ws_sink = ws_sink;
            while let Some(message) = rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = ws_sink.send(message).await {
                    warn!(user_id = %writer_user, error = %e, "Error writing WebSocket frame");
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = ws_sink.close().await;
        });

        let session = Session::new(user_id.clone(), self.registry.clone(), tx.clone());
        session.start_heartbeat(&self.settings.websocket);

        let session_id = self.registry.connect(&user_id, tx.clone()).await;
        let _ = tx.send(Envelope::connection_established(&user_id).to_message());

        while let Some(message) = ws_stream.next().await {
            match message {
                Ok(Message::Text(text)) => session.handle_text(&text).await,
                Ok(Message::Ping(data)) => {
                    session.touch().await;
                    let _ = tx.send(Message::Pong(data));
                }
                Ok(Message::Pong(_)) => session.touch().await,
                Ok(Message::Close(_)) => {
                    info!(user_id = %user_id, "Client initiated close");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "Error receiving WebSocket frame");
                    break;
                }
            }
        }

        // Scoped to this session: if the user already reconnected, the
        // replacement registration stays.
        self.registry.disconnect_session(&user_id, session_id).await;
        info!(user_id = %user_id, %addr, "Connection closed");
    }
}

/// Resolves the connection's identity from the request path
/// (`/ws/{user_id}`). Connections that present no user id are tracked
/// under a generated anonymous identity.
fn identity_from_path(path: &str) -> String {
    path.strip_prefix("/ws/")
        .map(|rest| rest.trim_matches('/'))
        .filter(|rest| !rest.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("anon-{}", Uuid::new_v4()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_from_path() {
        assert_eq!(identity_from_path("/ws/u1"), "u1");
        assert_eq!(identity_from_path("/ws/42/"), "42");
    }

    #[test]
    fn test_identity_from_bare_path_is_anonymous() {
        let id = identity_from_path("/ws");
        assert!(id.starts_with("anon-"));
        let id = identity_from_path("/ws/");
        assert!(id.starts_with("anon-"));
        // Each anonymous connection gets its own identity
        assert_ne!(identity_from_path("/ws"), identity_from_path("/ws"));
    }
}

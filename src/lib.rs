pub mod config;
pub mod error;
pub mod websocket;

use std::sync::Arc;

pub use config::Settings;
pub use error::AppError;
pub type Result<T> = std::result::Result<T, AppError>;

pub use websocket::{ConnectionRegistry, Envelope, WebSocketServer};

/// Application state shared across all components
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub server: Arc<WebSocketServer>,
}

impl AppState {
    pub fn new(config: Settings) -> Self {
        let config = Arc::new(config);
        let server = Arc::new(WebSocketServer::new(config.clone()));
        Self { config, server }
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.server.registry()
    }

    /// Closes every live connection. Called on shutdown.
    pub async fn shutdown(&self) {
        self.registry().close_all().await;
    }
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("WebSocket error: {0}")]
    WebSocketError(#[from] WebSocketError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

// Implement conversion from config::ConfigError
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

// Add conversion from std::io::Error
impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum WebSocketError {
    #[error("Handshake failed: {0}")]
    HandshakeError(String),

    #[error("Message sending failed: {0}")]
    SendError(String),

    #[error("Invalid message format: {0}")]
    InvalidFormat(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_error_conversion() {
        // Test IO error conversion
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let app_err: AppError = io_err.into();
        assert!(matches!(app_err, AppError::InternalError(_)));

        // Test config error conversion
        let config_err = config::ConfigError::NotFound(String::from("key not found"));
        let app_err: AppError = config_err.into();
        assert!(matches!(app_err, AppError::ConfigError(_)));

        // Test websocket error conversion
        let ws_err = WebSocketError::SendError("channel closed".to_string());
        let app_err: AppError = ws_err.into();
        assert!(matches!(app_err, AppError::WebSocketError(_)));
    }

    #[test]
    fn test_error_display() {
        let err = AppError::ConfigError("missing key".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing key");

        let err = AppError::WebSocketError(WebSocketError::InvalidFormat("not json".to_string()));
        assert_eq!(
            err.to_string(),
            "WebSocket error: Invalid message format: not json"
        );
    }
}

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebSocketConfig {
    pub heartbeat_interval_secs: u64,
    pub heartbeat_timeout_secs: u64,
    pub stats_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub environment: String,
    pub server: ServerConfig,
    pub websocket: WebSocketConfig,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start with default values
            .set_default("environment", "development")?
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("websocket.heartbeat_interval_secs", 30)?
            .set_default("websocket.heartbeat_timeout_secs", 40)?
            .set_default("websocket.stats_interval_secs", 60)?
            // Add in settings from the config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add in settings from environment variables (with prefix "APP_")
            // E.g., `APP_SERVER__PORT=5001` would set `Settings.server.port`
            .add_source(
                Environment::with_prefix("app")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        s.try_deserialize()
    }

    #[cfg(test)]
    pub fn new_for_test() -> Result<Self, ConfigError> {
        Config::builder()
            .set_default("environment", "test")?
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("websocket.heartbeat_interval_secs", 1)?
            .set_default("websocket.heartbeat_timeout_secs", 2)?
            .set_default("websocket.stats_interval_secs", 5)?
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn cleanup_env() {
        env::remove_var("APP_SERVER__PORT");
        env::remove_var("APP_SERVER__HOST");
        env::remove_var("APP_WEBSOCKET__HEARTBEAT_INTERVAL_SECS");
        env::remove_var("APP_WEBSOCKET__HEARTBEAT_TIMEOUT_SECS");
    }

    #[test]
    fn test_settings_defaults() {
        cleanup_env();
        let settings = Settings::new_for_test().expect("Failed to load settings");
        assert_eq!(settings.environment, "test");
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.websocket.heartbeat_interval_secs, 1);
        assert_eq!(settings.websocket.heartbeat_timeout_secs, 2);
    }

    #[test]
    fn test_environment_override() {
        cleanup_env();

        env::set_var("APP_SERVER__HOST", "0.0.0.0");
        env::set_var("APP_SERVER__PORT", "9000");
        env::set_var("APP_WEBSOCKET__HEARTBEAT_INTERVAL_SECS", "15");

        let config = Config::builder()
            .set_default("environment", "test")
            .unwrap()
            .set_default("server.host", "127.0.0.1")
            .unwrap()
            .set_default("server.port", 8080)
            .unwrap()
            .set_default("websocket.heartbeat_interval_secs", 30)
            .unwrap()
            .set_default("websocket.heartbeat_timeout_secs", 40)
            .unwrap()
            .set_default("websocket.stats_interval_secs", 60)
            .unwrap()
            // Add environment variables last to override defaults
            .add_source(
                Environment::with_prefix("app")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .expect("Failed to build config")
            .try_deserialize::<Settings>()
            .expect("Failed to deserialize settings");

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.websocket.heartbeat_interval_secs, 15);
        assert_eq!(config.websocket.heartbeat_timeout_secs, 40);

        cleanup_env();
    }

    #[test]
    fn test_invalid_port() {
        cleanup_env();

        env::set_var("APP_SERVER__PORT", "invalid");

        let result = Config::builder()
            .set_default("environment", "test")
            .unwrap()
            .set_default("server.host", "127.0.0.1")
            .unwrap()
            .set_default("server.port", 8080)
            .unwrap()
            .set_default("websocket.heartbeat_interval_secs", 30)
            .unwrap()
            .set_default("websocket.heartbeat_timeout_secs", 40)
            .unwrap()
            .set_default("websocket.stats_interval_secs", 60)
            .unwrap()
            .add_source(
                Environment::with_prefix("app")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|config| config.try_deserialize::<Settings>());

        assert!(result.is_err(), "Expected error for invalid port");

        cleanup_env();
    }
}

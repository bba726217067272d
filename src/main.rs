use std::time::Duration;

use collab_gateway::{AppState, Settings};
use dotenv::dotenv;
use tokio::net::TcpListener;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> collab_gateway::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();

    // Load configuration
    let config = Settings::new()?;
    info!("Configuration loaded successfully");

    let state = AppState::new(config);

    // Periodic diagnostics for the admin endpoints' benefit
    let stats_registry = state.registry();
    let stats_interval = Duration::from_secs(state.config.websocket.stats_interval_secs);
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(stats_interval).await;
            let connections = stats_registry.connection_count().await;
            let rooms = stats_registry.room_count().await;
            info!(connections, rooms, "Gateway stats");
        }
    });

    let listener = TcpListener::bind(format!(
        "{}:{}",
        state.config.server.host, state.config.server.port
    ))
    .await?;

    info!(
        "Gateway ready to accept connections at ws://{}:{}/ws",
        state.config.server.host, state.config.server.port
    );

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        let server = state.server.clone();
                        tokio::spawn(async move {
                            server.handle_connection(stream, addr).await;
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received, closing connections");
                state.shutdown().await;
                break;
            }
        }
    }

    Ok(())
}

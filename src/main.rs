//! Typeduel Game Server
//!
//! Binary entrypoint: wires the built-in word source and the logging
//! match recorder into the WebSocket server and runs it until shutdown.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use typeduel::game::words::FallbackWordSource;
use typeduel::network::server::{GameServer, ServerConfig};
use typeduel::recorder::LogRecorder;
use typeduel::VERSION;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging; RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = ServerConfig::default();
    if let Ok(addr) = std::env::var("BIND_ADDR") {
        config.bind_addr = addr.parse().context("invalid BIND_ADDR")?;
    }
    if let Ok(topic) = std::env::var("DEFAULT_TOPIC") {
        config.default_topic = topic;
    }

    info!("Typeduel Server v{}", VERSION);

    let server = GameServer::new(config, Arc::new(FallbackWordSource), Arc::new(LogRecorder));
    server.run().await.context("server exited with error")?;

    Ok(())
}

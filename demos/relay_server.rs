//! Standalone relay server.
//!
//! Binds the relay on localhost and prints the WebSocket URL for each
//! peer role, then runs until Ctrl-C.
//!
//! Usage:
//!   cargo run --example relay_server
//!   cargo run --example relay_server -- 9230
//!   RUST_LOG=cdp_relay=debug cargo run --example relay_server

// ============================================================================
// Imports
// ============================================================================

use cdp_relay::RelayServer;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Constants
// ============================================================================

const DEFAULT_PORT: u16 = 9230;

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let port = std::env::args()
        .nth(1)
        .map(|arg| arg.parse())
        .transpose()?
        .unwrap_or(DEFAULT_PORT);

    let server = RelayServer::with_port(port).await?;

    println!("=== CDP Relay ===");
    println!("consumer endpoint:  {}", server.consumer_url());
    println!("extension endpoint: {}", server.extension_url());
    println!("Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    server.shutdown();

    Ok(())
}

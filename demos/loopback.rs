//! In-process loopback round trip.
//!
//! Starts the relay, connects a fake extension and a consumer over real
//! loopback sockets, then walks through the interesting paths:
//!
//! - `Browser.getVersion` (intercepted, answered locally)
//! - `Target.setAutoAttach` (attach handshake + synthetic event)
//! - `Page.navigate` (plain forwarding with correlation)
//! - a `forwardCDPEvent` passthrough
//!
//! Usage:
//!   cargo run --example loopback

// ============================================================================
// Imports
// ============================================================================

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing_subscriber::EnvFilter;

use cdp_relay::RelayServer;

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let server = RelayServer::new().await?;
    println!("=== Loopback Demo ===");
    println!("relay at {}\n", server.local_addr());

    // ========================================================================
    // Fake extension
    // ========================================================================

    let (extension, _) = connect_async(server.extension_url()).await?;
    let (mut ext_write, mut ext_read) = extension.split();

    let extension_task = tokio::spawn(async move {
        while let Some(Ok(message)) = ext_read.next().await {
            let Message::Text(text) = message else { continue };
            let request: Value = serde_json::from_str(&text)?;
            println!("[extension] <- {request}");

            let reply = match request["method"].as_str() {
                Some("attachToTab") => json!({
                    "id": request["id"],
                    "result": {
                        "sessionId": "DEMO1",
                        "targetInfo": { "targetId": "T1", "type": "page", "url": "about:blank" }
                    }
                }),
                _ => json!({ "id": request["id"], "result": {} }),
            };
            ext_write.send(Message::Text(reply.to_string().into())).await?;

            // After the attach, demonstrate an out-of-band event.
            if request["method"] == "attachToTab" {
                let event = json!({
                    "method": "forwardCDPEvent",
                    "params": {
                        "sessionId": "DEMO1",
                        "method": "Page.loadEventFired",
                        "params": { "timestamp": 1.0 }
                    }
                });
                ext_write.send(Message::Text(event.to_string().into())).await?;
            }
        }
        anyhow::Ok(())
    });

    while !server.relay().has_extension() {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    // ========================================================================
    // Consumer walkthrough
    // ========================================================================

    let (consumer, _) = connect_async(server.consumer_url()).await?;
    let (mut con_write, mut con_read) = consumer.split();

    let commands = [
        json!({ "id": 1, "method": "Browser.getVersion" }),
        json!({ "id": 2, "method": "Target.setAutoAttach", "params": { "autoAttach": true } }),
        json!({ "id": 3, "sessionId": "DEMO1", "method": "Page.navigate", "params": { "url": "https://example.com" } }),
    ];

    for command in &commands {
        println!("[consumer]  -> {command}");
        con_write.send(Message::Text(command.to_string().into())).await?;
    }

    // getVersion response + attach event + attach ack + navigate response
    // + the forwarded Page.loadEventFired = five messages.
    let mut received = 0;
    while received < 5 {
        let Some(Ok(message)) = con_read.next().await else { break };
        let Message::Text(text) = message else { continue };
        let value: Value = serde_json::from_str(&text)?;
        println!("[consumer]  <- {value}");
        received += 1;
    }

    server.shutdown();
    extension_task.abort();
    println!("\ndone");

    Ok(())
}

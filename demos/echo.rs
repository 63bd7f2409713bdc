//! Echo demo over the in-memory transport.
//!
//! Starts a server with an echo handler and a ticker channel, connects a
//! client, and exercises the three traffic patterns: a synchronous call, a
//! fire-and-forget send, and a channel broadcast.
//!
//! Run with:
//!
//! ```text
//! RUST_LOG=debug cargo run --example echo
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use duplex_rpc::{
    // ---
    create_memory_client_transport,
    create_memory_server_transport,
    Result,
    RpcClient,
    RpcConfig,
    RpcServer,
    Transmittable,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EchoRequest {
    text: String,
}

impl Transmittable for EchoRequest {
    const KIND: &'static str = "echo-request";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EchoResponse {
    text: String,
}

impl Transmittable for EchoResponse {
    const KIND: &'static str = "echo-response";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Tick {
    sequence: u32,
}

impl Transmittable for Tick {
    const KIND: &'static str = "tick";
}

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let server = RpcServer::new(create_memory_server_transport());
    server.register_sync_handler(|req: EchoRequest| async move {
        Ok(EchoResponse { text: req.text })
    });
    server.register_async_handler(|req: EchoRequest| async move {
        println!("server received async: {}", req.text);
        Ok(())
    });
    server.start("127.0.0.1", 6789).await?;

    let client = RpcClient::new(create_memory_client_transport(), RpcConfig::default());
    client.start("127.0.0.1", 6789, Duration::from_secs(1)).await?;

    // Synchronous call
    let response: EchoResponse = client
        .call_sync(&EchoRequest {
            text: "hello".into(),
        })
        .await?;
    println!("echo returned: {}", response.text);

    // Fire-and-forget
    client
        .send_async(&EchoRequest {
            text: "goodbye".into(),
        })
        .await?;

    // Channel broadcast
    client.subscribe("ticker").await?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let delivered = server.broadcast_to_channel(&Tick { sequence: 1 }, "ticker");
    delivered.outcome().await?;

    if let Some(message) = client.await_message(Duration::from_secs(1)).await {
        let tick: Tick = message.decode()?;
        println!("tick {} received on [ticker]", tick.sequence);
    }

    client.stop().await;
    server.stop().await;
    Ok(())
}

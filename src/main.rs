//! Chat Gateway - Entry Point
//!
//! Starts the WebSocket and health listeners and the gateway, accepting
//! connections until Ctrl-C, then shuts every room and session down before
//! exiting.

use std::env;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chat_gateway::{handle_connection, Config, Gateway, MemoryMessageStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=chat_gateway=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("chat_gateway=info")),
        )
        .init();

    let mut config = Config::from_env()?;

    // Bind address from command line overrides the environment
    if let Some(addr) = env::args().nth(1) {
        config.bind_addr = addr;
    }

    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("Chat Gateway listening on {}", config.bind_addr);
    let health_listener = TcpListener::bind(&config.health_addr).await?;

    let store = Arc::new(MemoryMessageStore::with_capacity(config.store_capacity));
    let gateway = Gateway::new(config, store.clone());
    gateway.serve_health(health_listener);
    info!("Gateway {} started", gateway.node_id());

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    // Connection accept loop
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    info!("New connection from {}", addr);
                    let gateway = gateway.clone();

                    // Spawn handler task for each connection
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, gateway).await {
                            error!("Connection handler error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            },
            _ = &mut shutdown => {
                info!("Interrupt received");
                break;
            }
        }
    }

    gateway.shutdown().await;

    // Collaborators are released only after every session has stopped
    store.close();
    info!("Cleanup finished");

    Ok(())
}

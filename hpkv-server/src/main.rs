use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hpkv_server::{serve, MemoryStore, ServerConfig};

const DEFAULT_ADDR: &str = "127.0.0.1:8089";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Usage: hpkv_server [addr] [api_key]
    let mut args = std::env::args().skip(1);
    let addr = args.next().unwrap_or_else(|| DEFAULT_ADDR.to_string());
    let config = ServerConfig {
        api_key: args.next(),
    };

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(
        %addr,
        auth = config.api_key.is_some(),
        "hpkv development server listening on ws://{addr}/ws"
    );

    serve(listener, Arc::new(MemoryStore::new()), config).await?;
    Ok(())
}

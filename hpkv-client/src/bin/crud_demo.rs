//! # CRUD Walkthrough
//!
//! Purpose: Exercise every verb against a live endpoint configured through
//! `HPKV_BASE_URL` / `HPKV_API_KEY` (a `.env` file works too).
//!
//! Run against the development server:
//!
//! ```text
//! cargo run -p hpkv-server -- 127.0.0.1:8089 dev-key &
//! HPKV_BASE_URL=http://127.0.0.1:8089 HPKV_API_KEY=dev-key cargo run -p hpkv-client --bin crud_demo
//! ```

use anyhow::{bail, Context};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hpkv_client::{ClientError, KVClient, UpdateMode, Value};

const KEY: &str = "user:1";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let client = KVClient::from_env().context("loading client configuration")?;
    client.connect().await.context("connecting")?;

    let user = json!({"name": "John Doe", "email": "john@example.com", "age": 30});
    if !client.insert(KEY, Value::json(&user)?).await? {
        bail!("insert of {KEY} was not acknowledged");
    }
    info!(key = KEY, "created");

    let stored = client.get(KEY).await?;
    info!(key = KEY, value = ?stored, "read back");

    let replaced = json!({"name": "John Doe", "email": "john@example.com", "age": 31});
    let ok = client.update(KEY, Value::json(&replaced)?, UpdateMode::Replace).await?;
    info!(key = KEY, ok, "full replace");

    let ok = client
        .update(KEY, Value::json(&json!({"city": "Lisbon"}))?, UpdateMode::Merge)
        .await?;
    info!(key = KEY, ok, "partial merge");

    let stored = client.get(KEY).await?;
    info!(key = KEY, value = ?stored, "read after updates");

    let ok = client.delete(KEY).await?;
    info!(key = KEY, ok, "deleted");

    match client.get(KEY).await {
        Err(ClientError::Remote(message)) => info!(key = KEY, %message, "record is gone"),
        Ok(value) => bail!("{KEY} still readable after delete: {value:?}"),
        Err(err) => return Err(err.into()),
    }

    client.disconnect().await?;
    Ok(())
}

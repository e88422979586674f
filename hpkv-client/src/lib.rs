//! # HPKV Async Client
//!
//! Purpose: Issue many concurrent key-value operations over one persistent
//! WebSocket connection and route every response back to the call that sent
//! the request, whatever order the responses arrive in.
//!
//! ## Design Principles
//! 1. **Multiplexing**: One connection, many in-flight requests, correlated by
//!    per-connection message ids.
//! 2. **Single Reader**: Exactly one receiver loop reads the transport.
//! 3. **Nobody Waits Forever on a Dead Connection**: Disconnects and transport
//!    failures fail every pending request.
//! 4. **Explicit Values**: Callers choose `Value::Raw` or `Value::Encoded`;
//!    nothing is inferred from runtime types.
//!
//! ## Usage
//!
//! ```no_run
//! use hpkv_client::{ClientConfig, KVClient, UpdateMode, Value};
//!
//! # async fn demo() -> Result<(), hpkv_client::ClientError> {
//! let client = KVClient::new(ClientConfig::new("https://api.example.com", "api-key"));
//! client.insert("user:1", Value::json(&serde_json::json!({"age": 30}))?).await?;
//! client.update("user:1", Value::raw(r#"{"age":31}"#), UpdateMode::Merge).await?;
//! let user = client.get("user:1").await?;
//! client.disconnect().await?;
//! # let _ = user;
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod connection;
mod correlator;
mod receiver;
mod transport;

pub use client::{ClientError, ClientResult, KVClient};
pub use config::{
    ClientConfig, TlsVerification, ENV_API_KEY, ENV_BASE_URL, ENV_CONNECT_TIMEOUT_MS,
    ENV_INSECURE_TLS, ENV_REQUEST_TIMEOUT_MS,
};
pub use connection::{Connection, ConnectionState};
pub use hpkv_common::{Decoded, ProtocolError, UpdateMode, Value};

//! # Async Client API
//!
//! Purpose: Expose get/insert/update/delete as single awaitable calls that
//! share one persistent connection.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `KVClient` hides correlation, framing and connection
//!    lifecycle behind four verbs.
//! 2. **Lazy Connect**: The first verb dials; later verbs reuse the session.
//! 3. **No Hidden Retries**: A failed request is reported once and never resent.
//! 4. **Confirmed Results**: A verb returns either a confirmed value/flag or an
//!    explicit error, never a value detached from its response.

use std::time::Duration;

use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, warn};

use hpkv_common::{decode_value, Decoded, ProtocolError, Request, ResponseFrame, UpdateMode, Value};

use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionState};

/// Result type for the async client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the async client.
///
/// `Clone` so a single transport failure can be handed to every pending
/// request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// Handshake, credential or transport failure while connecting or sending.
    #[error("connection error: {0}")]
    Connection(String),
    /// The connection closed before a response arrived.
    #[error("connection closed")]
    ConnectionClosed,
    /// A frame could not be built or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// The store reported a failure for this request.
    #[error("remote error: {0}")]
    Remote(String),
    /// No response arrived within the configured request timeout.
    #[error("request {id} timed out after {after:?}")]
    Timeout { id: u64, after: Duration },
    /// Configuration is missing or invalid.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Async client over one multiplexed connection.
///
/// Cloning is cheap; clones share the same connection and may issue requests
/// concurrently.
#[derive(Clone)]
pub struct KVClient {
    connection: Connection,
}

impl KVClient {
    /// Creates a client. No connection is opened until the first request or an
    /// explicit `connect()`.
    pub fn new(config: ClientConfig) -> Self {
        KVClient {
            connection: Connection::new(config),
        }
    }

    /// Creates a client from `HPKV_*` environment variables.
    pub fn from_env() -> ClientResult<Self> {
        ClientConfig::from_env().map(Self::new)
    }

    /// Opens the connection now instead of on first use.
    pub async fn connect(&self) -> ClientResult<()> {
        self.connection.connect().await
    }

    /// Closes the connection, failing every pending request with
    /// `ClientError::ConnectionClosed`.
    pub async fn disconnect(&self) -> ClientResult<()> {
        self.connection.disconnect().await
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Number of requests still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.connection.pending_requests()
    }

    /// Underlying connection handle.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Fetches a value by key.
    ///
    /// The stored text is parsed as JSON when possible and returned as text
    /// otherwise. Returns `Ok(None)` when the server confirms the request but
    /// sends no value.
    pub async fn get(&self, key: &str) -> ClientResult<Option<Decoded>> {
        Ok(self.get_raw(key).await?.map(decode_value))
    }

    /// Fetches a value by key exactly as stored, without any parsing.
    pub async fn get_raw(&self, key: &str) -> ClientResult<Option<String>> {
        let response = self.round_trip(Request::get(key)?).await?;
        Ok(response.value)
    }

    /// Stores a value, replacing any previous one.
    pub async fn insert(&self, key: &str, value: impl Into<Value>) -> ClientResult<bool> {
        let response = self.round_trip(Request::insert(key, &value.into())?).await?;
        Ok(response.is_success())
    }

    /// Updates a value. `UpdateMode::Merge` asks the store to merge fields into
    /// the existing value; `UpdateMode::Replace` overwrites it.
    pub async fn update(
        &self,
        key: &str,
        value: impl Into<Value>,
        mode: UpdateMode,
    ) -> ClientResult<bool> {
        let response = self
            .round_trip(Request::update(key, &value.into(), mode)?)
            .await?;
        Ok(response.is_success())
    }

    /// Deletes a key.
    pub async fn delete(&self, key: &str) -> ClientResult<bool> {
        let response = self.round_trip(Request::delete(key)?).await?;
        Ok(response.is_success())
    }

    async fn round_trip(&self, request: Request) -> ClientResult<ResponseFrame> {
        let waiter = self.connection.submit(&request).await?;
        let id = waiter.id();

        let result = match self.connection.config().request_timeout {
            Some(after) => match timeout(after, waiter.wait()).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(id, key = request.key(), ?after, "request timed out");
                    Err(ClientError::Timeout { id, after })
                }
            },
            None => waiter.wait().await,
        };

        if let Err(err) = &result {
            debug!(id, op = ?request.op(), key = request.key(), error = %err, "request failed");
        }
        result
    }
}

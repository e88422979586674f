//! # WebSocket Server
//!
//! Accept persistent connections, decode request frames, and answer each one
//! from the in-memory store with a response carrying the same `messageId`.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::Error as WsError;
use tracing::{debug, info, warn};

use hpkv_common::{decode_request, encode_response, OpCode, RequestFrame, ResponseFrame};

use crate::store::{MemoryStore, StoreError};

/// Runtime options for the server.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// When set, clients must present this value as the `apiKey` query parameter.
    pub api_key: Option<String>,
}

/// Accepts connections until the listener fails.
pub async fn serve(
    listener: TcpListener,
    store: Arc<MemoryStore>,
    config: ServerConfig,
) -> std::io::Result<()> {
    let config = Arc::new(config);
    loop {
        let (stream, peer) = listener.accept().await?;
        let store = Arc::clone(&store);
        let config = Arc::clone(&config);
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, store, &config).await {
                warn!(%peer, error = %err, "connection ended with error");
            }
        });
    }
}

/// Handles a single client connection from handshake to close.
pub async fn handle_connection(
    stream: TcpStream,
    store: Arc<MemoryStore>,
    config: &ServerConfig,
) -> Result<(), WsError> {
    let expected = config.api_key.as_deref();
    let mut ws = accept_hdr_async(stream, |request: &Request, response: Response| {
        match expected {
            Some(key) if !api_key_matches(request, key) => Err(unauthorized()),
            _ => Ok(response),
        }
    })
    .await?;
    info!("client connected");

    while let Some(message) = ws.next().await {
        let payload = match message? {
            Message::Text(text) => text.into_bytes(),
            Message::Binary(data) => data,
            Message::Close(_) => break,
            _ => continue,
        };

        let request = match decode_request(&payload) {
            Ok(request) => request,
            Err(err) => {
                warn!(error = %err, "skipping undecodable request frame");
                continue;
            }
        };

        let response = dispatch(&store, request);
        match encode_response(&response) {
            Ok(text) => ws.send(Message::Text(text)).await?,
            Err(err) => warn!(error = %err, "failed to encode response"),
        }
    }

    info!("client disconnected");
    Ok(())
}

/// Applies one request to the store and builds its response.
pub fn dispatch(store: &MemoryStore, request: RequestFrame) -> ResponseFrame {
    let id = request.message_id;
    debug!(id, op = ?request.op, key = %request.key, "dispatch");

    match request.op {
        OpCode::Get => match store.get(&request.key) {
            Ok(value) => ResponseFrame::with_value(id, value),
            Err(err) => ResponseFrame::error(id, err.to_string()),
        },
        OpCode::Insert => acknowledge(
            id,
            request
                .value
                .ok_or(StoreError::MissingValue)
                .map(|value| store.insert(&request.key, value)),
        ),
        OpCode::Update => acknowledge(
            id,
            request
                .value
                .ok_or(StoreError::MissingValue)
                .and_then(|patch| store.merge(&request.key, &patch)),
        ),
        OpCode::Delete => acknowledge(id, store.delete(&request.key)),
    }
}

fn acknowledge(id: u64, outcome: Result<(), StoreError>) -> ResponseFrame {
    match outcome {
        Ok(()) => ResponseFrame::ok(id),
        Err(err) => ResponseFrame::error(id, err.to_string()),
    }
}

fn api_key_matches(request: &Request, expected: &str) -> bool {
    let query = request.uri().query().unwrap_or_default();
    url::form_urlencoded::parse(query.as_bytes())
        .any(|(name, value)| name == "apiKey" && value == expected)
}

fn unauthorized() -> ErrorResponse {
    let mut response = ErrorResponse::new(Some("invalid api key".to_string()));
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    response
}

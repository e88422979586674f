//! # Protocol Errors
//!
//! Failures raised while building or decoding wire frames. These never carry
//! connection state; the client decides whether a bad frame is fatal.

use thiserror::Error;

/// Result type for codec operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors produced by the wire codec.
///
/// Messages are stored as text so the error stays `Clone` and can be handed to
/// several waiters at once.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Frame was not valid JSON or did not match the expected shape.
    #[error("malformed frame: {0}")]
    Malformed(String),
    /// Operation code outside 1..=4.
    #[error("unknown op code {0}")]
    UnknownOpCode(u8),
    /// Keys must contain at least one byte.
    #[error("key must not be empty")]
    EmptyKey,
    /// A structured value could not be serialized to JSON text.
    #[error("value encoding failed: {0}")]
    Encode(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::Malformed(err.to_string())
    }
}

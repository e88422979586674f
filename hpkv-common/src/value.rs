//! # Tagged Values
//!
//! The protocol stores opaque text. Callers say up front whether that text is a
//! plain string (`Value::Raw`) or JSON produced from a structured value
//! (`Value::Encoded`); nothing is inferred from runtime types.
//!
//! On read the tag is gone, so `decode_value` tries a JSON parse first and
//! falls back to the raw text. A plain string that happens to be valid JSON
//! (for example `"42"`) therefore decodes as `Structured`; use the raw text
//! accessor on the client when the exact bytes matter.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ProtocolError, ProtocolResult};

/// Value supplied by the caller for insert/update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Sent verbatim.
    Raw(String),
    /// JSON text produced from a structured value.
    Encoded(String),
}

impl Value {
    /// Wraps a plain string without touching it.
    pub fn raw(text: impl Into<String>) -> Self {
        Value::Raw(text.into())
    }

    /// Serializes `value` to JSON text.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` when `value` cannot be represented as JSON
    /// (for example a map with non-string keys).
    pub fn json<T: Serialize + ?Sized>(value: &T) -> ProtocolResult<Self> {
        serde_json::to_string(value)
            .map(Value::Encoded)
            .map_err(|err| ProtocolError::Encode(err.to_string()))
    }

    /// Text placed in the `value` field of the request frame.
    #[inline]
    pub fn as_wire(&self) -> &str {
        match self {
            Value::Raw(text) | Value::Encoded(text) => text,
        }
    }

    #[inline]
    pub fn is_encoded(&self) -> bool {
        matches!(self, Value::Encoded(_))
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::Raw(text.to_owned())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::Raw(text)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Value::Encoded(value.to_string())
    }
}

/// Value read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// Stored text parsed as JSON.
    Structured(serde_json::Value),
    /// Stored text that is not JSON, returned unchanged.
    Text(String),
}

impl Decoded {
    /// Returns the text when the stored value was not JSON.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Decoded::Text(text) => Some(text),
            Decoded::Structured(_) => None,
        }
    }

    /// Returns the parsed JSON when the stored value was JSON.
    pub fn as_structured(&self) -> Option<&serde_json::Value> {
        match self {
            Decoded::Structured(value) => Some(value),
            Decoded::Text(_) => None,
        }
    }

    /// Converts into a JSON value; plain text becomes a JSON string.
    pub fn into_json(self) -> serde_json::Value {
        match self {
            Decoded::Structured(value) => value,
            Decoded::Text(text) => serde_json::Value::String(text),
        }
    }

    /// Deserializes a structured value into `T`.
    ///
    /// # Errors
    /// Returns `ProtocolError::Malformed` when the value is plain text or does
    /// not match the shape of `T`.
    pub fn deserialize<T: DeserializeOwned>(self) -> ProtocolResult<T> {
        match self {
            Decoded::Structured(value) => Ok(serde_json::from_value(value)?),
            Decoded::Text(_) => Err(ProtocolError::Malformed(
                "stored value is plain text, not JSON".to_string(),
            )),
        }
    }
}

/// Structured parse first, raw text fallback.
pub fn decode_value(text: String) -> Decoded {
    match serde_json::from_str(&text) {
        Ok(value) => Decoded::Structured(value),
        Err(_) => Decoded::Text(text),
    }
}

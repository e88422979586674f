//! # Wire Protocol
//!
//! Purpose: Define the JSON frames exchanged over the persistent connection and
//! the encode/decode helpers used by both the client and the development server.
//!
//! ## Design Principles
//!
//! 1. **Id Stamping at Send Time**: A `Request` carries only what the caller
//!    asked for; the message id is stamped when the frame is encoded, after the
//!    correlator has allocated it.
//! 2. **Lenient Responses**: Unknown response fields are ignored so servers can
//!    extend the frame without breaking older clients.
//! 3. **Strict Requests**: Op codes outside 1..=4 and empty keys are rejected
//!    before anything reaches the wire.
//!
//! ## Frame Examples
//!
//! ```text
//! request:  {"op":2,"key":"user:1","value":"{\"age\":31}","messageId":7}
//! response: {"messageId":7,"success":true}
//! response: {"messageId":8,"value":"{\"age\":31}"}
//! response: {"messageId":9,"error":"Record not found"}
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, ProtocolResult};
use crate::value::Value;

/// Operation selector understood by the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum OpCode {
    Get = 1,
    Insert = 2,
    Update = 3,
    Delete = 4,
}

impl OpCode {
    /// Returns the op code that implements `mode` on the remote side.
    ///
    /// A full replace is an upsert; only a partial merge uses `Update`.
    #[inline]
    pub const fn for_update(mode: UpdateMode) -> Self {
        match mode {
            UpdateMode::Replace => OpCode::Insert,
            UpdateMode::Merge => OpCode::Update,
        }
    }

    /// Returns the numeric wire code.
    #[inline]
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl From<OpCode> for u8 {
    fn from(op: OpCode) -> Self {
        op.code()
    }
}

impl TryFrom<u8> for OpCode {
    type Error = ProtocolError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(OpCode::Get),
            2 => Ok(OpCode::Insert),
            3 => Ok(OpCode::Update),
            4 => Ok(OpCode::Delete),
            other => Err(ProtocolError::UnknownOpCode(other)),
        }
    }
}

/// How `update` should apply a value to an existing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateMode {
    /// Overwrite the stored value wholesale.
    #[default]
    Replace,
    /// Merge fields into the stored value.
    Merge,
}

impl UpdateMode {
    /// Maps the boolean "partial update" flag used by other HPKV clients.
    pub const fn from_partial(partial: bool) -> Self {
        if partial {
            UpdateMode::Merge
        } else {
            UpdateMode::Replace
        }
    }
}

/// A validated operation waiting for a message id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    op: OpCode,
    key: String,
    value: Option<String>,
}

impl Request {
    /// Builds a read request.
    pub fn get(key: impl Into<String>) -> ProtocolResult<Self> {
        Self::new(OpCode::Get, key.into(), None)
    }

    /// Builds an upsert request.
    pub fn insert(key: impl Into<String>, value: &Value) -> ProtocolResult<Self> {
        Self::new(OpCode::Insert, key.into(), Some(value.as_wire().to_owned()))
    }

    /// Builds an update request; `mode` picks the op code.
    pub fn update(key: impl Into<String>, value: &Value, mode: UpdateMode) -> ProtocolResult<Self> {
        Self::new(
            OpCode::for_update(mode),
            key.into(),
            Some(value.as_wire().to_owned()),
        )
    }

    /// Builds a delete request.
    pub fn delete(key: impl Into<String>) -> ProtocolResult<Self> {
        Self::new(OpCode::Delete, key.into(), None)
    }

    fn new(op: OpCode, key: String, value: Option<String>) -> ProtocolResult<Self> {
        if key.is_empty() {
            return Err(ProtocolError::EmptyKey);
        }
        Ok(Request { op, key, value })
    }

    #[inline]
    pub fn op(&self) -> OpCode {
        self.op
    }

    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[inline]
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }
}

/// Borrowed view used for encoding so the request is not cloned per send.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestFrameRef<'a> {
    op: OpCode,
    key: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<&'a str>,
    message_id: u64,
}

/// Request frame as seen by a server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestFrame {
    pub op: OpCode,
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
    pub message_id: u64,
}

/// Response frame. Only `messageId` is mandatory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseFrame {
    pub message_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
}

impl ResponseFrame {
    /// Successful acknowledgement without a payload.
    pub fn ok(message_id: u64) -> Self {
        ResponseFrame {
            message_id,
            success: Some(true),
            ..Default::default()
        }
    }

    /// Successful read carrying the stored text.
    pub fn with_value(message_id: u64, value: impl Into<String>) -> Self {
        ResponseFrame {
            message_id,
            value: Some(value.into()),
            ..Default::default()
        }
    }

    /// Failure addressed to a single request.
    pub fn error(message_id: u64, message: impl Into<String>) -> Self {
        ResponseFrame {
            message_id,
            error: Some(message.into()),
            ..Default::default()
        }
    }

    /// Returns true unless the server explicitly reported `success: false`.
    #[inline]
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.success.unwrap_or(true)
    }
}

/// Encodes `request` as JSON text stamped with `message_id`.
pub fn encode_request(request: &Request, message_id: u64) -> ProtocolResult<String> {
    let frame = RequestFrameRef {
        op: request.op,
        key: &request.key,
        value: request.value.as_deref(),
        message_id,
    };
    serde_json::to_string(&frame).map_err(|err| ProtocolError::Encode(err.to_string()))
}

/// Decodes a request frame (server side).
pub fn decode_request(payload: &[u8]) -> ProtocolResult<RequestFrame> {
    let frame: RequestFrame = serde_json::from_slice(payload)?;
    if frame.key.is_empty() {
        return Err(ProtocolError::EmptyKey);
    }
    Ok(frame)
}

/// Encodes a response frame (server side).
pub fn encode_response(response: &ResponseFrame) -> ProtocolResult<String> {
    serde_json::to_string(response).map_err(|err| ProtocolError::Encode(err.to_string()))
}

/// Decodes a response frame received from the server.
pub fn decode_response(payload: &[u8]) -> ProtocolResult<ResponseFrame> {
    Ok(serde_json::from_slice(payload)?)
}

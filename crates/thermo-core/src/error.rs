//! Error types for the thermostat protocol core

use thiserror::Error;

/// Result type alias for protocol core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Protocol core error types
#[derive(Error, Debug)]
pub enum Error {
    /// The reassembly buffer grew past its limit without producing a message
    #[error("frame too large: {size} bytes buffered without a complete message (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// JSON encoding error
    #[error("encode error: {0}")]
    EncodeError(String),

    /// JSON decoding error
    #[error("decode error: {0}")]
    DecodeError(String),

    /// Well-formed JSON that is not a protocol message
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Property name not present in the schema
    #[error("unknown property: {0}")]
    UnknownProperty(String),

    /// Value rejected by a property's type or range
    #[error("invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}

impl Error {
    pub fn invalid_value(name: &str, reason: impl Into<String>) -> Self {
        Error::InvalidValue {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// JSON-RPC error codes emitted by the device firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    ParseError = -32700,
    InvalidRequest = -32600,
    MethodNotFound = -32601,
    InvalidParams = -32602,
    InternalError = -32603,
}

impl ErrorCode {
    pub fn from_i64(code: i64) -> Option<Self> {
        match code {
            -32700 => Some(ErrorCode::ParseError),
            -32600 => Some(ErrorCode::InvalidRequest),
            -32601 => Some(ErrorCode::MethodNotFound),
            -32602 => Some(ErrorCode::InvalidParams),
            -32603 => Some(ErrorCode::InternalError),
            _ => None,
        }
    }

    /// Extract a known code from a remote `error` payload, if it carries one
    pub fn from_payload(payload: &serde_json::Value) -> Option<Self> {
        payload
            .get("code")
            .and_then(serde_json::Value::as_i64)
            .and_then(Self::from_i64)
    }
}

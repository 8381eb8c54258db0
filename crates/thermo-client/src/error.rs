//! Client error types

use serde_json::Value;
use thermo_core::RequestId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("not connected")]
    NotConnected,

    #[error("timeout")]
    Timeout,

    /// The call was dropped before a response arrived (connection closed or
    /// entry evicted)
    #[error("call cancelled")]
    Cancelled,

    /// The device answered with an `error` payload
    #[error("remote error: {0}")]
    Remote(Value),

    #[error("invalid call: {0}")]
    InvalidCall(String),

    #[error("reserved method name: {0}")]
    ReservedName(String),

    #[error("request id {0} is already pending")]
    DuplicateRequestId(RequestId),

    #[error("unknown property: {0}")]
    UnknownProperty(String),

    #[error("invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },

    #[error("protocol error: {0}")]
    Protocol(thermo_core::Error),

    #[error("transport error: {0}")]
    Transport(#[from] thermo_transport::TransportError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<thermo_core::Error> for ClientError {
    fn from(e: thermo_core::Error) -> Self {
        match e {
            thermo_core::Error::UnknownProperty(name) => ClientError::UnknownProperty(name),
            thermo_core::Error::InvalidValue { name, reason } => {
                ClientError::InvalidValue { name, reason }
            }
            other => ClientError::Protocol(other),
        }
    }
}

impl ClientError {
    /// Buffer overflow while reassembling the stream
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            ClientError::Protocol(thermo_core::Error::FrameTooLarge { .. })
        )
    }

    /// The firmware's JSON-RPC code, for remote errors that carry one
    pub fn remote_code(&self) -> Option<thermo_core::ErrorCode> {
        match self {
            ClientError::Remote(payload) => thermo_core::ErrorCode::from_payload(payload),
            _ => None,
        }
    }
}

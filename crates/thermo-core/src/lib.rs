//! Thermo Core
//!
//! Wire types and stream decoding for the thermostat protocol.
//!
//! This crate provides:
//! - Protocol message types ([`Message`], [`Request`], [`Response`], [`Notification`])
//! - JSON encoding/decoding ([`codec`])
//! - Reassembly of the undelimited byte stream ([`FrameReassembler`])
//! - Typed property definitions ([`PropertySpec`], [`PropertyValue`])

pub mod codec;
pub mod error;
pub mod frame;
pub mod state;
pub mod types;

pub use codec::{decode, encode};
pub use error::{Error, ErrorCode, Result};
pub use frame::FrameReassembler;
pub use state::{
    values_match, PropertyKind, PropertySpec, PropertyValue, SyncMode, DEFAULT_FLOAT_PRECISION,
};
pub use types::*;

/// JSON-RPC version tag sent with every request
pub const JSONRPC_VERSION: &str = "2.0";

/// Default TCP port of the thermostat firmware
pub const DEFAULT_PORT: u16 = 8888;

/// Address used when none is configured
pub const DEFAULT_ADDRESS: &str = "192.168.1.101:8888";

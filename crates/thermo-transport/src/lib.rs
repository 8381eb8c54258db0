//! Thermo Transport Layer
//!
//! Byte stream transports for the thermostat client:
//! - TCP (the firmware's native transport)
//! - In-process channel pairs (tests and embedding)

pub mod error;
pub mod memory;
pub mod traits;

#[cfg(feature = "tcp")]
pub mod tcp;

pub use error::{Result, TransportError};
pub use memory::{MemoryConnector, MemoryReceiver, MemorySender};
pub use traits::{
    Connector, Link, TransportEvent, TransportReceiver, TransportSender, TransportServer,
};

#[cfg(feature = "tcp")]
pub use tcp::{TcpConfig, TcpReceiver, TcpSender, TcpServer, TcpTransport};

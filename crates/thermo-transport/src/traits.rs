//! Transport trait definitions

use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;

use crate::error::Result;

/// Events that can occur on a transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Connection closed (clean or error)
    Disconnected { reason: Option<String> },
    /// Raw bytes received. Chunk boundaries carry no meaning.
    Data(Bytes),
    /// Error occurred
    Error(String),
}

/// Trait for sending data
#[async_trait]
pub trait TransportSender: Send + Sync {
    /// Write bytes to the stream
    async fn send(&self, data: Bytes) -> Result<()>;

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Close the connection. The receiver sees `Disconnected` afterwards.
    async fn close(&self) -> Result<()>;
}

/// Trait for receiving data
#[async_trait]
pub trait TransportReceiver: Send {
    /// Receive the next event, `None` once the transport is gone
    async fn recv(&mut self) -> Option<TransportEvent>;
}

/// Both halves of an open transport
pub type Link = (Box<dyn TransportSender>, Box<dyn TransportReceiver>);

/// Opens transports to an address.
///
/// The reconnecting session calls this once per connection attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &str) -> Result<Link>;
}

/// Trait for transport servers (listeners)
#[async_trait]
pub trait TransportServer: Send + Sync {
    /// The sender type for accepted connections
    type Sender: TransportSender;
    /// The receiver type for accepted connections
    type Receiver: TransportReceiver;

    /// Accept a new connection
    async fn accept(&mut self) -> Result<(Self::Sender, Self::Receiver, SocketAddr)>;

    /// Get the local address
    fn local_addr(&self) -> Result<SocketAddr>;
}

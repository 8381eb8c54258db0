//! In-process transport
//!
//! A connected pair of endpoints backed by channels. Used to drive the client
//! against a scripted peer without sockets, which keeps timer-driven tests
//! deterministic under a paused clock.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::{Connector, Link, TransportEvent, TransportReceiver, TransportSender};

/// Sending half of an in-process endpoint
pub struct MemorySender {
    peer: mpsc::UnboundedSender<TransportEvent>,
    local: mpsc::UnboundedSender<TransportEvent>,
    connected: Arc<Mutex<bool>>,
}

/// Receiving half of an in-process endpoint
pub struct MemoryReceiver {
    rx: mpsc::UnboundedReceiver<TransportEvent>,
}

/// One side of a [`pair`]
pub type MemoryEndpoint = (MemorySender, MemoryReceiver);

/// Create two connected endpoints. Bytes sent on one arrive on the other.
pub fn pair() -> (MemoryEndpoint, MemoryEndpoint) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    let connected = Arc::new(Mutex::new(true));

    let a = (
        MemorySender {
            peer: b_tx.clone(),
            local: a_tx.clone(),
            connected: connected.clone(),
        },
        MemoryReceiver { rx: a_rx },
    );
    let b = (
        MemorySender {
            peer: a_tx,
            local: b_tx,
            connected,
        },
        MemoryReceiver { rx: b_rx },
    );
    (a, b)
}

impl MemorySender {
    /// Deliver an event to the peer verbatim, bypassing the connected check
    pub fn inject(&self, event: TransportEvent) {
        let _ = self.peer.send(event);
    }
}

#[async_trait]
impl TransportSender for MemorySender {
    async fn send(&self, data: Bytes) -> Result<()> {
        if !*self.connected.lock() {
            return Err(TransportError::NotConnected);
        }
        self.peer
            .send(TransportEvent::Data(data))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock()
    }

    async fn close(&self) -> Result<()> {
        let was_connected = std::mem::replace(&mut *self.connected.lock(), false);
        if was_connected {
            debug!("Memory transport closed");
            let _ = self.local.send(TransportEvent::Disconnected {
                reason: Some("closed locally".into()),
            });
            let _ = self.peer.send(TransportEvent::Disconnected {
                reason: Some("closed by peer".into()),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl TransportReceiver for MemoryReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}

/// Connector that hands the far end of every connection to the test
pub struct MemoryConnector {
    accepted: mpsc::UnboundedSender<(String, MemoryEndpoint)>,
    refusing: AtomicBool,
    attempts: AtomicUsize,
}

impl MemoryConnector {
    /// Returns the connector and the stream of accepted device-side endpoints
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(String, MemoryEndpoint)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            accepted: tx,
            refusing: AtomicBool::new(false),
            attempts: AtomicUsize::new(0),
        };
        (connector, rx)
    }

    /// Make subsequent attempts fail as if the device were unreachable
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Number of connection attempts so far
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, address: &str) -> Result<Link> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refusing.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed("Connection refused".into()));
        }

        let (client, device) = pair();
        self.accepted
            .send((address.to_string(), device))
            .map_err(|_| TransportError::ConnectionFailed("no peer listening".into()))?;

        let (sender, receiver) = client;
        Ok((Box::new(sender), Box::new(receiver)))
    }
}

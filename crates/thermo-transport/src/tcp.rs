//! TCP transport implementation
//!
//! The thermostat firmware writes JSON objects straight onto the socket with
//! no length prefix or separator, so this transport forwards raw chunks as
//! they arrive. Message boundaries are recovered further up the stack.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info};

use crate::error::{Result, TransportError};
use crate::traits::{
    Connector, Link, TransportEvent, TransportReceiver, TransportSender, TransportServer,
};

/// Default channel buffer size for TCP connections
const DEFAULT_CHANNEL_BUFFER_SIZE: usize = 1000;

/// TCP configuration
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Read buffer size
    pub read_buffer_size: usize,
    /// Keep-alive interval in seconds (0 = disabled)
    pub keepalive_secs: u64,
    /// Give up on a connection attempt after this long
    pub connect_timeout: Duration,
    /// Port used when the address does not name one
    pub default_port: u16,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 8192,
            keepalive_secs: 30,
            connect_timeout: Duration::from_secs(10),
            default_port: 8888,
        }
    }
}

/// TCP transport
pub struct TcpTransport {
    config: TcpConfig,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self {
            config: TcpConfig::default(),
        }
    }

    pub fn with_config(config: TcpConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TcpConfig {
        &self.config
    }

    /// Connect to a TCP server
    pub async fn connect(&self, addr: &str) -> Result<(TcpSender, TcpReceiver)> {
        let addr = with_default_port(addr, self.config.default_port)?;
        info!("Connecting to TCP: {}", addr);

        let stream = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        // Enable TCP keepalive if configured
        if self.config.keepalive_secs > 0 {
            let socket = socket2::SockRef::from(&stream);
            let keepalive = socket2::TcpKeepalive::new()
                .with_time(Duration::from_secs(self.config.keepalive_secs));
            let _ = socket.set_tcp_keepalive(&keepalive);
        }
        let _ = stream.set_nodelay(true);

        info!("TCP connected to {}", addr);
        Ok(spawn_io(stream, self.config.read_buffer_size))
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for TcpTransport {
    async fn connect(&self, address: &str) -> Result<Link> {
        let (sender, receiver) = TcpTransport::connect(self, address).await?;
        Ok((Box::new(sender), Box::new(receiver)))
    }
}

/// Append `default_port` to a bare host
pub fn with_default_port(addr: &str, default_port: u16) -> Result<String> {
    let addr = addr.trim();
    if addr.is_empty() {
        return Err(TransportError::InvalidAddress("empty address".into()));
    }
    if addr.parse::<SocketAddr>().is_ok() {
        return Ok(addr.to_string());
    }
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && !host.contains(':') => {
            port.parse::<u16>()
                .map_err(|_| TransportError::InvalidAddress(addr.to_string()))?;
            Ok(addr.to_string())
        }
        Some(_) => Ok(format!("[{}]:{}", addr.trim_matches(|c| c == '[' || c == ']'), default_port)),
        None => Ok(format!("{}:{}", addr, default_port)),
    }
}

fn spawn_io(stream: TcpStream, read_buffer_size: usize) -> (TcpSender, TcpReceiver) {
    let connected = Arc::new(Mutex::new(true));
    let shutdown = Arc::new(Notify::new());
    let (outgoing_tx, outgoing_rx) = mpsc::channel::<Bytes>(DEFAULT_CHANNEL_BUFFER_SIZE);
    let (incoming_tx, incoming_rx) = mpsc::channel::<TransportEvent>(DEFAULT_CHANNEL_BUFFER_SIZE);

    let sender = TcpSender {
        tx: outgoing_tx,
        connected: connected.clone(),
        shutdown: shutdown.clone(),
    };
    let receiver = TcpReceiver { rx: incoming_rx };

    tokio::spawn(async move {
        let (reader, writer) = stream.into_split();
        run_tcp_io_loop(
            reader,
            writer,
            outgoing_rx,
            incoming_tx,
            read_buffer_size,
            connected,
            shutdown,
        )
        .await;
    });

    (sender, receiver)
}

/// Shared IO loop for TCP connections
async fn run_tcp_io_loop(
    mut reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    mut outgoing_rx: mpsc::Receiver<Bytes>,
    incoming_tx: mpsc::Sender<TransportEvent>,
    read_buffer_size: usize,
    connected: Arc<Mutex<bool>>,
    shutdown: Arc<Notify>,
) {
    let mut read_buf = BytesMut::with_capacity(read_buffer_size);

    let reason = loop {
        tokio::select! {
            _ = shutdown.notified() => {
                debug!("TCP connection closed locally");
                let _ = writer.shutdown().await;
                break Some("closed locally".to_string());
            }

            outgoing = outgoing_rx.recv() => {
                let Some(data) = outgoing else {
                    let _ = writer.shutdown().await;
                    break Some("sender dropped".to_string());
                };
                if let Err(e) = writer.write_all(&data).await {
                    error!("TCP write error: {}", e);
                    break Some(e.to_string());
                }
            }

            result = reader.read_buf(&mut read_buf) => {
                match result {
                    Ok(0) => {
                        debug!("TCP connection closed");
                        break None;
                    }
                    Ok(n) => {
                        debug!("TCP received {} bytes", n);
                        let data = read_buf.split().freeze();
                        if incoming_tx.send(TransportEvent::Data(data)).await.is_err() {
                            break None;
                        }
                        read_buf.reserve(read_buffer_size);
                    }
                    Err(e) => {
                        error!("TCP read error: {}", e);
                        let _ = incoming_tx.send(TransportEvent::Error(e.to_string())).await;
                        break Some(e.to_string());
                    }
                }
            }
        }
    };

    *connected.lock() = false;
    let _ = incoming_tx
        .send(TransportEvent::Disconnected { reason })
        .await;
}

/// TCP sender for writing messages
pub struct TcpSender {
    tx: mpsc::Sender<Bytes>,
    connected: Arc<Mutex<bool>>,
    shutdown: Arc<Notify>,
}

#[async_trait]
impl TransportSender for TcpSender {
    async fn send(&self, data: Bytes) -> Result<()> {
        if !*self.connected.lock() {
            return Err(TransportError::NotConnected);
        }

        self.tx
            .send(data)
            .await
            .map_err(|_| TransportError::SendFailed("Channel closed".into()))
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock()
    }

    async fn close(&self) -> Result<()> {
        *self.connected.lock() = false;
        self.shutdown.notify_one();
        Ok(())
    }
}

/// TCP receiver for reading messages
pub struct TcpReceiver {
    rx: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
impl TransportReceiver for TcpReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}

/// TCP server for accepting connections
pub struct TcpServer {
    listener: TcpListener,
    config: TcpConfig,
}

impl TcpServer {
    /// Bind to an address and create a new TCP server
    pub async fn bind(addr: &str) -> Result<Self> {
        Self::bind_with_config(addr, TcpConfig::default()).await
    }

    /// Bind with custom configuration
    pub async fn bind_with_config(addr: &str, config: TcpConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        info!("TCP server listening on {}", addr);

        Ok(Self { listener, config })
    }
}

#[async_trait]
impl TransportServer for TcpServer {
    type Sender = TcpSender;
    type Receiver = TcpReceiver;

    async fn accept(&mut self) -> Result<(Self::Sender, Self::Receiver, SocketAddr)> {
        let (stream, peer_addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| TransportError::AcceptFailed(e.to_string()))?;

        info!("TCP connection accepted from {}", peer_addr);

        let (sender, receiver) = spawn_io(stream, self.config.read_buffer_size);
        Ok((sender, receiver, peer_addr))
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| TransportError::Other(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tcp_config_default() {
        let config = TcpConfig::default();
        assert_eq!(config.read_buffer_size, 8192);
        assert_eq!(config.keepalive_secs, 30);
        assert_eq!(config.default_port, 8888);
    }

    #[test]
    fn test_default_port() {
        assert_eq!(with_default_port("192.168.1.101", 8888).unwrap(), "192.168.1.101:8888");
        assert_eq!(with_default_port("10.0.0.2:9000", 8888).unwrap(), "10.0.0.2:9000");
        assert_eq!(with_default_port("thermostat.local", 8888).unwrap(), "thermostat.local:8888");
        assert_eq!(with_default_port("[::1]:7000", 8888).unwrap(), "[::1]:7000");
        assert_eq!(with_default_port("::1", 8888).unwrap(), "[::1]:8888");
        assert!(with_default_port("host:port", 8888).is_err());
        assert!(with_default_port("  ", 8888).is_err());
    }

    #[tokio::test]
    async fn test_tcp_client_server_connection() {
        let mut server = TcpServer::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        let accept_handle = tokio::spawn(async move {
            let (sender, mut receiver, _peer) = server.accept().await.unwrap();
            if let Some(TransportEvent::Data(data)) = receiver.recv().await {
                sender.send(data).await.unwrap();
            }
            (sender, receiver)
        });

        let transport = TcpTransport::new();
        let (client_sender, mut client_receiver) =
            transport.connect(&addr.to_string()).await.unwrap();

        let test_data = Bytes::from_static(br#"{"id":1}"#);
        client_sender.send(test_data.clone()).await.unwrap();

        // Raw stream: the echo may arrive in pieces
        let mut received = Vec::new();
        while received.len() < test_data.len() {
            match client_receiver.recv().await {
                Some(TransportEvent::Data(chunk)) => received.extend_from_slice(&chunk),
                other => panic!("Expected Data event, got {:?}", other),
            }
        }
        assert_eq!(received, test_data.to_vec());

        client_sender.close().await.unwrap();
        let _ = accept_handle.await;
    }
}

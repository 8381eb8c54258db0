//! One physical connection to the device
//!
//! An [`RpcConnection`] wraps the sending half of a transport. The session's
//! reader task feeds it received bytes through [`RpcConnection::pump`];
//! callers issue requests concurrently through
//! [`RpcConnection::send_request`].

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thermo_core::{codec, FrameReassembler, Message, Notification, Params, Request, Response};
use thermo_transport::{TransportEvent, TransportReceiver, TransportSender};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::error::{ClientError, Result};
use crate::pending::{PendingCallTable, STALE_CALL_AGE};

/// Default time to wait for a response
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(3);

/// Receives every message that is not a response
pub type NotificationSink = Arc<dyn Fn(Notification) + Send + Sync>;

/// Lifecycle of a connection. There is no way back from `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Idle,
    Open,
    Closed,
}

/// Per-connection limits
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub call_timeout: Duration,
    pub stale_call_age: Duration,
    pub max_frame_bytes: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            stale_call_age: STALE_CALL_AGE,
            max_frame_bytes: thermo_core::frame::DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Request/response correlation over one transport
pub struct RpcConnection {
    sender: Box<dyn TransportSender>,
    pending: Mutex<PendingCallTable>,
    reassembler: Mutex<FrameReassembler>,
    phase: Mutex<ConnectionPhase>,
    call_timeout: Duration,
    notifications: NotificationSink,
}

impl RpcConnection {
    pub fn new(
        sender: Box<dyn TransportSender>,
        options: ConnectionOptions,
        notifications: NotificationSink,
    ) -> Self {
        Self {
            sender,
            pending: Mutex::new(PendingCallTable::with_max_age(options.stale_call_age)),
            reassembler: Mutex::new(FrameReassembler::with_max_size(options.max_frame_bytes)),
            phase: Mutex::new(ConnectionPhase::Idle),
            call_timeout: options.call_timeout,
            notifications,
        }
    }

    pub fn phase(&self) -> ConnectionPhase {
        *self.phase.lock()
    }

    pub fn is_open(&self) -> bool {
        self.phase() == ConnectionPhase::Open
    }

    /// Number of calls waiting for a response
    pub fn pending_calls(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn on_opened(&self) {
        let mut phase = self.phase.lock();
        if *phase == ConnectionPhase::Idle {
            *phase = ConnectionPhase::Open;
        }
    }

    /// Mark the connection closed and cancel everything in flight
    pub fn on_closed(&self, reason: Option<&str>) {
        {
            let mut phase = self.phase.lock();
            if *phase == ConnectionPhase::Closed {
                return;
            }
            *phase = ConnectionPhase::Closed;
        }

        let mut pending = self.pending.lock();
        if !pending.is_empty() {
            debug!(
                "Cancelling {} pending call(s): connection closed ({})",
                pending.len(),
                reason.unwrap_or("no reason")
            );
        }
        pending.clear();
        self.reassembler.lock().reset();
    }

    /// Close the transport. The reader task observes the disconnect.
    pub async fn close(&self) {
        if let Err(e) = self.sender.close().await {
            warn!("Error closing transport: {}", e);
        }
        self.on_closed(Some("closed locally"));
    }

    /// Send a request and wait for its response.
    ///
    /// A response carrying `error` is still returned as `Ok`; turning it into
    /// a failure is up to the caller.
    pub async fn send_request(&self, method: &str, params: Option<Params>) -> Result<Response> {
        if !self.is_open() {
            return Err(ClientError::NotConnected);
        }

        let (tx, rx) = oneshot::channel();
        let id = {
            let mut pending = self.pending.lock();
            let id = pending.allocate();
            pending.register(id, tx)?;
            id
        };

        let mut request = Request::new(method, id);
        if let Some(params) = params {
            request = request.with_params(params);
        }

        let bytes = match codec::encode_request(&request) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.pending.lock().cancel(id);
                return Err(e.into());
            }
        };

        debug!("request: {}", String::from_utf8_lossy(&bytes));

        if let Err(e) = self.sender.send(bytes).await {
            self.pending.lock().cancel(id);
            return Err(e.into());
        }

        match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(response)) => {
                debug!("response: {:?}", response);
                Ok(response)
            }
            Ok(Err(_)) => Err(ClientError::Cancelled),
            Err(_) => {
                self.pending.lock().cancel(id);
                warn!("Call {} ({}) timed out after {:?}", id, method, self.call_timeout);
                Err(ClientError::Timeout)
            }
        }
    }

    /// Feed received bytes, resolving responses and dispatching notifications.
    ///
    /// Fails only on a framing error, after which the connection is closed.
    pub async fn on_bytes_received(&self, chunk: &[u8]) -> Result<()> {
        let fed = self.reassembler.lock().feed(chunk);
        let messages = match fed {
            Ok(messages) => messages,
            Err(e) => {
                error!("Framing error, closing connection: {}", e);
                self.close().await;
                return Err(e.into());
            }
        };

        for message in messages {
            self.dispatch(message);
        }
        Ok(())
    }

    fn dispatch(&self, message: Message) {
        match message {
            Message::Response(response) => {
                let id = response.request_id();
                if !self.pending.lock().resolve(id, response) {
                    debug!("Dropping response {:?}: no call pending", id);
                }
            }
            Message::Notification(notification) => {
                debug!("notification: {:?}", notification.body());
                (self.notifications)(notification);
            }
            Message::Request(request) => {
                warn!(
                    "Ignoring request from device: {} (id {})",
                    request.method, request.id
                );
            }
        }
    }

    /// Process transport events until the connection ends, returning the
    /// disconnect reason
    pub async fn pump(&self, receiver: &mut dyn TransportReceiver) -> Option<String> {
        let reason = loop {
            match receiver.recv().await {
                Some(TransportEvent::Data(data)) => {
                    if let Err(e) = self.on_bytes_received(&data).await {
                        break Some(e.to_string());
                    }
                }
                Some(TransportEvent::Error(e)) => {
                    error!("Transport error: {}", e);
                }
                Some(TransportEvent::Disconnected { reason }) => break reason,
                None => break Some("transport gone".to_string()),
            }
        };

        info!(
            "Connection ended: {}",
            reason.as_deref().unwrap_or("closed by peer")
        );
        self.on_closed(reason.as_deref());
        reason
    }
}

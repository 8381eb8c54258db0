//! Connection supervision
//!
//! [`ReconnectingSession`] keeps one logical connection to the device alive.
//! A supervisor task opens a transport, runs an [`RpcConnection`] on it until
//! it drops, then waits out a backoff delay and tries again.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use thermo_core::{Params, Response};
use thermo_transport::Connector;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::connection::{ConnectionOptions, NotificationSink, RpcConnection};
use crate::error::{ClientError, Result};
use crate::proxy::RequestSender;

/// Connectivity as seen by the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Why a session lost its connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectKind {
    /// An established connection dropped
    Lost,
    /// The connection attempt itself failed
    Failed,
}

/// Lifecycle hooks, called from the supervisor task
pub trait SessionObserver: Send + Sync {
    /// Called before the state moves to `Connected`
    fn on_connect(&self, _connection: Arc<RpcConnection>) {}

    /// Called before the state moves to `Disconnected`
    fn on_disconnect(&self, _kind: DisconnectKind, _reason: &str) {}

    fn on_state_changed(&self, _state: ConnectionState) {}
}

/// Exponential reconnect delay with jitter.
///
/// Each delay is the current base scaled by a random factor within
/// `1 ± jitter`, never more than the maximum. The base then grows by
/// `factor` up to the maximum.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    factor: f64,
    jitter: f64,
    current: Duration,
}

impl Backoff {
    pub const DEFAULT_INITIAL: Duration = Duration::from_secs(1);
    pub const DEFAULT_MAX: Duration = Duration::from_secs(5);
    pub const DEFAULT_FACTOR: f64 = std::f64::consts::E;
    pub const DEFAULT_JITTER: f64 = 0.12;

    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            max,
            factor: Self::DEFAULT_FACTOR,
            jitter: Self::DEFAULT_JITTER,
            current: initial,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn next_delay(&mut self) -> Duration {
        let base = self.current.as_secs_f64();
        let scale = if self.jitter > 0.0 {
            rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter)
        } else {
            1.0
        };
        let delay = Duration::from_secs_f64(base * scale).min(self.max);

        self.current = self.current.mul_f64(self.factor).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    pub fn max(&self) -> Duration {
        self.max
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Self::DEFAULT_INITIAL, Self::DEFAULT_MAX)
    }
}

/// Session settings
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub connection: ConnectionOptions,
    pub initial_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            connection: ConnectionOptions::default(),
            initial_reconnect_delay: Backoff::DEFAULT_INITIAL,
            max_reconnect_delay: Backoff::DEFAULT_MAX,
        }
    }
}

struct Shared {
    address: String,
    connector: Arc<dyn Connector>,
    options: SessionOptions,
    observer: Arc<dyn SessionObserver>,
    notifications: NotificationSink,
    state: Mutex<ConnectionState>,
    current: Mutex<Option<Arc<RpcConnection>>>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let changed = {
            let mut current = self.state.lock();
            std::mem::replace(&mut *current, state) != state
        };
        if changed {
            debug!("Session {} -> {:?}", self.address, state);
            self.observer.on_state_changed(state);
        }
    }
}

/// Supervises connections to one address
pub struct ReconnectingSession {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ReconnectingSession {
    pub fn new(
        address: &str,
        connector: Arc<dyn Connector>,
        options: SessionOptions,
        observer: Arc<dyn SessionObserver>,
        notifications: NotificationSink,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                address: address.to_string(),
                connector,
                options,
                observer,
                notifications,
                state: Mutex::new(ConnectionState::Disconnected),
                current: Mutex::new(None),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn address(&self) -> &str {
        &self.shared.address
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    /// Whether the supervisor is running
    pub fn is_started(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    /// The live connection, if any
    pub fn connection(&self) -> Option<Arc<RpcConnection>> {
        self.shared.current.lock().clone()
    }

    /// Start the supervisor. Does nothing if it is already running.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.as_ref().map(|t| !t.is_finished()).unwrap_or(false) {
            return;
        }
        info!("Starting session for {}", self.shared.address);
        *task = Some(tokio::spawn(supervise(self.shared.clone())));
    }

    /// Stop reconnecting and close the live connection
    pub async fn close(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.abort();
        }

        let connection = self.shared.current.lock().take();
        if let Some(connection) = connection {
            connection.close().await;
            self.shared
                .observer
                .on_disconnect(DisconnectKind::Lost, "Connection was closed cleanly.");
        }
        self.shared.set_state(ConnectionState::Disconnected);
    }

    /// Drop the live connection; the supervisor reconnects after a backoff
    pub async fn force_reconnect(&self) {
        if let Some(connection) = self.connection() {
            connection.close().await;
        }
    }

    pub async fn send_request(&self, method: &str, params: Option<Params>) -> Result<Response> {
        let connection = self.connection().ok_or(ClientError::NotConnected)?;
        connection.send_request(method, params).await
    }
}

impl Drop for ReconnectingSession {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

#[async_trait]
impl RequestSender for ReconnectingSession {
    async fn send_request(&self, method: &str, params: Option<Params>) -> Result<Response> {
        ReconnectingSession::send_request(self, method, params).await
    }
}

async fn supervise(shared: Arc<Shared>) {
    let mut backoff = Backoff::new(
        shared.options.initial_reconnect_delay,
        shared.options.max_reconnect_delay,
    );

    loop {
        shared.set_state(ConnectionState::Connecting);

        match shared.connector.connect(&shared.address).await {
            Ok((sender, mut receiver)) => {
                backoff.reset();

                let connection = Arc::new(RpcConnection::new(
                    sender,
                    shared.options.connection.clone(),
                    shared.notifications.clone(),
                ));
                connection.on_opened();
                *shared.current.lock() = Some(connection.clone());

                info!("Connected to {}", shared.address);
                shared.observer.on_connect(connection.clone());
                shared.set_state(ConnectionState::Connected);

                let reason = connection.pump(receiver.as_mut()).await;
                *shared.current.lock() = None;

                let reason = reason.unwrap_or_else(|| "Connection was closed cleanly.".into());
                warn!("Connection to {} lost: {}", shared.address, reason);
                shared.observer.on_disconnect(DisconnectKind::Lost, &reason);
            }
            Err(e) => {
                warn!("Connection to {} failed: {}", shared.address, e);
                shared
                    .observer
                    .on_disconnect(DisconnectKind::Failed, &e.to_string());
            }
        }
        shared.set_state(ConnectionState::Disconnected);

        let delay = backoff.next_delay();
        debug!("Reconnecting to {} in {:?}", shared.address, delay);
        tokio::time::sleep(delay).await;
    }
}

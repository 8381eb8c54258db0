//! Main thermostat client implementation

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use thermo_core::{Notification, PropertySpec, PropertyValue};
use thermo_transport::{Connector, TcpConfig, TcpTransport};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::builder::ThermostatBuilder;
use crate::config::ClientConfig;
use crate::connection::RpcConnection;
use crate::error::{ClientError, Result};
use crate::heartbeat::HeartbeatScheduler;
use crate::model::{
    ChangeCallback, DeviceStateModel, ListenerCallback, ModelEvent, ModelHooks, PropertyChange,
    Subscription, SyncOutcome,
};
use crate::proxy::{CallArgs, RemoteCallProxy};
use crate::session::{ConnectionState, DisconnectKind, ReconnectingSession, SessionObserver};
use crate::thermostat::thermostat_properties;

/// Connection state callback type
pub type StateCallback = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Glue between a session and the model it feeds
struct DeviceLink {
    model: Arc<DeviceStateModel>,
    heartbeat: HeartbeatScheduler,
    state_callbacks: Arc<DashMap<u64, StateCallback>>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
}

impl SessionObserver for DeviceLink {
    fn on_connect(&self, connection: Arc<RpcConnection>) {
        self.model.set_connection_status(true, "Connected");

        let model = self.model.clone();
        self.heartbeat.start(move || {
            let model = model.clone();
            let connection = connection.clone();
            async move { sync_state(&model, connection).await }
        });
    }

    fn on_disconnect(&self, kind: DisconnectKind, reason: &str) {
        self.heartbeat.stop();
        let status = match kind {
            DisconnectKind::Lost => format!("Connection lost. Reason: {}", reason),
            DisconnectKind::Failed => format!("Connection failed. Reason: {}", reason),
        };
        self.model.set_connection_status(false, &status);
    }

    fn on_state_changed(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
        let callbacks: Vec<StateCallback> = self
            .state_callbacks
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for callback in callbacks {
            callback(state);
        }
    }
}

/// One heartbeat: pull the full state, or drop the connection if the device
/// does not answer
async fn sync_state(model: &DeviceStateModel, connection: Arc<RpcConnection>) {
    let proxy = RemoteCallProxy::new(connection.clone());
    match proxy.get_state().await {
        Ok(state) => {
            model.apply_state(&state);
        }
        Err(e) => {
            warn!("Failed to sync with thermostat: {}", e);
            connection.close().await;
        }
    }
}

/// Model and session for one device address
struct Device {
    model: Arc<DeviceStateModel>,
    session: Arc<ReconnectingSession>,
    proxy: RemoteCallProxy,
}

/// A networked thermostat
///
/// Keeps a connection to the device open, mirrors its properties, and
/// confirms every local change with the device.
pub struct Thermostat {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    properties: Vec<PropertySpec>,
    hooks: Arc<ModelHooks>,
    state_callbacks: Arc<DashMap<u64, StateCallback>>,
    next_callback_id: Arc<AtomicU64>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    device: RwLock<Arc<Device>>,
}

impl Thermostat {
    /// Create a client for the standard thermostat over TCP (use builder for
    /// more options)
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_parts(config, default_connector(), thermostat_properties())
    }

    /// Create a builder
    pub fn builder(address: &str) -> ThermostatBuilder {
        ThermostatBuilder::new(address)
    }

    pub(crate) fn with_parts(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        properties: Vec<PropertySpec>,
    ) -> Result<Self> {
        config.validate()?;

        let hooks = ModelHooks::new();
        let state_callbacks = Arc::new(DashMap::new());
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let state_tx = Arc::new(state_tx);

        let device = build_device(
            &config.address,
            &config,
            &connector,
            &properties,
            &hooks,
            &state_callbacks,
            &state_tx,
        );

        Ok(Self {
            config,
            connector,
            properties,
            hooks,
            state_callbacks,
            next_callback_id: Arc::new(AtomicU64::new(1)),
            state_tx,
            device: RwLock::new(Arc::new(device)),
        })
    }

    fn device(&self) -> Arc<Device> {
        self.device.read().clone()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Address of the current device
    pub fn address(&self) -> String {
        self.device().session.address().to_string()
    }

    /// Start connecting to `address`, switching devices if it differs from
    /// the current one. Reconnects automatically until [`close`](Self::close).
    pub async fn open(&self, address: &str) {
        if address != self.address() {
            self.set_address(address).await;
        }
        self.device().session.start();
    }

    /// Stop the session and drop the connection
    pub async fn close(&self) {
        info!("Closing connection to {}", self.address());
        self.device().session.close().await;
    }

    /// Point the client at another device.
    ///
    /// The old session is closed and a fresh model with default values
    /// replaces the old one. Subscriptions and the listener carry over. The
    /// new session starts only if the old one was running.
    pub async fn set_address(&self, address: &str) {
        let old = self.device();
        let was_started = old.session.is_started();
        old.session.close().await;

        let device = build_device(
            address,
            &self.config,
            &self.connector,
            &self.properties,
            &self.hooks,
            &self.state_callbacks,
            &self.state_tx,
        );
        *self.device.write() = Arc::new(device);
        info!("Thermostat address set to {}", address);

        if was_started {
            self.device().session.start();
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.device().session.state()
    }

    pub fn is_connected(&self) -> bool {
        self.device().model.is_connected()
    }

    /// Wait until the session reports `Connected`
    pub async fn wait_connected(&self, timeout: Duration) -> Result<()> {
        let mut rx = self.state_tx.subscribe();
        let connected = rx.wait_for(|state| *state == ConnectionState::Connected);
        let result = match tokio::time::timeout(timeout, connected).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(ClientError::NotConnected),
            Err(_) => Err(ClientError::Timeout),
        };
        result
    }

    /// Call an arbitrary remote method
    pub async fn call(&self, method: &str, args: CallArgs) -> Result<Value> {
        self.device().proxy.invoke(method, args).await
    }

    /// Proxy for the typed remote methods
    pub fn proxy(&self) -> RemoteCallProxy {
        self.device().proxy.clone()
    }

    /// Fetch the full state from the device without applying it
    pub async fn get_state(&self) -> Result<Map<String, Value>> {
        self.device().proxy.get_state().await
    }

    pub fn get(&self, name: &str) -> Result<PropertyValue> {
        self.device().model.get(name)
    }

    /// All properties with their current values
    pub fn snapshot(&self) -> Vec<(String, PropertyValue)> {
        self.device().model.snapshot()
    }

    /// Write a property and, when connected, confirm it with the device.
    ///
    /// The value is applied locally straight away. If the device reports a
    /// different value, or does not answer, the old value is restored and
    /// the outcome says so.
    pub async fn set(&self, name: &str, value: impl Into<PropertyValue>) -> Result<SyncOutcome> {
        let device = self.device();
        let write = device.model.write_local(name, value.into())?;
        Ok(device.model.confirm(&write, &device.proxy).await)
    }

    /// Call `callback` on every property change
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&PropertyChange) + Send + Sync + 'static,
    {
        let callback: ChangeCallback = Arc::new(callback);
        self.hooks.subscribe(callback)
    }

    /// Call `callback` whenever the connection state changes
    pub fn on_connection_state_changed<F>(&self, callback: F) -> Subscription
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        let id = self.next_callback_id.fetch_add(1, Ordering::SeqCst);
        self.state_callbacks.insert(id, Arc::new(callback));

        let callbacks = Arc::downgrade(&self.state_callbacks);
        Subscription::new(move || {
            if let Some(callbacks) = callbacks.upgrade() {
                callbacks.remove(&id);
            }
        })
    }

    /// Receive every property change and every notification from the device
    pub fn set_listener<F>(&self, listener: F)
    where
        F: Fn(&ModelEvent) + Send + Sync + 'static,
    {
        let listener: ListenerCallback = Arc::new(listener);
        self.hooks.set_listener(Some(listener));
    }

    pub fn clear_listener(&self) {
        self.hooks.set_listener(None);
    }
}

pub(crate) fn default_connector() -> Arc<dyn Connector> {
    Arc::new(TcpTransport::with_config(TcpConfig {
        default_port: thermo_core::DEFAULT_PORT,
        ..Default::default()
    }))
}

fn build_device(
    address: &str,
    config: &ClientConfig,
    connector: &Arc<dyn Connector>,
    properties: &[PropertySpec],
    hooks: &Arc<ModelHooks>,
    state_callbacks: &Arc<DashMap<u64, StateCallback>>,
    state_tx: &Arc<watch::Sender<ConnectionState>>,
) -> Device {
    let model = Arc::new(DeviceStateModel::new(
        properties.to_vec(),
        config.float_precision,
        hooks.clone(),
    ));

    let link = Arc::new(DeviceLink {
        model: model.clone(),
        heartbeat: HeartbeatScheduler::new(config.heartbeat_interval()),
        state_callbacks: state_callbacks.clone(),
        state_tx: state_tx.clone(),
    });

    let sink_model = model.clone();
    let session = Arc::new(ReconnectingSession::new(
        address,
        connector.clone(),
        config.session_options(),
        link,
        Arc::new(move |notification: Notification| {
            sink_model.apply_notification(&notification)
        }),
    ));

    let proxy = RemoteCallProxy::new(session.clone());
    Device {
        model,
        session,
        proxy,
    }
}

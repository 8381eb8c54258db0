//! Mirrored device state
//!
//! [`DeviceStateModel`] holds the client's copy of every device property.
//! Local writes are applied immediately and then confirmed against the
//! device; values pushed by the device are applied with outbound sync
//! suppressed so they are never echoed back.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use thermo_core::{values_match, Notification, PropertySpec, PropertyValue, SyncMode};
use tracing::{debug, error, warn};

use crate::error::{ClientError, Result};
use crate::proxy::RemoteCallProxy;

/// Name of the local connectivity flag
pub const CONNECTED: &str = "connected";
/// Name of the local status text
pub const STATUS: &str = "status";

/// Where a change came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// Written through the client API
    Local,
    /// Pushed or reported by the device
    Remote,
    /// A local write undone after the device disagreed
    Rollback,
}

/// One property change
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyChange {
    pub name: String,
    pub value: PropertyValue,
    pub old: PropertyValue,
    pub origin: ChangeOrigin,
}

/// What the raw listener sees
#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    Changed(PropertyChange),
    Notification(Notification),
}

pub type ChangeCallback = Arc<dyn Fn(&PropertyChange) + Send + Sync>;
pub type ListenerCallback = Arc<dyn Fn(&ModelEvent) + Send + Sync>;

/// Result of confirming a local write with the device
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// Not sent: local-only property, disconnected, or written while syncing
    LocalOnly,
    /// The device echoed the value back
    Confirmed,
    /// The device disagreed or the call failed; the old value is restored
    RolledBack { echoed: Option<PropertyValue> },
}

/// A local write waiting to be confirmed
#[derive(Debug, Clone, PartialEq)]
pub struct LocalWrite {
    pub name: String,
    pub value: PropertyValue,
    pub old: PropertyValue,
    /// Whether the write must be sent to the device
    pub outbound: bool,
}

/// Subscribers and listener, shared by every model a client creates
#[derive(Default)]
pub struct ModelHooks {
    subscribers: DashMap<u64, ChangeCallback>,
    next_id: AtomicU64,
    listener: RwLock<Option<ListenerCallback>>,
}

impl ModelHooks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a change callback. Dropping the returned [`Subscription`]
    /// removes it.
    pub fn subscribe(self: &Arc<Self>, callback: ChangeCallback) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers.insert(id, callback);

        let hooks = Arc::downgrade(self);
        Subscription::new(move || {
            if let Some(hooks) = hooks.upgrade() {
                hooks.subscribers.remove(&id);
            }
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn set_listener(&self, listener: Option<ListenerCallback>) {
        *self.listener.write() = listener;
    }

    fn emit(&self, event: &ModelEvent) {
        let listener = self.listener.read().clone();
        if let Some(listener) = listener {
            listener(event);
        }
    }

    fn notify(&self, change: PropertyChange) {
        // Collect first: a callback may subscribe or unsubscribe
        let callbacks: Vec<ChangeCallback> = self
            .subscribers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for callback in callbacks {
            callback(&change);
        }
        self.emit(&ModelEvent::Changed(change));
    }
}

/// Handle for a registered callback; unregisters on drop
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub(crate) fn new(remove: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            remove: Some(Box::new(remove)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

struct ModelState {
    values: HashMap<String, PropertyValue>,
    syncing: bool,
}

/// Marks the model as applying device values. Cleared on drop.
struct SyncGuard<'a> {
    model: &'a DeviceStateModel,
    previous: bool,
}

impl<'a> SyncGuard<'a> {
    fn enter(model: &'a DeviceStateModel) -> Self {
        let previous = std::mem::replace(&mut model.state.lock().syncing, true);
        Self { model, previous }
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.model.state.lock().syncing = self.previous;
    }
}

/// Client-side copy of the device's properties
pub struct DeviceStateModel {
    specs: HashMap<String, PropertySpec>,
    order: Vec<String>,
    state: Mutex<ModelState>,
    precision: u32,
    hooks: Arc<ModelHooks>,
}

impl DeviceStateModel {
    pub fn new(properties: Vec<PropertySpec>, precision: u32, hooks: Arc<ModelHooks>) -> Self {
        let mut values = HashMap::with_capacity(properties.len());
        let mut specs = HashMap::with_capacity(properties.len());
        let mut order = Vec::with_capacity(properties.len());

        for spec in properties {
            values.insert(spec.name.clone(), spec.default.clone());
            order.push(spec.name.clone());
            specs.insert(spec.name.clone(), spec);
        }

        Self {
            specs,
            order,
            state: Mutex::new(ModelState {
                values,
                syncing: false,
            }),
            precision,
            hooks,
        }
    }

    pub fn hooks(&self) -> &Arc<ModelHooks> {
        &self.hooks
    }

    pub fn spec(&self, name: &str) -> Option<&PropertySpec> {
        self.specs.get(name)
    }

    /// Property names in definition order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Result<PropertyValue> {
        self.state
            .lock()
            .values
            .get(name)
            .cloned()
            .ok_or_else(|| ClientError::UnknownProperty(name.to_string()))
    }

    /// Every property with its current value, in definition order
    pub fn snapshot(&self) -> Vec<(String, PropertyValue)> {
        let state = self.state.lock();
        self.order
            .iter()
            .filter_map(|name| state.values.get(name).map(|v| (name.clone(), v.clone())))
            .collect()
    }

    pub fn is_syncing(&self) -> bool {
        self.state.lock().syncing
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.get(CONNECTED), Ok(PropertyValue::Bool(true)))
    }

    /// Apply a write made through the client API.
    ///
    /// Read-only properties cannot be written locally. The returned
    /// [`LocalWrite`] says whether the write still has to be confirmed with
    /// the device.
    pub fn write_local(&self, name: &str, value: PropertyValue) -> Result<LocalWrite> {
        let spec = self
            .spec(name)
            .ok_or_else(|| ClientError::UnknownProperty(name.to_string()))?;
        if spec.sync == SyncMode::ReadOnly {
            return Err(ClientError::InvalidValue {
                name: name.to_string(),
                reason: "property is read-only".into(),
            });
        }
        let value = spec.validate(value)?;

        let (old, outbound) = {
            let mut state = self.state.lock();
            let connected = matches!(state.values.get(CONNECTED), Some(PropertyValue::Bool(true)));
            let outbound = spec.syncs_outbound() && connected && !state.syncing;
            let old = state
                .values
                .insert(name.to_string(), value.clone())
                .unwrap_or_else(|| spec.default.clone());
            // Rewriting the current value is not a change
            let outbound = outbound && old != value;
            (old, outbound)
        };

        if old != value {
            self.hooks.notify(PropertyChange {
                name: name.to_string(),
                value: value.clone(),
                old: old.clone(),
                origin: ChangeOrigin::Local,
            });
        }

        Ok(LocalWrite {
            name: name.to_string(),
            value,
            old,
            outbound,
        })
    }

    /// Send a local write to the device and verify the echo.
    ///
    /// On a mismatch, or if the call fails, the old value is restored. Never
    /// fails: the outcome says what happened.
    pub async fn confirm(&self, write: &LocalWrite, proxy: &RemoteCallProxy) -> SyncOutcome {
        if !write.outbound {
            return SyncOutcome::LocalOnly;
        }

        let mut changes = Map::new();
        changes.insert(write.name.clone(), write.value.to_json());

        let echoed = match proxy.set_state(changes).await {
            Ok(state) => match state.get(&write.name) {
                Some(raw) => match self.spec(&write.name).map(|spec| spec.coerce(raw)) {
                    Some(Ok(value)) => Some(value),
                    _ => {
                        error!(
                            "Failed to update value {} to {}, got {}",
                            write.name, write.value, raw
                        );
                        self.rollback(write);
                        return SyncOutcome::RolledBack { echoed: None };
                    }
                },
                None => Some(write.old.clone()),
            },
            Err(e) => {
                error!("Error updating thermostat: {}", e);
                self.rollback(write);
                return SyncOutcome::RolledBack { echoed: None };
            }
        };

        match echoed {
            Some(echo) if values_match(&write.value, &echo, self.precision) => {
                debug!("Confirmed {} = {}", write.name, write.value);
                SyncOutcome::Confirmed
            }
            echoed => {
                if let Some(echo) = &echoed {
                    error!(
                        "Failed to update value {} to {}, got {}",
                        write.name, write.value, echo
                    );
                }
                self.rollback(write);
                SyncOutcome::RolledBack { echoed }
            }
        }
    }

    fn rollback(&self, write: &LocalWrite) {
        let _guard = SyncGuard::enter(self);
        self.store(&write.name, write.old.clone(), ChangeOrigin::Rollback);
    }

    /// Handle a notification from the device.
    ///
    /// Property updates are applied with outbound sync suppressed. NaN
    /// readings, unknown names, and local-only properties are ignored.
    pub fn apply_notification(&self, notification: &Notification) {
        self.hooks
            .emit(&ModelEvent::Notification(notification.clone()));

        let Some(update) = notification.as_update() else {
            return;
        };

        let _guard = SyncGuard::enter(self);
        match self.coerce_inbound(&update.name, &update.value) {
            Ok(Some(value)) => self.store(&update.name, value, ChangeOrigin::Remote),
            Ok(None) => {}
            Err(e) => error!("Failed to sync with thermostat: {} {}: {}", update.name, update.value, e),
        }
    }

    /// Apply a full `getState` result, returning how many keys were skipped
    /// because their value was unusable
    pub fn apply_state(&self, state: &Map<String, Value>) -> usize {
        let _guard = SyncGuard::enter(self);
        let mut skipped = 0;

        for (name, raw) in state {
            match self.coerce_inbound(name, raw) {
                Ok(Some(value)) => self.store(name, value, ChangeOrigin::Remote),
                Ok(None) => {}
                Err(e) => {
                    warn!("Failed to sync with thermostat: {} {}: {}", name, raw, e);
                    skipped += 1;
                }
            }
        }

        if skipped > 0 {
            warn!("Skipped {} of {} state key(s)", skipped, state.len());
        }
        skipped
    }

    /// `Ok(None)` means the value is to be ignored without complaint
    fn coerce_inbound(&self, name: &str, raw: &Value) -> Result<Option<PropertyValue>> {
        let Some(spec) = self.spec(name) else {
            debug!("Ignoring unknown property {}", name);
            return Ok(None);
        };
        if !spec.syncs_inbound() {
            return Ok(None);
        }

        let value = spec.coerce(raw)?;
        if value.is_nan() {
            debug!("Discarding NaN for {}", name);
            return Ok(None);
        }
        Ok(Some(value))
    }

    /// Update connectivity and status text
    pub fn set_connection_status(&self, connected: bool, status: &str) {
        self.store(STATUS, PropertyValue::from(status), ChangeOrigin::Local);
        self.store(CONNECTED, PropertyValue::Bool(connected), ChangeOrigin::Local);
    }

    fn store(&self, name: &str, value: PropertyValue, origin: ChangeOrigin) {
        let old = {
            let mut state = self.state.lock();
            match state.values.get_mut(name) {
                Some(slot) if *slot == value => return,
                Some(slot) => std::mem::replace(slot, value.clone()),
                None => return,
            }
        };

        self.hooks.notify(PropertyChange {
            name: name.to_string(),
            value,
            old,
            origin,
        });
    }
}

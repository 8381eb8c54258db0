//! Client builder pattern

use std::sync::Arc;
use std::time::Duration;

use thermo_core::PropertySpec;
use thermo_transport::Connector;

use crate::client::{default_connector, Thermostat};
use crate::config::ClientConfig;
use crate::thermostat::thermostat_properties;
use crate::Result;

/// Builder for a [`Thermostat`]
pub struct ThermostatBuilder {
    config: ClientConfig,
    connector: Option<Arc<dyn Connector>>,
    properties: Option<Vec<PropertySpec>>,
}

impl ThermostatBuilder {
    /// Create a new builder
    pub fn new(address: &str) -> Self {
        Self::from_config(ClientConfig {
            address: address.to_string(),
            ..Default::default()
        })
    }

    /// Start from a loaded configuration
    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            config,
            connector: None,
            properties: None,
        }
    }

    /// Set how long a call waits for its response
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set first and longest delay between reconnect attempts
    pub fn reconnect_delay(mut self, initial: Duration, max: Duration) -> Self {
        self.config.initial_reconnect_delay_ms = initial.as_millis() as u64;
        self.config.max_reconnect_delay_ms = max.as_millis() as u64;
        self
    }

    /// Set time between full state polls
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval_secs = interval.as_secs().max(1);
        self
    }

    /// Set significant digits compared when verifying floats
    pub fn float_precision(mut self, digits: u32) -> Self {
        self.config.float_precision = digits;
        self
    }

    /// Set largest partial message buffered
    pub fn max_frame_bytes(mut self, bytes: usize) -> Self {
        self.config.max_frame_bytes = bytes;
        self
    }

    /// Use a custom transport
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Use a custom property table
    pub fn properties(mut self, properties: Vec<PropertySpec>) -> Self {
        self.properties = Some(properties);
        self
    }

    /// Build without connecting
    pub fn build(self) -> Result<Thermostat> {
        let connector = self.connector.unwrap_or_else(default_connector);
        let properties = self.properties.unwrap_or_else(thermostat_properties);
        Thermostat::with_parts(self.config, connector, properties)
    }

    /// Build and start connecting
    pub async fn open(self) -> Result<Thermostat> {
        let thermostat = self.build()?;
        let address = thermostat.config().address.clone();
        thermostat.open(&address).await;
        Ok(thermostat)
    }
}

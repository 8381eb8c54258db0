//! Client configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thermo_core::DEFAULT_FLOAT_PRECISION;

use crate::connection::ConnectionOptions;
use crate::error::{ClientError, Result};
use crate::session::SessionOptions;

/// Settings for a [`Thermostat`](crate::Thermostat). Every field has a
/// default, so a config file only needs the values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// `host:port`, or a bare host for the default port
    pub address: String,
    pub call_timeout_ms: u64,
    pub initial_reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
    pub heartbeat_interval_secs: u64,
    /// Unanswered calls older than this are dropped
    pub stale_call_secs: u64,
    /// Significant digits compared when verifying floats
    pub float_precision: u32,
    /// Largest partial message buffered before the stream is reset
    pub max_frame_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: thermo_core::DEFAULT_ADDRESS.to_string(),
            call_timeout_ms: 3000,
            initial_reconnect_delay_ms: 1000,
            max_reconnect_delay_ms: 5000,
            heartbeat_interval_secs: 30,
            stale_call_secs: 30,
            float_precision: DEFAULT_FLOAT_PRECISION,
            max_frame_bytes: thermo_core::frame::DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(ClientError::Config("address is empty".into()));
        }
        if self.call_timeout_ms == 0 {
            return Err(ClientError::Config("call_timeout_ms must be positive".into()));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(ClientError::Config(
                "heartbeat_interval_secs must be positive".into(),
            ));
        }
        if self.float_precision == 0 || self.float_precision > 17 {
            return Err(ClientError::Config(
                "float_precision must be between 1 and 17".into(),
            ));
        }
        if self.max_frame_bytes == 0 {
            return Err(ClientError::Config("max_frame_bytes must be positive".into()));
        }
        if self.initial_reconnect_delay_ms > self.max_reconnect_delay_ms {
            return Err(ClientError::Config(
                "initial_reconnect_delay_ms exceeds max_reconnect_delay_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            connection: ConnectionOptions {
                call_timeout: self.call_timeout(),
                stale_call_age: Duration::from_secs(self.stale_call_secs),
                max_frame_bytes: self.max_frame_bytes,
            },
            initial_reconnect_delay: Duration::from_millis(self.initial_reconnect_delay_ms),
            max_reconnect_delay: Duration::from_millis(self.max_reconnect_delay_ms),
        }
    }
}

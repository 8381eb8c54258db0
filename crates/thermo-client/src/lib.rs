//! Thermo Client Library
//!
//! Async client for thermostats that speak JSON-RPC over a raw byte stream.
//!
//! # Example
//!
//! ```ignore
//! use thermo_client::Thermostat;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let thermostat = Thermostat::builder("192.168.1.101:8888").open().await?;
//!
//!     // Watch for changes pushed by the device
//!     let _sub = thermostat.subscribe(|change| {
//!         println!("{} = {}", change.name, change.value);
//!     });
//!
//!     thermostat.wait_connected(std::time::Duration::from_secs(5)).await?;
//!
//!     // Applied locally, then confirmed with the device
//!     thermostat.set("desiredTemp", 22.5).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod model;
pub mod pending;
pub mod proxy;
pub mod session;
pub mod thermostat;

pub use builder::ThermostatBuilder;
pub use client::Thermostat;
pub use config::ClientConfig;
pub use connection::{ConnectionOptions, RpcConnection};
pub use error::{ClientError, Result};
pub use model::{ChangeOrigin, DeviceStateModel, ModelEvent, PropertyChange, Subscription, SyncOutcome};
pub use pending::PendingCallTable;
pub use proxy::{CallArgs, RemoteCallProxy};
pub use session::{Backoff, ConnectionState, ReconnectingSession};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::builder::ThermostatBuilder;
    pub use crate::client::Thermostat;
    pub use crate::error::{ClientError, Result};
    pub use crate::model::{PropertyChange, SyncOutcome};
    pub use crate::proxy::CallArgs;
    pub use crate::session::ConnectionState;
    pub use thermo_core::PropertyValue;
}

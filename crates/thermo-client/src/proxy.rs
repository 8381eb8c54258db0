//! Remote method invocation
//!
//! [`RemoteCallProxy::invoke`] calls any method by name; the typed wrappers
//! cover the methods every thermostat firmware implements.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thermo_core::{Params, Response};
use tracing::debug;

use crate::connection::RpcConnection;
use crate::error::{ClientError, Result};

/// Names that belong to the proxy itself and never go over the wire
pub const RESERVED_NAMES: &[&str] = &[
    "invoke",
    "get_state",
    "set_state",
    "get_measured_temp",
    "toggle_led",
];

/// Anything that can carry a request to the device
#[async_trait]
pub trait RequestSender: Send + Sync {
    async fn send_request(&self, method: &str, params: Option<Params>) -> Result<Response>;
}

#[async_trait]
impl RequestSender for RpcConnection {
    async fn send_request(&self, method: &str, params: Option<Params>) -> Result<Response> {
        RpcConnection::send_request(self, method, params).await
    }
}

/// Arguments of a remote call: positional or named, never both
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CallArgs {
    #[default]
    None,
    Positional(Vec<Value>),
    Named(Map<String, Value>),
}

impl CallArgs {
    pub fn builder() -> CallArgsBuilder {
        CallArgsBuilder::default()
    }

    /// Wire parameters; empty argument lists are omitted
    pub fn into_params(self) -> Option<Params> {
        match self {
            CallArgs::None => None,
            CallArgs::Positional(args) if args.is_empty() => None,
            CallArgs::Named(kwargs) if kwargs.is_empty() => None,
            CallArgs::Positional(args) => Some(Params::Array(args)),
            CallArgs::Named(kwargs) => Some(Params::Object(kwargs)),
        }
    }

    /// Interpret a JSON value: arrays are positional, objects named, `null`
    /// no arguments, and anything else a single positional argument
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => CallArgs::None,
            Value::Array(args) => CallArgs::Positional(args),
            Value::Object(kwargs) => CallArgs::Named(kwargs),
            other => CallArgs::Positional(vec![other]),
        }
    }
}

impl From<Vec<Value>> for CallArgs {
    fn from(args: Vec<Value>) -> Self {
        CallArgs::Positional(args)
    }
}

impl From<Map<String, Value>> for CallArgs {
    fn from(kwargs: Map<String, Value>) -> Self {
        CallArgs::Named(kwargs)
    }
}

/// Accumulates arguments, rejecting a mix of positional and named
#[derive(Debug, Default)]
pub struct CallArgsBuilder {
    positional: Vec<Value>,
    named: Map<String, Value>,
}

impl CallArgsBuilder {
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    pub fn named(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.named.insert(name.to_string(), value.into());
        self
    }

    pub fn build(self) -> Result<CallArgs> {
        match (self.positional.is_empty(), self.named.is_empty()) {
            (true, true) => Ok(CallArgs::None),
            (false, true) => Ok(CallArgs::Positional(self.positional)),
            (true, false) => Ok(CallArgs::Named(self.named)),
            (false, false) => Err(ClientError::InvalidCall(
                "Can only do RPC calls with either positional or named arguments, not both".into(),
            )),
        }
    }
}

/// Calls remote methods through a [`RequestSender`]
#[derive(Clone)]
pub struct RemoteCallProxy {
    target: Arc<dyn RequestSender>,
}

impl RemoteCallProxy {
    pub fn new(target: Arc<dyn RequestSender>) -> Self {
        Self { target }
    }

    /// Call `method` and return its `result`.
    ///
    /// Fails with [`ClientError::Remote`] carrying the device's `error`
    /// payload verbatim when the call is rejected.
    pub async fn invoke(&self, method: &str, args: CallArgs) -> Result<Value> {
        check_name(method)?;

        let response = self.target.send_request(method, args.into_params()).await?;
        let result = response.into_result().map_err(ClientError::Remote)?;
        debug!("{} -> {}", method, result);
        Ok(result)
    }

    /// Full device state
    pub async fn get_state(&self) -> Result<Map<String, Value>> {
        match self.invoke("getState", CallArgs::None).await? {
            Value::Object(state) => Ok(state),
            other => Err(unexpected("getState", &other)),
        }
    }

    /// Apply `changes`, returning the state the device ended up with
    pub async fn set_state(&self, changes: Map<String, Value>) -> Result<Map<String, Value>> {
        match self.invoke("setState", CallArgs::Named(changes)).await? {
            Value::Object(state) => Ok(state),
            Value::Null => Ok(Map::new()),
            other => Err(unexpected("setState", &other)),
        }
    }

    /// Current sensor reading. An unreadable sensor reads as NaN.
    pub async fn get_measured_temp(&self) -> Result<f64> {
        match self.invoke("getMeasuredTemp", CallArgs::None).await? {
            Value::Number(n) => Ok(n.as_f64().unwrap_or(f64::NAN)),
            Value::Null => Ok(f64::NAN),
            other => Err(unexpected("getMeasuredTemp", &other)),
        }
    }

    pub async fn toggle_led(&self, status: bool) -> Result<Value> {
        let args = CallArgs::builder().named("status", status).build()?;
        self.invoke("toggleLed", args).await
    }
}

fn check_name(method: &str) -> Result<()> {
    if method.is_empty() {
        return Err(ClientError::InvalidCall("empty method name".into()));
    }
    if method.starts_with('_') || RESERVED_NAMES.contains(&method) {
        return Err(ClientError::ReservedName(method.to_string()));
    }
    Ok(())
}

fn unexpected(method: &str, result: &Value) -> ClientError {
    ClientError::Protocol(thermo_core::Error::InvalidMessage(format!(
        "unexpected {} result: {}",
        method, result
    )))
}

//! Common test helpers and utilities for thermo tests
//!
//! This crate provides:
//! - Condition-based waiting (no hardcoded sleeps)
//! - A scripted fake thermostat served over TCP, cleaned up on drop
//! - Collectors for callback testing

use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thermo_core::{FrameReassembler, Message, Request};
use thermo_transport::{
    TcpSender, TcpServer, TransportEvent, TransportReceiver, TransportSender, TransportServer,
};
use tokio::task::JoinHandle;
use tracing::debug;

/// Default test timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default condition check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Condition-Based Waiting
// ============================================================================

/// Wait for a condition with timeout - condition-based, not time-based
pub async fn wait_for<F, Fut>(check: F, interval: Duration, max_wait: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < max_wait {
        if check().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

/// Wait for a synchronous condition
pub async fn wait_until<F>(check: F, max_wait: Duration) -> bool
where
    F: Fn() -> bool,
{
    wait_for(|| async { check() }, DEFAULT_CHECK_INTERVAL, max_wait).await
}

/// Wait for an atomic counter to reach a target value
pub async fn wait_for_count(counter: &AtomicU32, target: u32, max_wait: Duration) -> bool {
    wait_until(|| counter.load(Ordering::SeqCst) >= target, max_wait).await
}

// ============================================================================
// Fake Thermostat - RAII wrapper with proper cleanup
// ============================================================================

/// Scripted answer to a method
#[derive(Debug, Clone)]
pub enum Reply {
    /// `{"id", "result"}`
    Result(Value),
    /// `{"id", "error"}`
    Error(Value),
    /// Never answer
    Silent,
    /// Answer with this id instead of the one the request carried
    WrongId(u64, Value),
}

#[derive(Default)]
struct FakeState {
    properties: Map<String, Value>,
    pinned: HashMap<String, Value>,
    replies: HashMap<String, Reply>,
    requests: Vec<Request>,
    clients: Vec<Arc<TcpSender>>,
    connections: u32,
    chunk_size: Option<usize>,
}

/// Fake thermostat firmware listening on a local port.
///
/// Implements `getState`, `setState`, `getMeasuredTemp` and `toggleLed`
/// against an in-memory property map, answers unknown methods with
/// `-32601`, and records every request.
pub struct FakeThermostat {
    addr: SocketAddr,
    state: Arc<Mutex<FakeState>>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl FakeThermostat {
    /// Start with the firmware's default state
    pub async fn start() -> Self {
        Self::start_with_state(default_device_state()).await
    }

    pub async fn start_with_state(properties: Map<String, Value>) -> Self {
        let mut server = TcpServer::bind("127.0.0.1:0")
            .await
            .expect("bind fake thermostat");
        let addr = server.local_addr().expect("fake thermostat address");

        let state = Arc::new(Mutex::new(FakeState {
            properties,
            ..Default::default()
        }));
        let tasks: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::new(Mutex::new(Vec::new()));

        let accept_state = state.clone();
        let accept_tasks = tasks.clone();
        let accept = tokio::spawn(async move {
            while let Ok((sender, receiver, peer)) = server.accept().await {
                debug!("Fake thermostat accepted {}", peer);
                let sender = Arc::new(sender);
                {
                    let mut state = accept_state.lock();
                    state.connections += 1;
                    state.clients.push(sender.clone());
                }
                let conn = tokio::spawn(serve(accept_state.clone(), sender, receiver));
                accept_tasks.lock().push(conn);
            }
        });
        tasks.lock().push(accept);

        Self { addr, state, tasks }
    }

    /// `127.0.0.1:<port>`
    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    /// Connections accepted so far
    pub fn connections(&self) -> u32 {
        self.state.lock().connections
    }

    /// Wait for the next accepted connection
    pub async fn wait_connection(&self, count: u32, max_wait: Duration) -> bool {
        wait_until(|| self.connections() >= count, max_wait).await
    }

    /// Current value of a device property
    pub fn property(&self, name: &str) -> Option<Value> {
        self.state.lock().properties.get(name).cloned()
    }

    /// Change a property on the device side without telling the client
    pub fn set_property(&self, name: &str, value: Value) {
        self.state.lock().properties.insert(name.to_string(), value);
    }

    /// Make `setState` ignore writes to `name` and always report `value`
    pub fn pin(&self, name: &str, value: Value) {
        let mut state = self.state.lock();
        state.properties.insert(name.to_string(), value.clone());
        state.pinned.insert(name.to_string(), value);
    }

    /// Answer `method` with `reply` instead of the built-in behavior
    pub fn reply(&self, method: &str, reply: Reply) {
        self.state.lock().replies.insert(method.to_string(), reply);
    }

    /// Restore the built-in behavior for `method`
    pub fn clear_reply(&self, method: &str) {
        self.state.lock().replies.remove(method);
    }

    /// Split every outgoing write into pieces of at most `size` bytes
    pub fn set_chunk_size(&self, size: Option<usize>) {
        self.state.lock().chunk_size = size;
    }

    /// Every request received, oldest first
    pub fn requests(&self) -> Vec<Request> {
        self.state.lock().requests.clone()
    }

    /// Requests for one method
    pub fn requests_for(&self, method: &str) -> Vec<Request> {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.method == method)
            .cloned()
            .collect()
    }

    /// Wait until at least `count` requests for `method` arrived
    pub async fn wait_requests(&self, method: &str, count: usize, max_wait: Duration) -> bool {
        wait_until(|| self.requests_for(method).len() >= count, max_wait).await
    }

    /// Push a property update notification to every client
    pub async fn push_update(&self, name: &str, value: Value) {
        let body = json!({"type": "update", "name": name, "value": value});
        self.push_raw(body.to_string().as_bytes()).await;
    }

    /// Write raw bytes to every client
    pub async fn push_raw(&self, bytes: &[u8]) {
        let (clients, chunk_size) = {
            let state = self.state.lock();
            (state.clients.clone(), state.chunk_size)
        };
        for client in clients {
            write_chunked(&client, bytes, chunk_size).await;
        }
    }

    /// Close every client connection
    pub async fn drop_connections(&self) {
        let clients = std::mem::take(&mut self.state.lock().clients);
        for client in clients {
            let _ = client.close().await;
        }
    }

    /// Stop the server explicitly (also happens on drop)
    pub fn stop(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.state.lock().clients.clear();
    }
}

impl Drop for FakeThermostat {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State the firmware boots with
pub fn default_device_state() -> Map<String, Value> {
    let state = json!({
        "tempPin1": 6, "tempPin2": 7, "ledPin": 13, "fanPin": 9,
        "fireplacePin": 10, "heatPin": 11, "coolPin": 12,
        "ledActive": false, "fireplaceActive": false, "fanActive": false,
        "heatActive": false, "coolActive": false,
        "fanPresent": true, "fireplacePresent": false, "heatPresent": true, "coolPresent": true,
        "hysteresisTemp": 0.6, "desiredTemp": 24.0,
        "insideTemp": 21.5, "insideHumidity": 45.0,
        "outsideTemp": 12.0, "outsideHumidity": 70.0,
        "wifiSsid": "thermo", "wifiPass": "", "wifiIp": "127.0.0.1",
        "heatMode": "furnace", "fanMode": "auto", "systemMode": "heat",
        "version": "1.0.0-fake"
    });
    match state {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

async fn serve(
    state: Arc<Mutex<FakeState>>,
    sender: Arc<TcpSender>,
    mut receiver: thermo_transport::TcpReceiver,
) {
    let mut reassembler = FrameReassembler::new();

    while let Some(event) = receiver.recv().await {
        let data = match event {
            TransportEvent::Data(data) => data,
            TransportEvent::Disconnected { .. } => break,
            _ => continue,
        };

        let messages = match reassembler.feed(&data) {
            Ok(messages) => messages,
            Err(_) => break,
        };

        for message in messages {
            let reply = match message {
                Message::Request(request) => handle_request(&state, request),
                _ => None,
            };
            if let Some(reply) = reply {
                let chunk_size = state.lock().chunk_size;
                write_chunked(&sender, reply.to_string().as_bytes(), chunk_size).await;
            }
        }
    }
}

async fn write_chunked(sender: &TcpSender, bytes: &[u8], chunk_size: Option<usize>) {
    let size = chunk_size.unwrap_or(bytes.len()).max(1);
    for chunk in bytes.chunks(size) {
        if sender.send(Bytes::copy_from_slice(chunk)).await.is_err() {
            return;
        }
    }
}

fn handle_request(state: &Mutex<FakeState>, request: Request) -> Option<Value> {
    let mut state = state.lock();
    state.requests.push(request.clone());
    let id = request.id;

    if let Some(reply) = state.replies.get(&request.method).cloned() {
        return match reply {
            Reply::Result(result) => Some(json!({"jsonrpc": "2.0", "id": id, "result": result})),
            Reply::Error(error) => Some(json!({"jsonrpc": "2.0", "id": id, "error": error})),
            Reply::Silent => None,
            Reply::WrongId(other, result) => {
                Some(json!({"jsonrpc": "2.0", "id": other, "result": result}))
            }
        };
    }

    let params = request.params.map(|p| p.into_value());
    let result = match request.method.as_str() {
        "getState" => Value::Object(state.properties.clone()),
        "setState" => {
            let Some(Value::Object(changes)) = params else {
                return Some(invalid_request(id));
            };
            let mut echo = Map::new();
            for (name, value) in changes {
                let applied = state.pinned.get(&name).cloned().unwrap_or(value);
                state.properties.insert(name.clone(), applied.clone());
                echo.insert(name, applied);
            }
            Value::Object(echo)
        }
        "getMeasuredTemp" => state
            .properties
            .get("insideTemp")
            .cloned()
            .unwrap_or(Value::Null),
        "toggleLed" => {
            let status = params
                .as_ref()
                .and_then(|p| p.get("status"))
                .and_then(Value::as_bool);
            let Some(status) = status else {
                return Some(invalid_request(id));
            };
            state
                .properties
                .insert("ledActive".to_string(), Value::Bool(status));
            Value::Null
        }
        _ => {
            return Some(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32601, "message": "Method not found."}
            }))
        }
    };

    Some(json!({"jsonrpc": "2.0", "id": id, "result": result}))
}

fn invalid_request(id: u64) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {"code": -32600, "message": "Invalid Request."}
    })
}

// ============================================================================
// Test Collectors - for verifying received values
// ============================================================================

/// Thread-safe collector for callback arguments
pub struct Collector<T> {
    values: Arc<Mutex<Vec<T>>>,
    count: Arc<AtomicU32>,
}

impl<T> Clone for Collector<T> {
    fn clone(&self) -> Self {
        Self {
            values: self.values.clone(),
            count: self.count.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Collector<T> {
    pub fn new() -> Self {
        Self {
            values: Arc::new(Mutex::new(Vec::new())),
            count: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Record one value
    pub fn push(&self, value: T) {
        self.values.lock().push(value);
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    /// Get the count of received values
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    /// Wait for at least n values to be received
    pub async fn wait_for_count(&self, n: u32, max_wait: Duration) -> bool {
        wait_for_count(&self.count, n, max_wait).await
    }

    /// Get all collected values
    pub fn values(&self) -> Vec<T> {
        self.values.lock().clone()
    }

    /// Get the last value received
    pub fn last(&self) -> Option<T> {
        self.values.lock().last().cloned()
    }

    /// Clear all collected values
    pub fn clear(&self) {
        self.values.lock().clear();
        self.count.store(0, Ordering::SeqCst);
    }
}

impl<T: Clone + Send + 'static> Default for Collector<T> {
    fn default() -> Self {
        Self::new()
    }
}

//! Protocol types and message definitions
//!
//! Every frame on the wire is a single JSON object. Its shape decides what it is:
//!
//! | shape                                  | kind         |
//! |----------------------------------------|--------------|
//! | `id` + `method`                        | request      |
//! | `id` + (`result` or `error`)           | response     |
//! | no `id` (or `id` of `0`/`null`)        | notification |
//!
//! Property updates pushed by the device are notifications of the form
//! `{"type": "update", "name": ..., "value": ..., "old": ...}`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result, JSONRPC_VERSION};

/// Request identifier. Allocated ids start at 1; 0 marks a notification.
pub type RequestId = u64;

/// Request parameters: positional or named, never both
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Params {
    Array(Vec<Value>),
    Object(Map<String, Value>),
}

impl Params {
    pub fn is_empty(&self) -> bool {
        match self {
            Params::Array(args) => args.is_empty(),
            Params::Object(kwargs) => kwargs.is_empty(),
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Params::Array(args) => Value::Array(args),
            Params::Object(kwargs) => Value::Object(kwargs),
        }
    }
}

impl From<Vec<Value>> for Params {
    fn from(args: Vec<Value>) -> Self {
        Params::Array(args)
    }
}

impl From<Map<String, Value>> for Params {
    fn from(kwargs: Map<String, Value>) -> Self {
        Params::Object(kwargs)
    }
}

fn default_version() -> String {
    JSONRPC_VERSION.to_string()
}

/// Request sent to the device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    pub method: String,
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Params>,
}

impl Request {
    pub fn new(method: impl Into<String>, id: RequestId) -> Self {
        Self {
            jsonrpc: default_version(),
            method: method.into(),
            id,
            params: None,
        }
    }

    /// Attach parameters. Empty parameter lists are left off the wire.
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = if params.is_empty() { None } else { Some(params) };
        self
    }
}

/// Response to a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Echoed id, kept verbatim: the firmware echoes whatever it was sent
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl Response {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            id: Value::from(id),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: RequestId, error: Value) -> Self {
        Self {
            id: Value::from(id),
            result: None,
            error: Some(error),
        }
    }

    /// The numeric id this response answers, if the peer echoed one
    pub fn request_id(&self) -> Option<RequestId> {
        self.id.as_u64().filter(|id| *id > 0)
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Split into the call outcome. A missing `result` is `null`.
    pub fn into_result(self) -> std::result::Result<Value, Value> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Unsolicited message from the device (no id)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Notification {
    body: Map<String, Value>,
}

/// Decoded `{"type": "update"}` notification
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyUpdate {
    pub name: String,
    pub value: Value,
    pub old: Option<Value>,
}

impl Notification {
    pub fn new(body: Map<String, Value>) -> Self {
        Self { body }
    }

    /// Build a property update notification
    pub fn update(name: &str, value: Value) -> Self {
        let mut body = Map::new();
        body.insert("type".into(), Value::from("update"));
        body.insert("name".into(), Value::from(name));
        body.insert("value".into(), value);
        Self { body }
    }

    pub fn method(&self) -> Option<&str> {
        self.body.get("method").and_then(Value::as_str)
    }

    pub fn params(&self) -> Option<&Value> {
        self.body.get("params")
    }

    /// The `type` discriminator used by property updates
    pub fn kind(&self) -> Option<&str> {
        self.body.get("type").and_then(Value::as_str)
    }

    pub fn as_update(&self) -> Option<PropertyUpdate> {
        if self.kind() != Some("update") {
            return None;
        }
        let name = self.body.get("name")?.as_str()?.to_string();
        let value = self.body.get("value").cloned().unwrap_or(Value::Null);
        Some(PropertyUpdate {
            name,
            value,
            old: self.body.get("old").cloned(),
        })
    }

    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.body)
    }
}

/// Protocol message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
    Request(Request),
    Response(Response),
    Notification(Notification),
}

impl Message {
    /// Classify a decoded JSON value by its shape
    pub fn from_value(value: Value) -> Result<Self> {
        let body = match value {
            Value::Object(body) => body,
            other => {
                return Err(Error::InvalidMessage(format!(
                    "expected a JSON object, got {}",
                    other
                )))
            }
        };

        if !body.get("id").map(carries_id).unwrap_or(false) {
            return Ok(Message::Notification(Notification::new(body)));
        }

        let is_response = body.contains_key("result")
            || body.contains_key("error")
            || !body.contains_key("method");

        if is_response {
            serde_json::from_value(Value::Object(body))
                .map(Message::Response)
                .map_err(|e| Error::InvalidMessage(e.to_string()))
        } else {
            serde_json::from_value(Value::Object(body))
                .map(Message::Request)
                .map_err(|e| Error::InvalidMessage(e.to_string()))
        }
    }

    pub fn is_notification(&self) -> bool {
        matches!(self, Message::Notification(_))
    }
}

impl From<Request> for Message {
    fn from(request: Request) -> Self {
        Message::Request(request)
    }
}

impl From<Response> for Message {
    fn from(response: Response) -> Self {
        Message::Response(response)
    }
}

impl From<Notification> for Message {
    fn from(notification: Notification) -> Self {
        Message::Notification(notification)
    }
}

/// An id of `null`, `0`, `false` or `""` does not correlate to a request
fn carries_id(id: &Value) -> bool {
    match id {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(n) => n.as_f64() != Some(0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_response() {
        let msg = Message::from_value(json!({"id": 1, "result": 21.5})).unwrap();
        match msg {
            Message::Response(resp) => {
                assert_eq!(resp.request_id(), Some(1));
                assert_eq!(resp.into_result(), Ok(json!(21.5)));
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_error_response() {
        let msg = Message::from_value(json!({
            "jsonrpc": "2.0",
            "id": 4,
            "error": {"code": -32601, "message": "Method not found."}
        }))
        .unwrap();
        let Message::Response(resp) = msg else {
            panic!("expected response");
        };
        assert!(resp.is_error());
        assert_eq!(resp.into_result().unwrap_err()["code"], json!(-32601));
    }

    #[test]
    fn test_response_without_result_is_null() {
        let msg = Message::from_value(json!({"jsonrpc": "2.0", "id": 2})).unwrap();
        let Message::Response(resp) = msg else {
            panic!("expected response");
        };
        assert_eq!(resp.into_result(), Ok(Value::Null));
    }

    #[test]
    fn test_classify_request() {
        let msg = Message::from_value(json!({"method": "getState", "id": 3})).unwrap();
        let Message::Request(req) = msg else {
            panic!("expected request");
        };
        assert_eq!(req.method, "getState");
        assert_eq!(req.id, 3);
        assert_eq!(req.jsonrpc, JSONRPC_VERSION);
    }

    #[test]
    fn test_zero_and_null_ids_are_notifications() {
        for id in [json!(0), json!(null)] {
            let msg = Message::from_value(json!({"id": id, "method": "tick"})).unwrap();
            assert!(msg.is_notification());
        }
    }

    #[test]
    fn test_string_id_is_uncorrelated_response() {
        let msg = Message::from_value(json!({"id": "nomethod", "error": {}})).unwrap();
        let Message::Response(resp) = msg else {
            panic!("expected response");
        };
        assert_eq!(resp.request_id(), None);
    }

    #[test]
    fn test_update_notification() {
        let msg = Message::from_value(json!({
            "type": "update",
            "name": "insideTemp",
            "old": 21.0,
            "value": 21.5
        }))
        .unwrap();
        let Message::Notification(note) = msg else {
            panic!("expected notification");
        };
        let update = note.as_update().unwrap();
        assert_eq!(update.name, "insideTemp");
        assert_eq!(update.value, json!(21.5));
        assert_eq!(update.old, Some(json!(21.0)));
    }

    #[test]
    fn test_method_notification_is_not_update() {
        let note = Notification::new(
            json!({"method": "log", "params": ["boot"]})
                .as_object()
                .cloned()
                .unwrap(),
        );
        assert_eq!(note.method(), Some("log"));
        assert_eq!(note.params(), Some(&json!(["boot"])));
        assert!(note.as_update().is_none());
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(matches!(
            Message::from_value(json!([1, 2])),
            Err(Error::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_empty_params_omitted() {
        let req = Request::new("getState", 1).with_params(Params::Array(vec![]));
        assert!(req.params.is_none());
        let req = Request::new("setState", 2).with_params(Params::Object(
            json!({"desiredTemp": 25.0}).as_object().cloned().unwrap(),
        ));
        assert!(req.params.is_some());
    }
}

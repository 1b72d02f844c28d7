use serde::{Deserialize, Serialize};
use serde_json::Value;

/// DAP request envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct DapRequest {
    pub seq: i64,
    #[serde(rename = "type")]
    pub r#type: String,
    pub command: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Response the editor sends back for one of our reverse requests.
#[derive(Debug, Clone, Deserialize)]
pub struct DapReverseResponse {
    pub request_seq: i64,
    pub command: String,
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// Any message coming from the editor.
#[derive(Debug, Clone)]
pub enum Incoming {
    Request(DapRequest),
    Response(DapReverseResponse),
}

impl Incoming {
    pub fn from_value(msg: Value) -> anyhow::Result<Self> {
        match msg.get("type").and_then(Value::as_str) {
            Some("response") => Ok(Incoming::Response(serde_json::from_value(msg)?)),
            _ => Ok(Incoming::Request(serde_json::from_value(msg)?)),
        }
    }
}

/// DAP response envelope.
///
/// Note: the DAP specification allows responses with no `body` field at all.
/// Using a `serde_json::Value` keeps the envelope stable and avoids type
/// inference issues around `None` bodies.
#[derive(Debug, Serialize)]
pub struct DapResponse {
    pub seq: i64,
    #[serde(rename = "type")]
    pub r#type: &'static str,
    pub request_seq: i64,
    pub success: bool,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// DAP event envelope.
#[derive(Debug, Serialize)]
pub struct DapEvent {
    pub seq: i64,
    #[serde(rename = "type")]
    pub r#type: &'static str,
    pub event: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// Request sent from the adapter to the editor (`runInTerminal`).
#[derive(Debug, Serialize)]
pub struct DapReverseRequest {
    pub seq: i64,
    #[serde(rename = "type")]
    pub r#type: &'static str,
    pub command: &'static str,
    pub arguments: Value,
}

use crate::error::Error;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use strum_macros::{AsRefStr, Display, EnumDiscriminants, EnumString};

/// Remote debugger method catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Method {
    Start,
    Step,
    Continue,
    Stop,
    Info,
    VerifyBreakpoints,
    UpdateVisualizer,
}

impl Serialize for Method {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_ref())
    }
}

/// Outbound call envelope.
#[derive(Debug, Serialize)]
pub struct Call<'a> {
    pub method: Method,
    pub params: &'a [Value],
}

/// Inbound envelope as it appears on the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    pub method: String,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

/// Validated inbound envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Result(Method, Value),
    Error(Method, Value),
}

impl Reply {
    pub fn method(&self) -> Method {
        match self {
            Reply::Result(method, _) | Reply::Error(method, _) => *method,
        }
    }

    /// True for a result that reports the remote process exit.
    pub fn is_exit(&self) -> bool {
        matches!(
            self,
            Reply::Result(_, result) if result.get("exited").and_then(Value::as_bool) == Some(true)
        )
    }
}

impl TryFrom<Envelope> for Reply {
    type Error = Error;

    fn try_from(envelope: Envelope) -> Result<Self, Error> {
        let method = Method::from_str(&envelope.method)
            .map_err(|_| Error::UnknownMethod(envelope.method.clone()))?;
        // `"result": null` counts as absent
        let result = envelope.result.filter(|v| !v.is_null());
        let error = envelope.error.filter(|v| !v.is_null());
        match (result, error) {
            (Some(result), None) => Ok(Reply::Result(method, result)),
            (None, Some(error)) => Ok(Reply::Error(method, error)),
            (None, None) => Err(Error::EmptyEnvelope(envelope.method)),
            (Some(_), Some(_)) => Err(Error::AmbiguousEnvelope(envelope.method)),
        }
    }
}

/// Why the link reports a failure.
#[derive(Debug, Clone, PartialEq)]
pub enum Failure {
    /// Socket refused, reset, closed or unreadable.
    Transport(String),
    /// The remote filled the `error` field of an envelope.
    Remote { method: Method, error: Value },
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Failure::Transport(reason) => write!(f, "transport failure: {reason}"),
            Failure::Remote { method, error } => write!(f, "remote `{method}` failed: {error}"),
        }
    }
}

/// Everything the link publishes to subscribers.
#[derive(Debug, Clone, PartialEq, EnumDiscriminants)]
#[strum_discriminants(name(EventKind), derive(Hash, Display))]
pub enum RemoteEvent {
    /// Socket is open, calls may be issued.
    Connected,
    Start {
        pid: Option<i32>,
    },
    Step(Value),
    Continue(Value),
    Stop(Value),
    Info(Value),
    VerifyBreakpoints(Value),
    UpdateVisualizer(Value),
    Exited,
    Error(Failure),
}

impl RemoteEvent {
    /// Translate a result nobody was waiting for into an event.
    pub fn from_result(method: Method, result: Value) -> Self {
        match method {
            Method::Start => RemoteEvent::Start {
                pid: StartResult::pid_of(&result),
            },
            Method::Step => RemoteEvent::Step(result),
            Method::Continue => RemoteEvent::Continue(result),
            Method::Stop => RemoteEvent::Stop(result),
            Method::Info => RemoteEvent::Info(result),
            Method::VerifyBreakpoints => RemoteEvent::VerifyBreakpoints(result),
            Method::UpdateVisualizer => RemoteEvent::UpdateVisualizer(result),
        }
    }
}

/// `start` result: the bare pid or `{"pid": N}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum StartResult {
    Pid(i32),
    Object { pid: i32 },
}

impl StartResult {
    pub fn pid_of(result: &Value) -> Option<i32> {
        match serde_json::from_value::<StartResult>(result.clone()).ok()? {
            StartResult::Pid(pid) | StartResult::Object { pid } => Some(pid),
        }
    }
}

/// `verify_breakpoints` result: `[echoed_breakpoints, locations]` or bare `locations`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum VerifyResult {
    Echoed(Vec<Value>, Vec<i64>),
    Locations(Vec<i64>),
}

impl VerifyResult {
    pub fn into_locations(self) -> Vec<i64> {
        match self {
            VerifyResult::Echoed(_, locations) | VerifyResult::Locations(locations) => locations,
        }
    }
}

/// `info` result.
#[derive(Debug, Clone, Deserialize)]
pub struct InfoResult {
    pub program: ProgramSnapshot,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SourceLine {
    pub filename: String,
    pub lineno: i64,
    #[serde(default)]
    pub line: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Label {
    #[serde(default, alias = "type")]
    pub kind: Option<String>,
    pub value: i64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MemoryDump {
    #[serde(default)]
    pub stack: String,
    #[serde(default)]
    pub heap: String,
    #[serde(default)]
    pub data: String,
}

/// Program state as reported by `info`. Read-only once received.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProgramSnapshot {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub labels: IndexMap<String, Label>,
    #[serde(default)]
    pub source: Vec<SourceLine>,
    #[serde(default)]
    pub memory: MemoryDump,
    #[serde(default)]
    pub registers: IndexMap<String, i64>,
}

impl ProgramSnapshot {
    /// Source line the program counter points at.
    pub fn current_line(&self) -> Option<&SourceLine> {
        let pc = *self.registers.get("pc")?;
        self.source.get(usize::try_from(pc).ok()?)
    }
}

//! Session wire protocol of the test generator: inbound commands, outbound
//! events and the synthetic reading format.

use serde::Serialize;
use serde_json::{Map, Number, Value};

pub const STATION_FIELD: &str = "stationIdentifier";
pub const TIMESTAMP_FIELD: &str = "currentUnixTimeSeconds";

pub const MSG_CONNECTED: &str = "Connection established with the server.";
pub const MSG_NO_STATIONS: &str = "No station selected.";
pub const MSG_STARTED: &str = "Simulation started.";
pub const MSG_STOPPED: &str = "Simulation stopped.";
pub const MSG_BROKER_DISCONNECTED: &str = "MQTT client disconnected.";
pub const MSG_UNKNOWN_ACTION: &str = "Unknown action.";
pub const MSG_INVALID_PAYLOAD: &str = "Invalid payload received.";

/// Event pushed to one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SessionEvent {
    Info { message: String },
    Status { message: String },
    Log { message: String },
}

impl SessionEvent {
    pub fn info(message: impl Into<String>) -> Self {
        Self::Info { message: message.into() }
    }

    pub fn status(message: impl Into<String>) -> Self {
        Self::Status { message: message.into() }
    }

    pub fn log(message: impl Into<String>) -> Self {
        Self::Log { message: message.into() }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Info { message } | Self::Status { message } | Self::Log { message } => message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StartRequest {
    pub stations: Vec<String>,
    pub params: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    Start(StartRequest),
    Stop,
    Unknown(Option<String>),
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("invalid session payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
    #[error("session payload is null")]
    NullPayload,
}

/// Parses one inbound session message. Non-JSON text and a bare `null` are
/// errors; any other JSON maps to a command, possibly `Unknown`.
pub fn parse_command(raw: &str) -> Result<SessionCommand, CommandError> {
    let value: Value = serde_json::from_str(raw)?;
    if value.is_null() {
        return Err(CommandError::NullPayload);
    }
    let action = value.get("action").and_then(Value::as_str);

    Ok(match action {
        Some("start") => SessionCommand::Start(parse_start(value.get("payload"))),
        Some("stop") => SessionCommand::Stop,
        other => SessionCommand::Unknown(other.map(str::to_string)),
    })
}

fn parse_start(payload: Option<&Value>) -> StartRequest {
    let stations = payload
        .and_then(|p| p.get("stations"))
        .and_then(Value::as_array)
        .map(|items| items.iter().map(station_id).collect())
        .unwrap_or_default();

    let params = payload
        .and_then(|p| p.get("params"))
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    StartRequest { stations, params }
}

fn station_id(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Coerces every param to a number and keeps the finite ones
pub fn sanitize_params(raw: &Map<String, Value>) -> Map<String, Value> {
    raw.iter()
        .filter_map(|(key, value)| coerce_number(value).map(|n| (key.clone(), numeric_value(n))))
        .collect()
}

/// Conversion numérique façon `Number(value)` : null → 0, booléens → 0/1,
/// texte vide → 0, objets → NaN
fn coerce_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Null => 0.0,
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => parse_numeric_text(s)?,
        Value::Array(_) => parse_numeric_text(&array_text(value))?,
        Value::Object(_) => return None,
    };
    n.is_finite().then_some(n)
}

fn parse_numeric_text(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Some(0.0);
    }
    for (prefix, radix) in [("0x", 16), ("0X", 16), ("0o", 8), ("0O", 8), ("0b", 2), ("0B", 2)] {
        if let Some(digits) = trimmed.strip_prefix(prefix) {
            return u64::from_str_radix(digits, radix).ok().map(|v| v as f64);
        }
    }
    trimmed.parse::<f64>().ok()
}

// un tableau se convertit via son texte : éléments joints par ",", null → ""
fn array_text(value: &Value) -> String {
    match value {
        Value::Array(items) => items.iter().map(array_text).collect::<Vec<_>>().join(","),
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Object(_) => "[object Object]".to_string(),
        other => other.to_string(),
    }
}

// 2^53: au-delà, un f64 n'est plus un entier exact
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

fn numeric_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        Value::from(n as i64)
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Builds one synthetic reading: params ∪ {station, timestamp}
pub fn synthesize_reading(params: &Map<String, Value>, station: &str, unix_seconds: i64) -> Map<String, Value> {
    let mut reading = params.clone();
    reading.insert(STATION_FIELD.to_string(), Value::String(station.to_string()));
    reading.insert(TIMESTAMP_FIELD.to_string(), Value::from(unix_seconds));
    reading
}

pub fn log_line(topic: &str, serialized: &str) -> String {
    format!("[{topic}] {serialized}")
}

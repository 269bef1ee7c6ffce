//! Event records carried by batching sinks.
//!
//! One [`EventRecord`] describes either a log line (severity `DEBUG`..`ERROR`) or an outbound
//! notification about something a user did (severity `ACTION`). Records are built at the call
//! site and never change afterwards; the builder methods consume and return the value.

use crate::sink::EncodedRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Severity or category of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
    /// Notification about a user action rather than a log line.
    Action,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Action => "ACTION",
        }
    }

    /// Case-insensitive parse of a severity name.
    pub fn parse(s: &str) -> Result<Self, ParseSeverityError> {
        s.parse()
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown severity: {0}")]
pub struct ParseSeverityError(String);

impl FromStr for Severity {
    type Err = ParseSeverityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(Severity::Debug),
            "INFO" => Ok(Severity::Info),
            "WARN" | "WARNING" => Ok(Severity::Warn),
            "ERROR" => Ok(Severity::Error),
            "ACTION" => Ok(Severity::Action),
            _ => Err(ParseSeverityError(s.to_string())),
        }
    }
}

/// Failure to turn a record into bytes.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("failed to serialize record: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to encode record: {0}")]
    Other(String),
}

/// Anything a batching sink can carry.
///
/// Encoding happens on the sink's worker at flush time, never on the producer's task.
pub trait Record: Send + 'static {
    fn encode(&self) -> Result<EncodedRecord, EncodeError>;
}

/// Request metadata attached to a user-action notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionContext {
    pub ip: String,
    pub method: String,
    pub path: String,
    pub user_agent: String,
}

/// Immutable description of one log line or one outbound notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    timestamp: DateTime<Utc>,
    #[serde(rename = "level")]
    severity: Severity,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    service: String,
    #[serde(rename = "module")]
    source: String,
    event: String,
    detail: Value,
    #[serde(rename = "user_id", default, skip_serializing_if = "Option::is_none")]
    subject_id: Option<i64>,
}

impl EventRecord {
    /// Record stamped with the current time.
    pub fn new(
        severity: Severity,
        source: impl Into<String>,
        event: impl Into<String>,
        detail: impl Into<Value>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            severity,
            service: String::new(),
            source: source.into(),
            event: event.into(),
            detail: detail.into(),
            subject_id: None,
        }
    }

    pub fn debug(source: impl Into<String>, event: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::new(Severity::Debug, source, event, Value::String(msg.into()))
    }

    pub fn info(source: impl Into<String>, event: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::new(Severity::Info, source, event, Value::String(msg.into()))
    }

    pub fn warn(source: impl Into<String>, event: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::new(Severity::Warn, source, event, Value::String(msg.into()))
    }

    pub fn error(source: impl Into<String>, event: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::new(Severity::Error, source, event, Value::String(msg.into()))
    }

    /// Notification record with a structured payload.
    pub fn action(source: impl Into<String>, action: impl Into<String>, payload: Value) -> Self {
        Self::new(Severity::Action, source, action, payload)
    }

    /// Notification that `user_id` performed `action` on `resource_id` during a request.
    pub fn user_action(
        service: impl Into<String>,
        user_id: i64,
        action: impl Into<String>,
        resource_id: i64,
        ctx: &ActionContext,
    ) -> Self {
        let action = action.into();
        let payload = serde_json::json!({
            "action": action.clone(),
            "resource": resource_id,
            "ip": ctx.ip,
            "method": ctx.method,
            "path": ctx.path,
            "user_agent": ctx.user_agent,
        });
        Self::action("http", action, payload).with_service(service).with_subject(user_id)
    }

    pub fn with_subject(mut self, subject_id: i64) -> Self {
        self.subject_id = Some(subject_id);
        self
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    /// Attach a structured field. A plain-string detail becomes `{"message": ..}` first.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut map = match std::mem::take(&mut self.detail) {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("message".to_string(), other);
                map
            }
        };
        map.insert(key.into(), value.into());
        self.detail = Value::Object(map);
        self
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn detail(&self) -> &Value {
        &self.detail
    }

    /// Plain-text message, if the detail is a string or carries a `message` field.
    pub fn message(&self) -> Option<&str> {
        match &self.detail {
            Value::String(s) => Some(s),
            Value::Object(map) => map.get("message").and_then(Value::as_str),
            _ => None,
        }
    }

    pub fn subject_id(&self) -> Option<i64> {
        self.subject_id
    }
}

impl Record for EventRecord {
    fn encode(&self) -> Result<EncodedRecord, EncodeError> {
        let payload = serde_json::to_vec(self)?;
        Ok(match self.subject_id {
            Some(id) => EncodedRecord::keyed(id.to_string().into_bytes(), payload),
            None => EncodedRecord::new(payload),
        })
    }
}

//! Event model
//!
//! Events are immutable facts. Their `properties` and `context` bags are
//! caller-defined, so they are kept as ordered JSON maps rather than structs.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Ordered JSON property bag
pub type Properties = serde_json::Map<String, Value>;

/// Name of the events table in every backend
pub const EVENTS_TABLE: &str = "events";

/// Project assigned to events that do not name one
pub const DEFAULT_PROJECT: &str = "default";

/// Column names of the events table
pub mod columns {
    pub const EVENT: &str = "event";
    pub const DISTINCT_ID: &str = "distinct_id";
    pub const ANONYMOUS_ID: &str = "anonymous_id";
    pub const TIMESTAMP: &str = "timestamp";
    pub const RECEIVED_AT: &str = "received_at";
    pub const PROPERTIES: &str = "properties";
    pub const CONTEXT: &str = "context";
    pub const PROJECT_ID: &str = "project_id";
    pub const SESSION_ID: &str = "session_id";

    /// All columns in storage order
    pub const ALL: &[&str] = &[
        EVENT,
        DISTINCT_ID,
        ANONYMOUS_ID,
        TIMESTAMP,
        RECEIVED_AT,
        PROPERTIES,
        CONTEXT,
        PROJECT_ID,
        SESSION_ID,
    ];
}

/// A single behavioral event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event name (e.g. `pageview`)
    pub event: String,
    /// Stable user identifier
    pub distinct_id: String,
    /// Pre-identification identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anonymous_id: Option<String>,
    /// When the event happened
    pub timestamp: DateTime<Utc>,
    /// When the event reached the backend
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
    /// Caller-defined properties
    #[serde(default)]
    pub properties: Properties,
    /// Client context (browser, os, sdk...)
    #[serde(default)]
    pub context: Properties,
    /// Owning project
    #[serde(default = "default_project")]
    pub project_id: String,
    /// Session identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

fn default_project() -> String {
    DEFAULT_PROJECT.to_string()
}

impl Event {
    /// Create an event with empty property bags
    pub fn new(
        event: impl Into<String>,
        distinct_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event: event.into(),
            distinct_id: distinct_id.into(),
            anonymous_id: None,
            timestamp,
            received_at: timestamp,
            properties: Properties::new(),
            context: Properties::new(),
            project_id: default_project(),
            session_id: None,
        }
    }

    /// Set a single property
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Set the session id
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Set the project id
    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = project_id.into();
        self
    }
}

/// Milliseconds since the Unix epoch
pub fn to_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

/// Format an instant the way ClickHouse reads and writes `DateTime64(3)`
pub fn format_clickhouse_datetime(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

/// Decode a timestamp cell from any backend
///
/// Polars returns epoch milliseconds, ClickHouse returns `DateTime64` text.
/// RFC 3339 strings are accepted as well.
pub fn decode_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(DateTime::from_timestamp_millis),
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        }
        _ => None,
    }
}

/// Decode a JSON property bag stored as text
///
/// Malformed or missing bags decode as empty; events are caller-shaped and
/// a bad bag must not hide the rest of the row.
pub fn decode_properties(value: &Value) -> Properties {
    match value {
        Value::Object(map) => map.clone(),
        Value::String(s) => serde_json::from_str::<Properties>(s).unwrap_or_default(),
        _ => Properties::new(),
    }
}

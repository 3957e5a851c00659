//! Bound queries
//!
//! SQL text carries named, typed placeholders in ClickHouse syntax
//! (`{name:Type}`) and the values travel next to it. ClickHouse binds them
//! server-side from `param_<name>` URL parameters; the Polars backend renders
//! them into escaped literals right before execution.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::error::QueryError;
use crate::event::format_clickhouse_datetime;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*):([^{}]+)\}").expect("placeholder pattern is valid")
});

/// A typed query parameter value
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// UTF-8 string
    String(String),
    /// Signed 64-bit integer
    Int(i64),
    /// Instant with millisecond precision
    DateTime(DateTime<Utc>),
}

impl ParamValue {
    /// ClickHouse type used in the placeholder
    pub fn clickhouse_type(&self) -> &'static str {
        match self {
            Self::String(_) => "String",
            Self::Int(_) => "Int64",
            Self::DateTime(_) => "DateTime64(3, 'UTC')",
        }
    }

    /// Value as sent in a `param_<name>` URL parameter (escaped TSV form)
    pub fn to_clickhouse(&self) -> String {
        match self {
            Self::String(s) => escape_tsv(s),
            Self::Int(i) => i.to_string(),
            Self::DateTime(dt) => format_clickhouse_datetime(*dt),
        }
    }

    /// Value rendered as a SQL literal
    ///
    /// Instants become epoch milliseconds, matching the local store's
    /// `Int64` timestamp columns.
    pub fn to_sql_literal(&self) -> String {
        match self {
            Self::String(s) => format!("'{}'", s.replace('\'', "''")),
            Self::Int(i) => i.to_string(),
            Self::DateTime(dt) => dt.timestamp_millis().to_string(),
        }
    }

    /// String value, if this is a string parameter
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Instant value, if this is a datetime parameter
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<DateTime<Utc>> for ParamValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::DateTime(value)
    }
}

/// Placeholder text for a named parameter, e.g. `{from:DateTime64(3, 'UTC')}`
pub fn placeholder(name: &str, value: &ParamValue) -> String {
    format!("{{{}:{}}}", name, value.clickhouse_type())
}

/// SQL text plus the values for its placeholders
#[derive(Debug, Clone, PartialEq)]
pub struct BoundQuery {
    sql: String,
    params: Vec<(String, ParamValue)>,
}

impl BoundQuery {
    /// Create a query with no parameters
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Bind a named parameter
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.push_param(name, value);
        self
    }

    /// Bind a named parameter in place, replacing an earlier value of the same name
    pub fn push_param(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        let name = name.into();
        let value = value.into();
        match self.params.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.params.push((name, value)),
        }
    }

    /// The SQL text with placeholders
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// All bound parameters in binding order
    pub fn params(&self) -> &[(String, ParamValue)] {
        &self.params
    }

    /// Look up a bound parameter by name
    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Render the SQL with every placeholder replaced by an escaped literal
    ///
    /// Fails if the text references a parameter that was never bound.
    pub fn render_inline(&self) -> Result<String, QueryError> {
        let mut missing = None;
        let rendered = PLACEHOLDER.replace_all(&self.sql, |caps: &regex::Captures| {
            match self.param(&caps[1]) {
                Some(value) => value.to_sql_literal(),
                None => {
                    missing.get_or_insert_with(|| caps[1].to_string());
                    String::new()
                }
            }
        });

        match missing {
            Some(name) => Err(QueryError::UnboundParameter(name)),
            None => Ok(rendered.into_owned()),
        }
    }
}

/// Escape a value for ClickHouse's escaped (TSV) parameter format
fn escape_tsv(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out
}

//! Reading event rows back out of query results

use chrono::{DateTime, Utc};
use minihog_query::event::{columns, decode_properties, decode_timestamp};
use minihog_query::{Properties, QueryBackend, QueryResult};
use serde_json::Value;

use crate::builder::{event_rows_query, USER_CHUNK_SIZE};
use crate::error::{AnalyticsError, Result};
use crate::timerange::TimeRange;

/// One event occurrence as the engines see it
#[derive(Debug, Clone, PartialEq)]
pub struct EventRow {
    pub distinct_id: String,
    pub timestamp: DateTime<Utc>,
    pub properties: Properties,
}

/// What to fetch
#[derive(Debug, Clone, Copy)]
pub struct RowRequest<'a> {
    pub range: &'a TimeRange,
    /// Event name, `None` for any event
    pub event: Option<&'a str>,
    pub with_properties: bool,
}

/// Fetch every matching occurrence in the range
pub async fn fetch_rows(
    backend: &dyn QueryBackend,
    request: RowRequest<'_>,
) -> Result<Vec<EventRow>> {
    let query = event_rows_query::<&str>(
        request.range,
        request.event,
        None,
        request.with_properties,
    );
    let result = backend.execute(&query).await?;
    decode_rows(&result)
}

/// Fetch matching occurrences for a known set of users
///
/// User ids are bound in chunks so no single statement carries an
/// unbounded parameter list. An empty user set issues no query.
pub async fn fetch_rows_for_users(
    backend: &dyn QueryBackend,
    request: RowRequest<'_>,
    users: &[String],
) -> Result<Vec<EventRow>> {
    let mut rows = Vec::new();
    for chunk in users.chunks(USER_CHUNK_SIZE) {
        let query = event_rows_query(
            request.range,
            request.event,
            Some(chunk),
            request.with_properties,
        );
        let result = backend.execute(&query).await?;
        rows.extend(decode_rows(&result)?);
    }
    Ok(rows)
}

/// Decode `distinct_id`, `timestamp` and (optional) `properties` columns
pub fn decode_rows(result: &QueryResult) -> Result<Vec<EventRow>> {
    if result.is_empty() {
        return Ok(Vec::new());
    }

    let id_idx = required_column(result, columns::DISTINCT_ID)?;
    let ts_idx = required_column(result, columns::TIMESTAMP)?;
    let props_idx = result.column_index(columns::PROPERTIES);

    result
        .rows
        .iter()
        .map(|row| {
            let distinct_id = match row.get(id_idx) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                other => {
                    return Err(AnalyticsError::MalformedRow(format!(
                        "distinct_id is not a string: {:?}",
                        other
                    )))
                }
            };

            let timestamp = row
                .get(ts_idx)
                .and_then(decode_timestamp)
                .ok_or_else(|| {
                    AnalyticsError::MalformedRow(format!(
                        "unreadable timestamp for {}: {:?}",
                        distinct_id,
                        row.get(ts_idx)
                    ))
                })?;

            let properties = props_idx
                .and_then(|idx| row.get(idx))
                .map(decode_properties)
                .unwrap_or_default();

            Ok(EventRow {
                distinct_id,
                timestamp,
                properties,
            })
        })
        .collect()
}

/// Read a count cell; ClickHouse may send 64-bit integers as strings
pub fn decode_count(value: Option<&Value>) -> Result<u64> {
    match value {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .ok_or_else(|| AnalyticsError::MalformedRow(format!("invalid count: {}", n))),
        Some(Value::String(s)) => s
            .parse()
            .map_err(|_| AnalyticsError::MalformedRow(format!("invalid count: {}", s))),
        Some(other) => Err(AnalyticsError::MalformedRow(format!(
            "invalid count: {}",
            other
        ))),
    }
}

fn required_column(result: &QueryResult, name: &str) -> Result<usize> {
    result
        .column_index(name)
        .ok_or_else(|| AnalyticsError::MalformedRow(format!("missing column: {}", name)))
}

//! Test backends for engine tests
//!
//! [`FakeEventStore`] answers the raw-row queries the engines issue by
//! filtering an in-memory event list with the query's bound parameters, so
//! engine tests exercise the real SQL builder without a database.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use minihog_query::{
    BoundQuery, Column, DataType, Event, QueryBackend, QueryError, QueryResult, TableInfo,
};
use serde_json::Value;

/// Fixed reference instant used across engine tests (Monday 2024-01-01 00:00 UTC)
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// `t0` plus a number of hours
pub fn at_hours(hours: i64) -> DateTime<Utc> {
    t0() + Duration::hours(hours)
}

/// `t0` plus a number of days
pub fn at_days(days: i64) -> DateTime<Utc> {
    t0() + Duration::days(days)
}

/// Build an event
pub fn event(name: &str, user: &str, ts: DateTime<Utc>) -> Event {
    Event::new(name, user, ts)
}

/// Backend that evaluates row queries against an event list
#[derive(Default)]
pub struct FakeEventStore {
    events: Vec<Event>,
    queries: Mutex<Vec<BoundQuery>>,
    fail: bool,
}

impl FakeEventStore {
    pub fn new(events: Vec<Event>) -> Self {
        Self {
            events,
            ..Default::default()
        }
    }

    /// A store whose every query fails
    pub fn unavailable() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// Queries received so far
    pub fn queries(&self) -> Vec<BoundQuery> {
        self.queries.lock().unwrap().clone()
    }

    fn matches(&self, query: &BoundQuery, event: &Event) -> bool {
        if let Some(from) = query.param("from").and_then(|v| v.as_datetime()) {
            if event.timestamp < from {
                return false;
            }
        }
        if let Some(to) = query.param("to").and_then(|v| v.as_datetime()) {
            if event.timestamp > to {
                return false;
            }
        }
        if let Some(name) = query.param("event").and_then(|v| v.as_str()) {
            if event.event != name {
                return false;
            }
        }

        let users: Vec<&str> = query
            .params()
            .iter()
            .filter(|(name, _)| {
                name.strip_prefix('u')
                    .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
            })
            .filter_map(|(_, value)| value.as_str())
            .collect();
        if query.sql().contains("distinct_id IN") && !users.contains(&event.distinct_id.as_str()) {
            return false;
        }

        true
    }
}

#[async_trait]
impl QueryBackend for FakeEventStore {
    async fn execute(&self, query: &BoundQuery) -> Result<QueryResult, QueryError> {
        self.queries.lock().unwrap().push(query.clone());

        if self.fail {
            return Err(QueryError::Connection("store offline".to_string()));
        }

        let columns = vec![
            Column::new("event", DataType::String, false),
            Column::new("distinct_id", DataType::String, false),
            Column::new("timestamp", DataType::Timestamp, false),
            Column::new("properties", DataType::String, false),
        ];

        if query.sql().contains("1 = 0") {
            return Ok(QueryResult::new(columns, Vec::new(), 0));
        }

        let rows = self
            .events
            .iter()
            .filter(|e| self.matches(query, e))
            .map(|e| {
                vec![
                    Value::String(e.event.clone()),
                    Value::String(e.distinct_id.clone()),
                    Value::from(e.timestamp.timestamp_millis()),
                    Value::String(serde_json::to_string(&e.properties).unwrap()),
                ]
            })
            .collect();

        Ok(QueryResult::new(columns, rows, 0))
    }

    async fn health_check(&self) -> Result<(), QueryError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "fake"
    }

    async fn list_tables(&self) -> Result<Vec<TableInfo>, QueryError> {
        Ok(vec![TableInfo::new("events")])
    }
}

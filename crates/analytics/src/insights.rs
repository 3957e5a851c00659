//! Insights engine
//!
//! Dashboard queries over the event store:
//!
//! - **trends**: event counts per calendar bucket
//! - **active users**: DAU, WAU and MAU over trailing windows
//! - **top events**: event names ranked by volume
//! - **events**: paginated raw event listing

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use minihog_query::event::{columns, decode_properties, decode_timestamp};
use minihog_query::{Properties, QueryBackend, QueryResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::builder::{
    count_events_query, distinct_users_query, list_events_query, top_events_query,
    trends_query, EventListFilter,
};
use crate::error::{AnalyticsError, Result};
use crate::format::percentage;
use crate::rows::decode_count;
use crate::timerange::{Interval, TimeRange};
use crate::timeseries::{TimeSeriesData, TimeSeriesPoint};

/// Largest page or ranking size a query may ask for
pub const MAX_LIMIT: u32 = 1000;

/// Window for trends and event listings when none is given
pub const DEFAULT_PERIOD: &str = "7d";

/// Window for top events when no bounds are given
pub const DEFAULT_TOP_EVENTS_PERIOD: &str = "30d";

const DEFAULT_TOP_EVENTS_LIMIT: u32 = 10;
const DEFAULT_PAGE_SIZE: u32 = 20;

fn check_limit(limit: u32) -> Result<()> {
    if limit == 0 || limit > MAX_LIMIT {
        return Err(AnalyticsError::OutOfRange(format!(
            "limit must be between 1 and {}, got {}",
            MAX_LIMIT, limit
        )));
    }
    Ok(())
}

/// Trends query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendsQuery {
    #[serde(default)]
    pub event_name: Option<String>,
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
    #[serde(default = "default_period")]
    pub period: String,
    #[serde(default = "default_interval")]
    pub interval: Interval,
}

fn default_period() -> String {
    DEFAULT_PERIOD.to_string()
}

fn default_interval() -> Interval {
    Interval::Day
}

impl Default for TrendsQuery {
    fn default() -> Self {
        Self {
            event_name: None,
            from: None,
            to: None,
            period: default_period(),
            interval: default_interval(),
        }
    }
}

/// Trends result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendsResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
    pub period: String,
    pub interval: Interval,
    pub series: Vec<TimeSeriesPoint>,
    pub total: u64,
}

/// Active user counts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveUsersResponse {
    pub dau: u64,
    pub wau: u64,
    pub mau: u64,
    pub calculated_at: DateTime<Utc>,
}

/// Top events query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopEventsQuery {
    #[serde(default = "default_top_events_limit")]
    pub limit: u32,
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
}

fn default_top_events_limit() -> u32 {
    DEFAULT_TOP_EVENTS_LIMIT
}

impl Default for TopEventsQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_TOP_EVENTS_LIMIT,
            from: None,
            to: None,
        }
    }
}

/// One ranked event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopEvent {
    pub event: String,
    pub count: u64,
    /// Share of the listed total
    pub percentage: f64,
}

/// Top events result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopEventsResponse {
    pub events: Vec<TopEvent>,
    pub total_events: u64,
    /// Default window applied, when the query did not bound both ends
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
}

/// Event listing query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_page_size")]
    pub limit: u32,
    #[serde(default)]
    pub event_name: Option<String>,
    #[serde(default)]
    pub distinct_id: Option<String>,
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub period: Option<String>,
}

fn default_page() -> u64 {
    1
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

impl Default for EventsQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_SIZE,
            event_name: None,
            distinct_id: None,
            from: None,
            to: None,
            period: None,
        }
    }
}

/// One stored event as listed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    pub event: String,
    pub distinct_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anonymous_id: Option<String>,
    pub properties: Properties,
    pub context: Properties,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// One page of events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventsListResponse {
    pub events: Vec<EventRecord>,
    pub total: u64,
    pub page: u64,
    pub limit: u32,
    pub total_pages: u64,
}

/// Insights engine
pub struct InsightsEngine {
    backend: Arc<dyn QueryBackend>,
}

impl InsightsEngine {
    pub fn new(backend: Arc<dyn QueryBackend>) -> Self {
        Self { backend }
    }

    /// Event counts per interval bucket
    pub async fn trends(&self, query: &TrendsQuery) -> Result<TrendsResponse> {
        let range = TimeRange::resolve(query.from, query.to, Some(&query.period), DEFAULT_PERIOD)?;

        let result = self
            .backend
            .execute(&trends_query(
                &range,
                query.event_name.as_deref(),
                query.interval,
                self.backend.dialect(),
            ))
            .await?;

        let mut counts = Vec::with_capacity(result.rows.len());
        for row in 0..result.rows.len() {
            let start = result
                .value(row, "bucket")
                .and_then(decode_timestamp)
                .ok_or_else(|| {
                    AnalyticsError::MalformedRow(format!(
                        "unreadable bucket start: {:?}",
                        result.value(row, "bucket")
                    ))
                })?;
            counts.push((start, decode_count(result.value(row, "total"))?));
        }

        let series = TimeSeriesData::from_counts(counts, query.interval);
        tracing::debug!(
            buckets = series.len(),
            total = series.total,
            interval = %query.interval,
            "trends calculated"
        );

        Ok(TrendsResponse {
            event_name: query.event_name.clone(),
            period: query.period.clone(),
            interval: query.interval,
            total: series.total,
            series: series.points,
        })
    }

    /// Distinct users over the trailing 1, 7 and 30 days before `now`
    pub async fn active_users(&self, now: DateTime<Utc>) -> Result<ActiveUsersResponse> {
        Ok(ActiveUsersResponse {
            dau: self.distinct_users_since(now, Duration::days(1)).await?,
            wau: self.distinct_users_since(now, Duration::days(7)).await?,
            mau: self.distinct_users_since(now, Duration::days(30)).await?,
            calculated_at: now,
        })
    }

    async fn distinct_users_since(&self, now: DateTime<Utc>, window: Duration) -> Result<u64> {
        let range = TimeRange::new(now - window, now)?;
        let result = self.backend.execute(&distinct_users_query(&range)).await?;
        decode_count(result.value(0, "users"))
    }

    /// Event names ranked by count
    pub async fn top_events(&self, query: &TopEventsQuery) -> Result<TopEventsResponse> {
        check_limit(query.limit)?;

        let period = match (query.from, query.to) {
            (Some(_), Some(_)) => None,
            _ => Some(DEFAULT_TOP_EVENTS_PERIOD.to_string()),
        };
        let range = TimeRange::resolve(query.from, query.to, None, DEFAULT_TOP_EVENTS_PERIOD)?;

        let result = self
            .backend
            .execute(&top_events_query(&range, query.limit))
            .await?;

        let mut ranked = Vec::with_capacity(result.rows.len());
        for row in 0..result.rows.len() {
            let event = text(&result, row, columns::EVENT).unwrap_or_default();
            let count = decode_count(result.value(row, "total"))?;
            ranked.push((event, count));
        }

        let total_events: u64 = ranked.iter().map(|(_, count)| count).sum();
        let events = ranked
            .into_iter()
            .map(|(event, count)| TopEvent {
                event,
                count,
                percentage: percentage(count as f64, total_events as f64),
            })
            .collect();

        Ok(TopEventsResponse {
            events,
            total_events,
            period,
        })
    }

    /// One page of raw events, newest first
    pub async fn events(&self, query: &EventsQuery) -> Result<EventsListResponse> {
        check_limit(query.limit)?;
        if query.page == 0 {
            return Err(AnalyticsError::InvalidInput(
                "page numbers start at 1".to_string(),
            ));
        }

        let range = TimeRange::resolve(
            query.from,
            query.to,
            query.period.as_deref(),
            DEFAULT_PERIOD,
        )?;
        let filter = EventListFilter {
            event: query.event_name.as_deref(),
            distinct_id: query.distinct_id.as_deref(),
        };

        let counted = self
            .backend
            .execute(&count_events_query(&range, &filter))
            .await?;
        let total = decode_count(counted.value(0, "total"))?;

        let offset = (query.page - 1).saturating_mul(u64::from(query.limit));
        let page = self
            .backend
            .execute(&list_events_query(&range, &filter, query.limit, offset))
            .await?;

        let events = (0..page.rows.len())
            .map(|row| decode_record(&page, row))
            .collect::<Result<Vec<_>>>()?;

        Ok(EventsListResponse {
            events,
            total,
            page: query.page,
            limit: query.limit,
            total_pages: total.div_ceil(u64::from(query.limit)),
        })
    }
}

fn text(result: &QueryResult, row: usize, column: &str) -> Option<String> {
    match result.value(row, column)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn decode_record(result: &QueryResult, row: usize) -> Result<EventRecord> {
    let timestamp = result
        .value(row, columns::TIMESTAMP)
        .and_then(decode_timestamp)
        .ok_or_else(|| AnalyticsError::MalformedRow(format!("unreadable timestamp in row {}", row)))?;

    let bag = |column: &str| {
        result
            .value(row, column)
            .map(decode_properties)
            .unwrap_or_default()
    };

    Ok(EventRecord {
        timestamp,
        event: text(result, row, columns::EVENT).unwrap_or_default(),
        distinct_id: text(result, row, columns::DISTINCT_ID).unwrap_or_default(),
        anonymous_id: text(result, row, columns::ANONYMOUS_ID),
        properties: bag(columns::PROPERTIES),
        context: bag(columns::CONTEXT),
        session_id: text(result, row, columns::SESSION_ID),
    })
}

#[cfg(test)]
#[path = "insights_test.rs"]
mod insights_test;

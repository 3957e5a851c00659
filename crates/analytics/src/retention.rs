//! Retention engine
//!
//! Groups users into cohorts by the period of their first `cohort_event`,
//! then measures how many of each cohort come back in each later period.
//!
//! Periods are fixed-length windows counted from the cohort start: one day,
//! one week, or 30 days for monthly cohorts. A period whose start lies after
//! the end of the range is not reported.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use minihog_query::QueryBackend;
use serde::{Deserialize, Serialize};

use crate::error::{AnalyticsError, Result};
use crate::format::{percentage, round2};
use crate::rows::{fetch_rows, fetch_rows_for_users, RowRequest};
use crate::timerange::{start_of_day, start_of_month, start_of_week, TimeRange};

/// Return filter value matching every event
pub const ANY_EVENT: &str = "any";

/// Default cohort-defining event
pub const DEFAULT_COHORT_EVENT: &str = "pageview";

/// Default lookback when the query names neither `from` nor a range
pub const DEFAULT_DATE_RANGE: &str = "90d";

/// Default number of periods per cohort
pub const DEFAULT_PERIODS: u32 = 12;

/// Largest number of periods a query may ask for
pub const MAX_PERIODS: u32 = 52;

/// Cohort granularity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
    Daily,
    #[default]
    Weekly,
    Monthly,
}

impl PeriodType {
    /// Length of one retention period
    pub fn length(&self) -> Duration {
        match self {
            PeriodType::Daily => Duration::seconds(86_400),
            PeriodType::Weekly => Duration::seconds(604_800),
            PeriodType::Monthly => Duration::seconds(2_592_000),
        }
    }

    /// Start date of the cohort containing `date`
    pub fn cohort_start(&self, date: NaiveDate) -> NaiveDate {
        match self {
            PeriodType::Daily => date,
            PeriodType::Weekly => start_of_week(date),
            PeriodType::Monthly => start_of_month(date),
        }
    }

    /// Display name of a cohort
    pub fn cohort_name(&self, start: NaiveDate) -> String {
        match self {
            PeriodType::Daily => start.format("%b %-d, %Y").to_string(),
            PeriodType::Weekly => format!("Week of {}", start.format("%b %-d")),
            PeriodType::Monthly => start.format("%B %Y").to_string(),
        }
    }
}

impl std::str::FromStr for PeriodType {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "daily" => Ok(PeriodType::Daily),
            "weekly" => Ok(PeriodType::Weekly),
            "monthly" => Ok(PeriodType::Monthly),
            other => Err(AnalyticsError::InvalidInput(format!(
                "unknown period type: {} (expected daily, weekly or monthly)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for PeriodType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PeriodType::Daily => "daily",
            PeriodType::Weekly => "weekly",
            PeriodType::Monthly => "monthly",
        })
    }
}

/// Retention query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionQuery {
    #[serde(default = "default_cohort_event")]
    pub cohort_event: String,
    /// Event that counts as a return, or `"any"`
    #[serde(default = "default_return_event")]
    pub return_event: String,
    #[serde(default)]
    pub period_type: PeriodType,
    #[serde(default = "default_periods")]
    pub periods: u32,
    #[serde(default = "default_date_range")]
    pub date_range: String,
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
}

fn default_cohort_event() -> String {
    DEFAULT_COHORT_EVENT.to_string()
}

fn default_return_event() -> String {
    ANY_EVENT.to_string()
}

fn default_periods() -> u32 {
    DEFAULT_PERIODS
}

fn default_date_range() -> String {
    DEFAULT_DATE_RANGE.to_string()
}

impl Default for RetentionQuery {
    fn default() -> Self {
        Self {
            cohort_event: default_cohort_event(),
            return_event: default_return_event(),
            period_type: PeriodType::default(),
            periods: DEFAULT_PERIODS,
            date_range: default_date_range(),
            from: None,
            to: None,
        }
    }
}

impl RetentionQuery {
    fn counts_any_event(&self) -> bool {
        self.return_event == ANY_EVENT
    }
}

/// Users retained in one period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionPeriod {
    pub period: u32,
    pub users: u64,
    pub percentage: f64,
}

/// One cohort's retention curve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortRetention {
    pub cohort_name: String,
    /// `YYYY-MM-DD`
    pub cohort_start: String,
    pub cohort_size: u64,
    pub periods: Vec<RetentionPeriod>,
}

impl CohortRetention {
    fn percentage_at(&self, period: u32) -> Option<f64> {
        self.periods
            .iter()
            .find(|p| p.period == period)
            .map(|p| p.percentage)
    }

    /// Ranking score: period 7, else the last period, else 0
    fn score(&self) -> f64 {
        self.percentage_at(7)
            .or_else(|| self.periods.last().map(|p| p.percentage))
            .unwrap_or(0.0)
    }
}

/// Aggregates across cohorts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetentionSummary {
    pub total_cohorts: u64,
    pub total_users: u64,
    pub avg_period1_retention: Option<f64>,
    pub avg_period7_retention: Option<f64>,
    pub avg_period30_retention: Option<f64>,
    pub best_cohort: Option<String>,
    pub worst_cohort: Option<String>,
}

impl RetentionSummary {
    fn from_cohorts(cohorts: &[CohortRetention]) -> Self {
        if cohorts.is_empty() {
            return Self::default();
        }

        let average = |period: u32| {
            let values: Vec<f64> = cohorts.iter().filter_map(|c| c.percentage_at(period)).collect();
            if values.is_empty() {
                None
            } else {
                Some(round2(values.iter().sum::<f64>() / values.len() as f64))
            }
        };

        let mut ranked: Vec<(&str, f64)> = cohorts
            .iter()
            .map(|c| (c.cohort_name.as_str(), c.score()))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        Self {
            total_cohorts: cohorts.len() as u64,
            total_users: cohorts.iter().map(|c| c.cohort_size).sum(),
            avg_period1_retention: average(1),
            avg_period7_retention: average(7),
            avg_period30_retention: average(30),
            best_cohort: ranked.first().map(|(name, _)| name.to_string()),
            worst_cohort: ranked.last().map(|(name, _)| name.to_string()),
        }
    }
}

/// How the analysis was run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionMetadata {
    pub cohort_type: String,
    pub period_type: PeriodType,
    pub periods_analyzed: u32,
    pub date_from: DateTime<Utc>,
    pub date_to: DateTime<Utc>,
}

/// Retention result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionResponse {
    pub cohorts: Vec<CohortRetention>,
    pub summary: RetentionSummary,
    pub metadata: RetentionMetadata,
}

/// Retention engine
pub struct RetentionEngine {
    backend: Arc<dyn QueryBackend>,
}

impl RetentionEngine {
    pub fn new(backend: Arc<dyn QueryBackend>) -> Self {
        Self { backend }
    }

    /// Calculate cohort retention for a query
    pub async fn calculate_retention(&self, query: &RetentionQuery) -> Result<RetentionResponse> {
        if !(1..=MAX_PERIODS).contains(&query.periods) {
            return Err(AnalyticsError::OutOfRange(format!(
                "periods must be between 1 and {}, got {}",
                MAX_PERIODS, query.periods
            )));
        }

        let range = TimeRange::resolve(
            query.from,
            query.to,
            Some(&query.date_range),
            DEFAULT_DATE_RANGE,
        )?;

        let metadata = RetentionMetadata {
            cohort_type: "first_event".to_string(),
            period_type: query.period_type,
            periods_analyzed: query.periods,
            date_from: range.from,
            date_to: range.to,
        };

        let cohorts = self.identify_cohorts(query, &range).await?;
        tracing::debug!(
            cohorts = cohorts.len(),
            period_type = %query.period_type,
            "retention cohorts identified"
        );

        let Some(earliest) = cohorts.keys().next().copied() else {
            return Ok(RetentionResponse {
                cohorts: Vec::new(),
                summary: RetentionSummary::default(),
                metadata,
            });
        };

        let activity = self.load_activity(query, &cohorts, earliest, range.to).await?;

        let results: Vec<CohortRetention> = cohorts
            .iter()
            .map(|(start, members)| cohort_retention(query, *start, members, &activity, range.to))
            .collect();

        Ok(RetentionResponse {
            summary: RetentionSummary::from_cohorts(&results),
            cohorts: results,
            metadata,
        })
    }

    /// Users keyed by cohort start date, oldest first
    async fn identify_cohorts(
        &self,
        query: &RetentionQuery,
        range: &TimeRange,
    ) -> Result<BTreeMap<NaiveDate, Vec<String>>> {
        let rows = fetch_rows(
            self.backend.as_ref(),
            RowRequest {
                range,
                event: Some(&query.cohort_event),
                with_properties: false,
            },
        )
        .await?;

        let mut first_seen: HashMap<String, DateTime<Utc>> = HashMap::new();
        for row in rows {
            let entry = first_seen.entry(row.distinct_id).or_insert(row.timestamp);
            if row.timestamp < *entry {
                *entry = row.timestamp;
            }
        }

        let mut cohorts: BTreeMap<NaiveDate, Vec<String>> = BTreeMap::new();
        for (user, first) in first_seen {
            let start = query.period_type.cohort_start(first.date_naive());
            cohorts.entry(start).or_default().push(user);
        }
        for members in cohorts.values_mut() {
            members.sort();
        }
        Ok(cohorts)
    }

    /// Return-event timestamps per cohort member, from the earliest cohort start to `to`
    async fn load_activity(
        &self,
        query: &RetentionQuery,
        cohorts: &BTreeMap<NaiveDate, Vec<String>>,
        earliest: NaiveDate,
        to: DateTime<Utc>,
    ) -> Result<HashMap<String, Vec<DateTime<Utc>>>> {
        let window = TimeRange::new(start_of_day(earliest).min(to), to)?;
        let users: Vec<String> = cohorts.values().flatten().cloned().collect();
        let event = (!query.counts_any_event()).then_some(query.return_event.as_str());

        let rows = fetch_rows_for_users(
            self.backend.as_ref(),
            RowRequest {
                range: &window,
                event,
                with_properties: false,
            },
            &users,
        )
        .await?;

        tracing::debug!(users = users.len(), rows = rows.len(), "retention activity loaded");

        let mut activity: HashMap<String, Vec<DateTime<Utc>>> = HashMap::new();
        for row in rows {
            activity.entry(row.distinct_id).or_default().push(row.timestamp);
        }
        Ok(activity)
    }
}

fn cohort_retention(
    query: &RetentionQuery,
    start: NaiveDate,
    members: &[String],
    activity: &HashMap<String, Vec<DateTime<Utc>>>,
    to: DateTime<Utc>,
) -> CohortRetention {
    let size = members.len() as u64;
    let length = query.period_type.length();
    let cohort_start = start_of_day(start);

    let mut periods = Vec::new();
    for n in 0..query.periods {
        let period_start = cohort_start + length * n as i32;
        if period_start > to {
            break;
        }
        let period_end = period_start + length;

        let users = members
            .iter()
            .filter(|user| {
                activity.get(user.as_str()).is_some_and(|times| {
                    times.iter().any(|t| *t >= period_start && *t < period_end)
                })
            })
            .count() as u64;
        periods.push(RetentionPeriod {
            period: n,
            users,
            percentage: percentage(users as f64, size as f64),
        });
    }

    CohortRetention {
        cohort_name: query.period_type.cohort_name(start),
        cohort_start: start.format("%Y-%m-%d").to_string(),
        cohort_size: size,
        periods,
    }
}

#[cfg(test)]
#[path = "retention_test.rs"]
mod retention_test;

//! Funnel engine
//!
//! Measures how many users move through an ordered list of steps.
//!
//! In **strict** mode a user's step time is the earliest qualifying
//! occurrence, and each later step must happen strictly after the user's own
//! time for the step before it. In **any_order** mode every step is counted
//! independently over the whole window, so counts are not nested and rates
//! may exceed 100 or go negative.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use minihog_query::{Properties, QueryBackend};
use serde::{Deserialize, Serialize};

use crate::error::{AnalyticsError, Result};
use crate::format::{format_duration, percentage};
use crate::rows::{fetch_rows, fetch_rows_for_users, EventRow, RowRequest};
use crate::timerange::TimeRange;

/// Window applied when a funnel query names none
pub const DEFAULT_FUNNEL_WINDOW: &str = "7d";

/// One funnel step definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelStep {
    /// Event name that completes the step
    pub event: String,
    /// Display name, defaults to the event name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Property values an occurrence must carry to count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Properties>,
}

impl FunnelStep {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            name: None,
            properties: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.properties
            .get_or_insert_with(Properties::new)
            .insert(key.into(), value.into());
        self
    }

    fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.event)
    }

    /// Whether an occurrence satisfies the step's property filter
    fn accepts(&self, row: &EventRow) -> bool {
        match &self.properties {
            None => true,
            Some(filter) => filter
                .iter()
                .all(|(key, expected)| row.properties.get(key) == Some(expected)),
        }
    }
}

/// Step ordering mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOrder {
    #[default]
    Strict,
    AnyOrder,
}

impl std::str::FromStr for StepOrder {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "strict" => Ok(StepOrder::Strict),
            "any_order" => Ok(StepOrder::AnyOrder),
            other => Err(AnalyticsError::InvalidInput(format!(
                "unknown step order: {} (expected strict or any_order)",
                other
            ))),
        }
    }
}

/// Funnel query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunnelQuery {
    pub steps: Vec<FunnelStep>,
    #[serde(default = "default_window")]
    pub time_window: String,
    #[serde(default)]
    pub step_order: StepOrder,
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
}

fn default_window() -> String {
    DEFAULT_FUNNEL_WINDOW.to_string()
}

impl FunnelQuery {
    pub fn new(steps: Vec<FunnelStep>) -> Self {
        Self {
            steps,
            time_window: default_window(),
            step_order: StepOrder::Strict,
            from: None,
            to: None,
        }
    }
}

/// Result for one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelStepResult {
    /// 1-based position
    pub step: usize,
    pub name: String,
    pub event: String,
    pub users_count: u64,
    pub completion_rate: f64,
    pub drop_off_rate: f64,
    pub avg_time_to_next: Option<String>,
}

/// Funnel result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelResponse {
    pub steps: Vec<FunnelStepResult>,
    pub total_conversion_rate: f64,
    pub total_users_entered: u64,
    pub total_users_converted: u64,
    pub average_completion_time: Option<String>,
    pub time_window: String,
}

/// Per-step first qualifying time of each user who reached it
type StepTimes = HashMap<String, DateTime<Utc>>;

/// Funnel engine
pub struct FunnelEngine {
    backend: Arc<dyn QueryBackend>,
}

impl FunnelEngine {
    pub fn new(backend: Arc<dyn QueryBackend>) -> Self {
        Self { backend }
    }

    /// Calculate funnel conversion for a query
    pub async fn calculate_funnel(&self, query: &FunnelQuery) -> Result<FunnelResponse> {
        validate(query)?;

        let range = TimeRange::resolve(
            query.from,
            query.to,
            Some(&query.time_window),
            DEFAULT_FUNNEL_WINDOW,
        )?;

        tracing::debug!(
            steps = query.steps.len(),
            order = ?query.step_order,
            from = %range.from,
            to = %range.to,
            "calculating funnel"
        );

        let response = match query.step_order {
            StepOrder::Strict => {
                let times = self.strict_step_times(&query.steps, &range).await?;
                build_strict_response(query, &times)
            }
            StepOrder::AnyOrder => {
                let counts = self.any_order_counts(&query.steps, &range).await?;
                build_response(query, &counts, vec![None; counts.len()], None)
            }
        };

        tracing::debug!(
            entered = response.total_users_entered,
            converted = response.total_users_converted,
            "funnel calculated"
        );

        Ok(response)
    }

    /// Walk the steps in order, narrowing to users who reached the previous one
    async fn strict_step_times(
        &self,
        steps: &[FunnelStep],
        range: &TimeRange,
    ) -> Result<Vec<StepTimes>> {
        let mut all_times: Vec<StepTimes> = Vec::with_capacity(steps.len());

        for (i, step) in steps.iter().enumerate() {
            let request = RowRequest {
                range,
                event: Some(&step.event),
                with_properties: step.properties.is_some(),
            };

            let times = match all_times.last() {
                None => {
                    let rows = fetch_rows(self.backend.as_ref(), request).await?;
                    earliest_per_user(rows.iter().filter(|row| step.accepts(row)))
                }
                Some(previous) if previous.is_empty() => StepTimes::new(),
                Some(previous) => {
                    let mut users: Vec<String> = previous.keys().cloned().collect();
                    users.sort();
                    let rows =
                        fetch_rows_for_users(self.backend.as_ref(), request, &users).await?;
                    earliest_per_user(rows.iter().filter(|row| {
                        step.accepts(row)
                            && previous
                                .get(&row.distinct_id)
                                .is_some_and(|prev| row.timestamp > *prev)
                    }))
                }
            };

            tracing::debug!(step = i + 1, event = %step.event, users = times.len(), "funnel step");
            all_times.push(times);
        }

        Ok(all_times)
    }

    /// Distinct users per step, each step on its own
    async fn any_order_counts(&self, steps: &[FunnelStep], range: &TimeRange) -> Result<Vec<u64>> {
        let mut counts = Vec::with_capacity(steps.len());
        for step in steps {
            let request = RowRequest {
                range,
                event: Some(&step.event),
                with_properties: step.properties.is_some(),
            };
            let rows = fetch_rows(self.backend.as_ref(), request).await?;
            let users = earliest_per_user(rows.iter().filter(|row| step.accepts(row)));
            counts.push(users.len() as u64);
        }
        Ok(counts)
    }
}

fn validate(query: &FunnelQuery) -> Result<()> {
    if query.steps.len() < 2 {
        return Err(AnalyticsError::InvalidFunnelDefinition(format!(
            "funnel must have at least 2 steps, got {}",
            query.steps.len()
        )));
    }
    if let Some(pos) = query.steps.iter().position(|s| s.event.trim().is_empty()) {
        return Err(AnalyticsError::InvalidFunnelDefinition(format!(
            "step {} has an empty event name",
            pos + 1
        )));
    }
    Ok(())
}

fn earliest_per_user<'a>(rows: impl Iterator<Item = &'a EventRow>) -> StepTimes {
    let mut times = StepTimes::new();
    for row in rows {
        times
            .entry(row.distinct_id.clone())
            .and_modify(|t| {
                if row.timestamp < *t {
                    *t = row.timestamp;
                }
            })
            .or_insert(row.timestamp);
    }
    times
}

/// Mean of `later[u] - earlier[u]` in seconds over users present in `later`
fn mean_gap_seconds(earlier: &StepTimes, later: &StepTimes) -> Option<f64> {
    let gaps: Vec<i64> = later
        .iter()
        .filter_map(|(user, t)| earlier.get(user).map(|e| (*t - *e).num_milliseconds()))
        .collect();

    if gaps.is_empty() {
        return None;
    }
    let total: i64 = gaps.iter().sum();
    Some(total as f64 / gaps.len() as f64 / 1000.0)
}

fn build_strict_response(query: &FunnelQuery, times: &[StepTimes]) -> FunnelResponse {
    let counts: Vec<u64> = times.iter().map(|t| t.len() as u64).collect();

    let gaps: Vec<Option<String>> = (0..times.len())
        .map(|i| {
            times
                .get(i + 1)
                .and_then(|next| mean_gap_seconds(&times[i], next))
                .map(format_duration)
        })
        .collect();

    let completion = match (times.first(), times.last()) {
        (Some(first), Some(last)) => mean_gap_seconds(first, last).map(format_duration),
        _ => None,
    };

    build_response(query, &counts, gaps, completion)
}

fn build_response(
    query: &FunnelQuery,
    counts: &[u64],
    gaps: Vec<Option<String>>,
    average_completion_time: Option<String>,
) -> FunnelResponse {
    let entered = counts.first().copied().unwrap_or(0);
    let converted = counts.last().copied().unwrap_or(0);

    let steps = query
        .steps
        .iter()
        .zip(counts.iter().copied())
        .zip(gaps)
        .enumerate()
        .map(|(i, ((step, users), avg_time_to_next))| {
            let (completion_rate, drop_off_rate) = if i == 0 {
                (100.0, 0.0)
            } else {
                let previous = counts[i - 1] as f64;
                (
                    percentage(users as f64, entered as f64),
                    percentage(previous - users as f64, previous),
                )
            };

            FunnelStepResult {
                step: i + 1,
                name: step.display_name().to_string(),
                event: step.event.clone(),
                users_count: users,
                completion_rate,
                drop_off_rate,
                avg_time_to_next,
            }
        })
        .collect();

    FunnelResponse {
        steps,
        total_conversion_rate: percentage(converted as f64, entered as f64),
        total_users_entered: entered,
        total_users_converted: converted,
        average_completion_time,
        time_window: query.time_window.clone(),
    }
}

#[cfg(test)]
#[path = "funnel_test.rs"]
mod funnel_test;

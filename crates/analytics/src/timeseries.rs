//! Time series data types
//!
//! Event counts bucketed by calendar interval, with aggregated statistics.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::timerange::Interval;

/// A single bucket in a time series
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    /// Bucket label (see [`bucket_label`])
    pub timestamp: String,
    /// Events in the bucket
    pub count: u64,
}

impl TimeSeriesPoint {
    /// Create a new point
    pub fn new(timestamp: impl Into<String>, count: u64) -> Self {
        Self {
            timestamp: timestamp.into(),
            count,
        }
    }
}

/// Time series data with aggregated statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesData {
    /// Non-empty buckets, oldest first
    pub points: Vec<TimeSeriesPoint>,
    /// Sum of all counts
    pub total: u64,
    /// Largest bucket count
    pub peak: u64,
    /// Mean count per non-empty bucket
    pub avg: f64,
}

impl TimeSeriesData {
    /// Create empty time series
    pub fn empty() -> Self {
        Self {
            points: Vec::new(),
            total: 0,
            peak: 0,
            avg: 0.0,
        }
    }

    /// Create time series from points, calculating stats
    pub fn from_points(points: Vec<TimeSeriesPoint>) -> Self {
        if points.is_empty() {
            return Self::empty();
        }

        let total: u64 = points.iter().map(|p| p.count).sum();
        let peak = points.iter().map(|p| p.count).max().unwrap_or(0);
        let avg = total as f64 / points.len() as f64;

        Self {
            points,
            total,
            peak,
            avg,
        }
    }

    /// Fold per-bucket counts into interval buckets
    ///
    /// Each start is truncated to `interval` first, so counts already grouped
    /// at a finer grain (days for a month series) merge into one point.
    /// Buckets with no events are not emitted.
    pub fn from_counts<I>(counts: I, interval: Interval) -> Self
    where
        I: IntoIterator<Item = (DateTime<Utc>, u64)>,
    {
        let mut buckets: BTreeMap<DateTime<Utc>, u64> = BTreeMap::new();
        for (start, count) in counts {
            *buckets.entry(interval.truncate(start)).or_insert(0) += count;
        }

        let points = buckets
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .map(|(start, count)| TimeSeriesPoint::new(bucket_label(start, interval), count))
            .collect();

        Self::from_points(points)
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Get number of points
    pub fn len(&self) -> usize {
        self.points.len()
    }
}

/// Label for a bucket starting at `start`
///
/// Minute and hour buckets keep the time (`2024-01-15 09:30:00`); day and
/// week buckets are the start date (weeks begin on Monday); month buckets
/// are `2024-01`.
pub fn bucket_label(start: DateTime<Utc>, interval: Interval) -> String {
    let format = match interval {
        Interval::Minute | Interval::Hour => "%Y-%m-%d %H:%M:%S",
        Interval::Day | Interval::Week => "%Y-%m-%d",
        Interval::Month => "%Y-%m",
    };
    start.format(format).to_string()
}

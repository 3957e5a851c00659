//! Time range resolution and calendar helpers
//!
//! Every engine turns its optional `from`/`to` instants and relative period
//! token (`24h`, `7d`, `2w`, `3m`, `1y`) into a concrete [`TimeRange`] here.
//! Period arithmetic is calendar arithmetic: `1m` before March 31 is the last
//! day of February, not 30 days earlier.

use std::sync::LazyLock;

use chrono::{
    DateTime, Datelike, Days, Duration, Months, NaiveDate, TimeZone, Timelike, Utc,
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{AnalyticsError, Result};

static PERIOD_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)([hdwmy])$").expect("period pattern is valid"));

/// A resolved, inclusive time range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    /// Start of the range (inclusive)
    pub from: DateTime<Utc>,
    /// End of the range (inclusive)
    pub to: DateTime<Utc>,
}

impl TimeRange {
    /// Create a new time range
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Self> {
        if from > to {
            return Err(AnalyticsError::InvalidTimeRange(format!(
                "from ({}) is after to ({})",
                from.to_rfc3339(),
                to.to_rfc3339()
            )));
        }
        Ok(Self { from, to })
    }

    /// Resolve optional bounds and a period token against the current time
    ///
    /// See [`TimeRange::resolve_at`].
    pub fn resolve(
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        period: Option<&str>,
        default_period: &str,
    ) -> Result<Self> {
        Self::resolve_at(from, to, period, default_period, Utc::now())
    }

    /// Resolve optional bounds and a period token against `now`
    ///
    /// - `to` defaults to `now`.
    /// - An explicit `from` wins; otherwise `from` is `to` minus the period,
    ///   or minus `default_period` when no period is given.
    pub fn resolve_at(
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        period: Option<&str>,
        default_period: &str,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let to = to.unwrap_or(now);

        let from = match from {
            Some(from) => from,
            None => {
                let period = Period::parse(period.unwrap_or(default_period))?;
                period.subtract_from(to)?
            }
        };

        Self::new(from, to)
    }
}

/// Unit of a relative period token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodUnit {
    Hour,
    Day,
    Week,
    Month,
    Year,
}

/// A relative period such as `7d`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Period {
    pub value: u32,
    pub unit: PeriodUnit,
}

impl Period {
    /// Parse a token matching `^(\d+)([hdwmy])$`
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = || AnalyticsError::InvalidPeriodFormat(s.to_string());

        let caps = PERIOD_PATTERN.captures(s).ok_or_else(invalid)?;
        let value: u32 = caps[1].parse().map_err(|_| invalid())?;
        let unit = match &caps[2] {
            "h" => PeriodUnit::Hour,
            "d" => PeriodUnit::Day,
            "w" => PeriodUnit::Week,
            "m" => PeriodUnit::Month,
            "y" => PeriodUnit::Year,
            _ => return Err(invalid()),
        };

        Ok(Self { value, unit })
    }

    /// Step back from `dt` by this period using calendar arithmetic
    ///
    /// Day-based units subtract calendar days in `dt`'s own time zone, so a
    /// range across a DST change still starts at the same wall-clock time.
    pub fn subtract_from<Tz: TimeZone>(&self, dt: DateTime<Tz>) -> Result<DateTime<Tz>> {
        let value = u64::from(self.value);
        let shifted = match self.unit {
            PeriodUnit::Hour => dt.checked_sub_signed(Duration::hours(value as i64)),
            PeriodUnit::Day => dt.checked_sub_days(Days::new(value)),
            PeriodUnit::Week => dt.checked_sub_days(Days::new(value * 7)),
            PeriodUnit::Month => dt.checked_sub_months(Months::new(self.value)),
            PeriodUnit::Year => self
                .value
                .checked_mul(12)
                .and_then(|months| dt.checked_sub_months(Months::new(months))),
        };

        shifted.ok_or_else(|| {
            AnalyticsError::InvalidTimeRange(format!("period {:?} is out of range", self))
        })
    }
}

/// Calendar bucket size used for truncation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    Minute,
    Hour,
    Day,
    Week,
    Month,
}

impl Interval {
    /// Start of the bucket containing `dt`
    pub fn truncate(&self, dt: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Interval::Minute => dt
                .with_second(0)
                .and_then(|d| d.with_nanosecond(0))
                .unwrap_or(dt),
            Interval::Hour => dt
                .with_minute(0)
                .and_then(|d| d.with_second(0))
                .and_then(|d| d.with_nanosecond(0))
                .unwrap_or(dt),
            Interval::Day => start_of_day(dt.date_naive()),
            Interval::Week => start_of_day(start_of_week(dt.date_naive())),
            Interval::Month => start_of_day(start_of_month(dt.date_naive())),
        }
    }

    /// Parse an interval name
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "minute" => Ok(Interval::Minute),
            "hour" => Ok(Interval::Hour),
            "day" => Ok(Interval::Day),
            "week" => Ok(Interval::Week),
            "month" => Ok(Interval::Month),
            other => Err(AnalyticsError::InvalidInput(format!(
                "unknown interval: {} (expected minute, hour, day, week or month)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Interval::Minute => "minute",
            Interval::Hour => "hour",
            Interval::Day => "day",
            Interval::Week => "week",
            Interval::Month => "month",
        };
        f.write_str(s)
    }
}

/// Midnight UTC of a date
pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

/// Monday of the ISO week containing `date`
pub fn start_of_week(date: NaiveDate) -> NaiveDate {
    let days_from_monday = date.weekday().num_days_from_monday();
    date - Duration::days(i64::from(days_from_monday))
}

/// First day of the month containing `date`
pub fn start_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Parse a caller-supplied instant: RFC 3339, or a bare `YYYY-MM-DD` (midnight UTC)
pub fn parse_instant(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map(start_of_day)
        .map_err(|_| {
            AnalyticsError::InvalidInput(format!(
                "invalid date: {} (use RFC 3339 or YYYY-MM-DD)",
                s
            ))
        })
}

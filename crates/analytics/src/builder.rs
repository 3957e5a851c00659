//! Query builder for engine SQL
//!
//! Builds portable SQL (runs on ClickHouse and Polars SQL) with every
//! caller-supplied value bound as a named parameter. Only identifiers and
//! integers the engines control are written into the text.

use chrono::{DateTime, Utc};
use minihog_query::event::columns;
use minihog_query::{placeholder, BoundQuery, ParamValue, SqlDialect, EVENTS_TABLE};

use crate::timerange::{Interval, TimeRange};

/// Largest number of user ids bound into one `IN (...)` list
pub const USER_CHUNK_SIZE: usize = 500;

/// Query builder for analytics SQL
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    table: String,
    select: Vec<String>,
    where_clauses: Vec<String>,
    group_by: Vec<String>,
    order_by: Vec<String>,
    limit: Option<u32>,
    offset: Option<u64>,
    params: Vec<(String, ParamValue)>,
}

impl QueryBuilder {
    /// Create a new query builder for a table
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            select: Vec::new(),
            where_clauses: Vec::new(),
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            params: Vec::new(),
        }
    }

    /// Create a builder over the events table
    pub fn events() -> Self {
        Self::new(EVENTS_TABLE)
    }

    /// Add a SELECT column
    pub fn select(mut self, column: impl Into<String>) -> Self {
        self.select.push(column.into());
        self
    }

    /// Add a SELECT column with alias
    pub fn select_as(mut self, expr: impl Into<String>, alias: impl Into<String>) -> Self {
        self.select.push(format!("{} AS {}", expr.into(), alias.into()));
        self
    }

    /// Add a WHERE clause made of identifiers only
    pub fn where_clause(mut self, clause: impl Into<String>) -> Self {
        self.where_clauses.push(clause.into());
        self
    }

    /// `column <op> {name:Type}` with the value bound
    pub fn where_cmp(
        mut self,
        column: &str,
        op: &str,
        name: &str,
        value: impl Into<ParamValue>,
    ) -> Self {
        let value = value.into();
        self.where_clauses
            .push(format!("{} {} {}", column, op, placeholder(name, &value)));
        self.params.push((name.to_string(), value));
        self
    }

    /// `column = {name:Type}`
    pub fn where_eq(self, column: &str, name: &str, value: impl Into<ParamValue>) -> Self {
        self.where_cmp(column, "=", name, value)
    }

    /// Inclusive time range on the timestamp column, bound as `from`/`to`
    pub fn where_time_range(self, range: &TimeRange) -> Self {
        self.where_time_between(range.from, range.to)
    }

    /// Inclusive `[from, to]` on the timestamp column
    pub fn where_time_between(self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.where_cmp(columns::TIMESTAMP, ">=", "from", from)
            .where_cmp(columns::TIMESTAMP, "<=", "to", to)
    }

    /// `column IN ({p0:String}, {p1:String}, ...)`
    ///
    /// An empty list renders as a condition that matches nothing.
    pub fn where_in<S: AsRef<str>>(mut self, column: &str, prefix: &str, values: &[S]) -> Self {
        if values.is_empty() {
            self.where_clauses.push("1 = 0".to_string());
            return self;
        }

        let mut slots = Vec::with_capacity(values.len());
        for (i, value) in values.iter().enumerate() {
            let name = format!("{}{}", prefix, i);
            let value = ParamValue::from(value.as_ref());
            slots.push(placeholder(&name, &value));
            self.params.push((name, value));
        }
        self.where_clauses
            .push(format!("{} IN ({})", column, slots.join(", ")));
        self
    }

    /// Add a GROUP BY column
    pub fn group_by(mut self, column: impl Into<String>) -> Self {
        self.group_by.push(column.into());
        self
    }

    /// Add an ORDER BY column
    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.order_by.push(column.into());
        self
    }

    /// Add ORDER BY with direction
    pub fn order_by_desc(mut self, column: impl Into<String>) -> Self {
        self.order_by.push(format!("{} DESC", column.into()));
        self
    }

    /// Set LIMIT
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set OFFSET
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Build the final query
    pub fn build(self) -> BoundQuery {
        let mut sql = String::new();

        sql.push_str("SELECT ");
        if self.select.is_empty() {
            sql.push('*');
        } else {
            sql.push_str(&self.select.join(", "));
        }

        sql.push_str(" FROM ");
        sql.push_str(&self.table);

        if !self.where_clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.where_clauses.join(" AND "));
        }

        if !self.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&self.group_by.join(", "));
        }

        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by.join(", "));
        }

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        let mut query = BoundQuery::new(sql);
        for (name, value) in self.params {
            query.push_param(name, value);
        }
        query
    }
}

/// Raw event rows for a time range, optionally narrowed to one event name
/// and to a set of users
///
/// Selects `distinct_id` and `timestamp`, plus `properties` when asked.
pub fn event_rows_query<S: AsRef<str>>(
    range: &TimeRange,
    event: Option<&str>,
    users: Option<&[S]>,
    with_properties: bool,
) -> BoundQuery {
    let mut builder = QueryBuilder::events()
        .select(columns::DISTINCT_ID)
        .select(columns::TIMESTAMP);

    if with_properties {
        builder = builder.select(columns::PROPERTIES);
    }

    builder = builder.where_time_range(range);

    if let Some(event) = event {
        builder = builder.where_eq(columns::EVENT, "event", event);
    }

    if let Some(users) = users {
        builder = builder.where_in(columns::DISTINCT_ID, "u", users);
    }

    builder.build()
}

/// Distinct users active in a time range
pub fn distinct_users_query(range: &TimeRange) -> BoundQuery {
    QueryBuilder::events()
        .select_as(format!("COUNT(DISTINCT {})", columns::DISTINCT_ID), "users")
        .where_time_range(range)
        .limit(1)
        .build()
}

/// Start of the SQL-side bucket holding each event
///
/// ClickHouse truncates to the exact interval. Polars timestamps are epoch
/// milliseconds, so fixed-width intervals use modular arithmetic and months
/// fall back to days; callers fold those into months afterwards.
pub fn bucket_expr(interval: Interval, dialect: SqlDialect) -> String {
    const MINUTE_MS: i64 = 60_000;
    const HOUR_MS: i64 = 60 * MINUTE_MS;
    const DAY_MS: i64 = 24 * HOUR_MS;
    // 1970-01-01 was a Thursday, three days after a Monday
    const WEEK_SHIFT_MS: i64 = 3 * DAY_MS;

    let ts = columns::TIMESTAMP;
    match dialect {
        SqlDialect::ClickHouse => match interval {
            Interval::Minute => format!("toStartOfMinute({})", ts),
            Interval::Hour => format!("toStartOfHour({})", ts),
            Interval::Day => format!("toStartOfDay({})", ts),
            Interval::Week => format!("toDateTime(toMonday({}), 'UTC')", ts),
            Interval::Month => format!("toDateTime(toStartOfMonth({}), 'UTC')", ts),
        },
        SqlDialect::Polars => match interval {
            Interval::Minute => format!("{ts} - {ts} % {}", MINUTE_MS),
            Interval::Hour => format!("{ts} - {ts} % {}", HOUR_MS),
            Interval::Day | Interval::Month => format!("{ts} - {ts} % {}", DAY_MS),
            Interval::Week => format!(
                "{ts} - ({ts} + {}) % {}",
                WEEK_SHIFT_MS,
                7 * DAY_MS
            ),
        },
    }
}

/// Event counts grouped by bucket start, oldest first
pub fn trends_query(
    range: &TimeRange,
    event: Option<&str>,
    interval: Interval,
    dialect: SqlDialect,
) -> BoundQuery {
    let mut builder = QueryBuilder::events()
        .select_as(bucket_expr(interval, dialect), "bucket")
        .select_as("COUNT(*)", "total")
        .where_time_range(range);

    if let Some(event) = event {
        builder = builder.where_eq(columns::EVENT, "event", event);
    }

    builder.group_by("bucket").order_by("bucket").build()
}

/// Event names ranked by occurrence count
pub fn top_events_query(range: &TimeRange, limit: u32) -> BoundQuery {
    QueryBuilder::events()
        .select(columns::EVENT)
        .select_as("COUNT(*)", "total")
        .where_time_range(range)
        .group_by(columns::EVENT)
        .order_by_desc("total")
        .order_by(columns::EVENT)
        .limit(limit)
        .build()
}

/// Filters shared by the event listing and its count
#[derive(Debug, Clone, Default)]
pub struct EventListFilter<'a> {
    pub event: Option<&'a str>,
    pub distinct_id: Option<&'a str>,
}

fn apply_list_filter(mut builder: QueryBuilder, filter: &EventListFilter<'_>) -> QueryBuilder {
    if let Some(event) = filter.event {
        builder = builder.where_eq(columns::EVENT, "event", event);
    }
    if let Some(distinct_id) = filter.distinct_id {
        builder = builder.where_eq(columns::DISTINCT_ID, "distinct_id", distinct_id);
    }
    builder
}

/// Total number of events matching a listing filter
pub fn count_events_query(range: &TimeRange, filter: &EventListFilter<'_>) -> BoundQuery {
    let builder = QueryBuilder::events()
        .select_as("COUNT(*)", "total")
        .where_time_range(range);
    apply_list_filter(builder, filter).limit(1).build()
}

/// One page of raw events, newest first
pub fn list_events_query(
    range: &TimeRange,
    filter: &EventListFilter<'_>,
    limit: u32,
    offset: u64,
) -> BoundQuery {
    let mut builder = QueryBuilder::events();
    for column in [
        columns::TIMESTAMP,
        columns::EVENT,
        columns::DISTINCT_ID,
        columns::ANONYMOUS_ID,
        columns::PROPERTIES,
        columns::CONTEXT,
        columns::SESSION_ID,
    ] {
        builder = builder.select(column);
    }

    builder = builder.where_time_range(range);
    apply_list_filter(builder, filter)
        .order_by_desc(columns::TIMESTAMP)
        .limit(limit)
        .offset(offset)
        .build()
}

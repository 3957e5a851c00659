//! Analytics commands - funnels, retention and insights
//!
//! # Usage
//!
//! ```bash
//! minihog funnel --steps pageview,signup,purchase --window 14d
//! minihog funnel --definition checkout-funnel.json
//! minihog retention --cohort-event signup --return-event purchase --period-type monthly
//! minihog trends --event pageview --period 30d --interval week
//! minihog active-users
//! minihog top-events --limit 5
//! minihog events --event purchase --page 2 --limit 50
//! ```
//!
//! Defaults not given on the command line come from `[analytics]`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use minihog_analytics::{
    EventsQuery, FunnelEngine, FunnelQuery, FunnelStep, InsightsEngine, Interval, PeriodType,
    RetentionEngine, RetentionQuery, StepOrder, TopEventsQuery, TrendsQuery,
};
use minihog_config::Config;
use minihog_query::QueryBackend;
use serde_json::Value;

use super::{event_store, parse_time};
use crate::output::to_data;

/// Funnel arguments
#[derive(Args, Debug)]
pub struct FunnelArgs {
    /// Comma-separated step events, in order
    #[arg(short, long, value_delimiter = ',', required_unless_present = "definition")]
    pub steps: Vec<String>,

    /// JSON file with a full funnel definition (steps with property filters)
    #[arg(short, long, conflicts_with = "steps")]
    pub definition: Option<PathBuf>,

    /// Lookback window when --from is omitted (e.g. 7d, 12h)
    #[arg(short, long)]
    pub window: Option<String>,

    /// Step ordering (strict, any_order)
    #[arg(short, long, default_value = "strict", value_parser = parse_step_order)]
    pub order: StepOrder,

    #[arg(long, value_parser = parse_time)]
    pub from: Option<DateTime<Utc>>,

    #[arg(long, value_parser = parse_time)]
    pub to: Option<DateTime<Utc>>,
}

/// Retention arguments
#[derive(Args, Debug)]
pub struct RetentionArgs {
    /// Event that places a user in a cohort
    #[arg(long, default_value = "pageview")]
    pub cohort_event: String,

    /// Event that counts as a return ("any" for every event)
    #[arg(long, default_value = "any")]
    pub return_event: String,

    /// Cohort granularity (daily, weekly, monthly)
    #[arg(short, long, default_value = "weekly", value_parser = parse_period_type)]
    pub period_type: PeriodType,

    /// Periods to analyze (1-52)
    #[arg(short = 'n', long)]
    pub periods: Option<u32>,

    /// Cohort lookback when --from is omitted
    #[arg(short, long)]
    pub date_range: Option<String>,

    #[arg(long, value_parser = parse_time)]
    pub from: Option<DateTime<Utc>>,

    #[arg(long, value_parser = parse_time)]
    pub to: Option<DateTime<Utc>>,
}

/// Trends arguments
#[derive(Args, Debug)]
pub struct TrendsArgs {
    /// Only count this event
    #[arg(short, long)]
    pub event: Option<String>,

    /// Lookback window when --from is omitted
    #[arg(short, long)]
    pub period: Option<String>,

    /// Bucket size (minute, hour, day, week, month)
    #[arg(short, long, default_value = "day", value_parser = parse_interval)]
    pub interval: Interval,

    #[arg(long, value_parser = parse_time)]
    pub from: Option<DateTime<Utc>>,

    #[arg(long, value_parser = parse_time)]
    pub to: Option<DateTime<Utc>>,
}

/// Top events arguments
#[derive(Args, Debug)]
pub struct TopEventsArgs {
    /// Number of results (1-1000)
    #[arg(short = 'n', long)]
    pub limit: Option<u32>,

    #[arg(long, value_parser = parse_time)]
    pub from: Option<DateTime<Utc>>,

    #[arg(long, value_parser = parse_time)]
    pub to: Option<DateTime<Utc>>,
}

/// Event listing arguments
#[derive(Args, Debug)]
pub struct EventsArgs {
    #[arg(long, default_value = "1")]
    pub page: u64,

    /// Page size (1-1000)
    #[arg(short = 'n', long, default_value = "20")]
    pub limit: u32,

    /// Only list this event
    #[arg(short, long)]
    pub event: Option<String>,

    /// Only list this user's events
    #[arg(short = 'u', long)]
    pub distinct_id: Option<String>,

    /// Lookback window when --from is omitted
    #[arg(short, long)]
    pub period: Option<String>,

    #[arg(long, value_parser = parse_time)]
    pub from: Option<DateTime<Utc>>,

    #[arg(long, value_parser = parse_time)]
    pub to: Option<DateTime<Utc>>,
}

fn parse_step_order(s: &str) -> std::result::Result<StepOrder, String> {
    s.parse().map_err(|e: minihog_analytics::AnalyticsError| e.to_string())
}

fn parse_period_type(s: &str) -> std::result::Result<PeriodType, String> {
    s.parse().map_err(|e: minihog_analytics::AnalyticsError| e.to_string())
}

fn parse_interval(s: &str) -> std::result::Result<Interval, String> {
    Interval::parse(s).map_err(|e| e.to_string())
}

fn backend(config: &Config) -> Result<Arc<dyn QueryBackend>> {
    Ok(Arc::new(event_store(config)?))
}

/// Build the funnel query from flags or a definition file
pub fn funnel_query(args: FunnelArgs, config: &Config) -> Result<FunnelQuery> {
    let mut query = match &args.definition {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read funnel definition: {}", path.display()))?;
            serde_json::from_str::<FunnelQuery>(&contents)
                .with_context(|| format!("invalid funnel definition: {}", path.display()))?
        }
        None => {
            let mut query = FunnelQuery::new(args.steps.into_iter().map(FunnelStep::new).collect());
            query.time_window = config.analytics.funnel_window.clone();
            query.step_order = args.order;
            query
        }
    };

    if let Some(window) = args.window {
        query.time_window = window;
    }
    if args.from.is_some() {
        query.from = args.from;
    }
    if args.to.is_some() {
        query.to = args.to;
    }

    Ok(query)
}

pub async fn funnel(args: FunnelArgs, config: &Config) -> Result<Value> {
    let query = funnel_query(args, config)?;
    let engine = FunnelEngine::new(backend(config)?);
    to_data(&engine.calculate_funnel(&query).await?)
}

pub async fn retention(args: RetentionArgs, config: &Config) -> Result<Value> {
    let query = RetentionQuery {
        cohort_event: args.cohort_event,
        return_event: args.return_event,
        period_type: args.period_type,
        periods: args.periods.unwrap_or(config.analytics.retention_periods),
        date_range: args
            .date_range
            .unwrap_or_else(|| config.analytics.retention_date_range.clone()),
        from: args.from,
        to: args.to,
    };

    let engine = RetentionEngine::new(backend(config)?);
    to_data(&engine.calculate_retention(&query).await?)
}

pub async fn trends(args: TrendsArgs, config: &Config) -> Result<Value> {
    let query = TrendsQuery {
        event_name: args.event,
        from: args.from,
        to: args.to,
        period: args
            .period
            .unwrap_or_else(|| config.analytics.trends_period.clone()),
        interval: args.interval,
    };

    let engine = InsightsEngine::new(backend(config)?);
    to_data(&engine.trends(&query).await?)
}

pub async fn active_users(config: &Config) -> Result<Value> {
    let engine = InsightsEngine::new(backend(config)?);
    to_data(&engine.active_users(Utc::now()).await?)
}

pub async fn top_events(args: TopEventsArgs, config: &Config) -> Result<Value> {
    let query = TopEventsQuery {
        limit: args.limit.unwrap_or(config.analytics.top_events_limit),
        from: args.from,
        to: args.to,
    };

    let engine = InsightsEngine::new(backend(config)?);
    to_data(&engine.top_events(&query).await?)
}

pub async fn events(args: EventsArgs, config: &Config) -> Result<Value> {
    let query = EventsQuery {
        page: args.page,
        limit: args.limit,
        event_name: args.event,
        distinct_id: args.distinct_id,
        from: args.from,
        to: args.to,
        period: args.period,
    };

    let engine = InsightsEngine::new(backend(config)?);
    to_data(&engine.events(&query).await?)
}

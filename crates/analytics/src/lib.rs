//! MiniHog Analytics Engine
//!
//! Product analytics over the event store in `minihog-query`.
//!
//! # Overview
//!
//! - **Time ranges**: relative period tokens (`7d`, `3m`) resolved to concrete bounds
//! - **Funnels**: step-by-step conversion in strict or any order
//! - **Retention**: first-event cohorts and their return rates per period
//! - **Insights**: trends, active users, top events, event listing
//!
//! Every engine is built around an injected [`minihog_query::QueryBackend`]
//! and issues parameter-bound SQL through [`QueryBuilder`].
//!
//! # Usage
//!
//! ```ignore
//! use minihog_analytics::{FunnelEngine, FunnelQuery, FunnelStep};
//!
//! let engine = FunnelEngine::new(backend);
//! let funnel = engine
//!     .calculate_funnel(&FunnelQuery::new(vec![
//!         FunnelStep::new("pageview"),
//!         FunnelStep::new("purchase"),
//!     ]))
//!     .await?;
//! ```

pub mod builder;
pub mod error;
pub mod format;
pub mod funnel;
pub mod insights;
pub mod retention;
pub mod rows;
pub mod timerange;
pub mod timeseries;

#[cfg(test)]
pub(crate) mod test_utils;


// Re-exports for convenience
pub use builder::QueryBuilder;
pub use error::{AnalyticsError, Result};
pub use funnel::{FunnelEngine, FunnelQuery, FunnelResponse, FunnelStep, FunnelStepResult, StepOrder};
pub use insights::{
    ActiveUsersResponse, EventRecord, EventsListResponse, EventsQuery, InsightsEngine, TopEvent,
    TopEventsQuery, TopEventsResponse, TrendsQuery, TrendsResponse,
};
pub use retention::{
    CohortRetention, PeriodType, RetentionEngine, RetentionMetadata, RetentionPeriod,
    RetentionQuery, RetentionResponse, RetentionSummary,
};
pub use timerange::{parse_instant, Interval, Period, PeriodUnit, TimeRange};
pub use timeseries::{TimeSeriesData, TimeSeriesPoint};

//! Analytics error types

use thiserror::Error;

/// Analytics errors
#[derive(Debug, Error)]
pub enum AnalyticsError {
    /// Period token does not match `<n><h|d|w|m|y>`
    #[error("invalid period format: {0}")]
    InvalidPeriodFormat(String),

    /// Invalid time range
    #[error("invalid time range: {0}")]
    InvalidTimeRange(String),

    /// Funnel definition cannot be evaluated
    #[error("invalid funnel definition: {0}")]
    InvalidFunnelDefinition(String),

    /// Value out of range
    #[error("value out of range: {0}")]
    OutOfRange(String),

    /// Any other invalid caller input
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Event store unavailable or query failed
    #[error("event store error: {0}")]
    Backend(#[from] minihog_query::QueryError),

    /// The store returned a row the engines cannot read
    #[error("malformed row: {0}")]
    MalformedRow(String),
}

impl AnalyticsError {
    /// Whether the caller is at fault (bad input) rather than the store
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AnalyticsError::InvalidPeriodFormat(_)
                | AnalyticsError::InvalidTimeRange(_)
                | AnalyticsError::InvalidFunnelDefinition(_)
                | AnalyticsError::OutOfRange(_)
                | AnalyticsError::InvalidInput(_)
        )
    }
}

/// Result type for analytics operations
pub type Result<T> = std::result::Result<T, AnalyticsError>;

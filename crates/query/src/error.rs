//! Query error types

/// Errors that can occur while reading from or writing to the event store
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// Connection failed
    #[error("connection failed: {0}")]
    Connection(String),

    /// Query execution failed
    #[error("query execution failed: {0}")]
    Execution(String),

    /// Invalid SQL (only SELECT/WITH allowed)
    #[error("invalid SQL: {0}")]
    InvalidSql(String),

    /// A placeholder in the SQL text has no bound value
    #[error("unbound query parameter: {0}")]
    UnboundParameter(String),

    /// An event batch could not be converted for storage
    #[error("invalid event batch: {0}")]
    InvalidBatch(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Polars error
    #[error("polars error: {0}")]
    Polars(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<polars::error::PolarsError> for QueryError {
    fn from(err: polars::error::PolarsError) -> Self {
        QueryError::Polars(err.to_string())
    }
}

impl From<glob::PatternError> for QueryError {
    fn from(err: glob::PatternError) -> Self {
        QueryError::Config(format!("invalid glob pattern: {}", err))
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(err: serde_json::Error) -> Self {
        QueryError::Serialization(err.to_string())
    }
}

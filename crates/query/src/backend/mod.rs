//! Event store backend traits and implementations

pub mod clickhouse;
pub mod polars;

use async_trait::async_trait;

use crate::error::QueryError;
use crate::event::Event;
use crate::params::BoundQuery;
use crate::result::{QueryResult, TableInfo};

/// SQL flavor a backend executes
///
/// Generated SQL stays portable except where a calendar function is needed;
/// there the builder picks the expression by dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    /// ClickHouse SQL over `DateTime64` timestamps
    ClickHouse,
    /// Polars SQL over epoch-millisecond `Int64` timestamps
    Polars,
}

/// Read side of the event store
///
/// Implemented by ClickHouse and Polars backends.
#[async_trait]
pub trait QueryBackend: Send + Sync {
    /// Execute a parameterized read query
    async fn execute(&self, query: &BoundQuery) -> Result<QueryResult, QueryError>;

    /// Check if backend is available
    async fn health_check(&self) -> Result<(), QueryError>;

    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// SQL flavor this backend executes
    fn dialect(&self) -> SqlDialect {
        SqlDialect::ClickHouse
    }

    /// List available tables
    async fn list_tables(&self) -> Result<Vec<TableInfo>, QueryError>;
}

/// Write side of the event store
#[async_trait]
pub trait EventWriter: Send + Sync {
    /// Append a batch of events, returning how many were written
    ///
    /// A batch is all-or-nothing: readers never observe part of it.
    async fn append(&self, events: &[Event]) -> Result<u64, QueryError>;
}

/// A backend that can both store and query events
pub trait EventStore: QueryBackend + EventWriter {}

impl<T: QueryBackend + EventWriter> EventStore for T {}

/// Validate SQL query - only allow SELECT and WITH (CTE) queries
///
/// Guardrail for generated and hand-written SQL alike. It stops mistakes,
/// it is not an authorization layer.
pub fn validate_sql(sql: &str) -> Result<(), QueryError> {
    let trimmed = sql.trim();
    let upper = trimmed.to_uppercase();

    if !upper.starts_with("SELECT") && !upper.starts_with("WITH") {
        return Err(QueryError::InvalidSql(
            "only SELECT and WITH queries are allowed".to_string(),
        ));
    }

    // SELECT ... INTO creates tables in some databases
    if upper.contains(" INTO ") {
        return Err(QueryError::InvalidSql(
            "SELECT INTO is not allowed".to_string(),
        ));
    }

    // One trailing semicolon is fine, anything after it is a second statement
    if trimmed.trim_end_matches(';').contains(';') {
        return Err(QueryError::InvalidSql(
            "multiple statements not allowed".to_string(),
        ));
    }

    Ok(())
}

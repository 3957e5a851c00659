//! MiniHog Query - the event store behind every analytics engine
//!
//! Provides a unified interface for storing and querying events on two backends:
//! - **ClickHouse**: Production analytics database
//! - **Polars**: In-process frame with Arrow IPC persistence for development/edge deployments
//!
//! Every read is a [`BoundQuery`]: SQL text with named, typed placeholders
//! plus their values. Callers never splice values into SQL.
//!
//! # Usage
//!
//! ```ignore
//! use minihog_query::{BoundQuery, QueryConfig, QueryEngine};
//!
//! let engine = QueryEngine::from_config(&QueryConfig::local("/var/lib/minihog/events"))?;
//!
//! let query = BoundQuery::new("SELECT COUNT(*) AS total FROM events WHERE event = {event:String}")
//!     .bind("event", "pageview");
//! let result = engine.execute(&query).await?;
//! println!("Rows: {}", result.row_count);
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod event;
pub mod params;
pub mod result;

// Re-exports
pub use backend::clickhouse::{schema_ddl, ClickHouseBackend, ClickHouseBackendConfig};
pub use backend::polars::PolarsBackend;
pub use backend::{validate_sql, EventStore, EventWriter, QueryBackend, SqlDialect};
pub use config::{QueryBackendType, QueryConfig};
pub use error::QueryError;
pub use event::{Event, Properties, DEFAULT_PROJECT, EVENTS_TABLE};
pub use params::{placeholder, BoundQuery, ParamValue};
pub use result::{Column, DataType, QueryResult, TableInfo};

use std::sync::Arc;

use async_trait::async_trait;

/// Query engine that routes reads and writes to the configured backend
#[derive(Clone)]
pub struct QueryEngine {
    backend: Arc<dyn EventStore>,
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl QueryEngine {
    /// Create a new query engine with a specific backend
    pub fn new(backend: impl EventStore + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    /// Create a query engine from a shared backend
    pub fn from_arc(backend: Arc<dyn EventStore>) -> Self {
        Self { backend }
    }

    /// Create a query engine from config
    pub fn from_config(config: &QueryConfig) -> Result<Self, QueryError> {
        config.validate()?;

        match config.backend {
            QueryBackendType::Local => {
                let backend = match &config.data_dir {
                    Some(dir) => PolarsBackend::open(dir)?,
                    None => PolarsBackend::in_memory()?,
                };
                Ok(Self::new(backend))
            }
            QueryBackendType::ClickHouse => {
                let ch_config = ClickHouseBackendConfig::from_query_config(config)?;
                Ok(Self::new(ClickHouseBackend::new(&ch_config)))
            }
        }
    }

    /// Check if the backend is healthy
    pub async fn health_check(&self) -> Result<(), QueryError> {
        self.backend.health_check().await
    }

    /// Get the backend name
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Shared handle to the backend
    pub fn backend(&self) -> Arc<dyn EventStore> {
        Arc::clone(&self.backend)
    }
}

#[async_trait]
impl QueryBackend for QueryEngine {
    async fn execute(&self, query: &BoundQuery) -> Result<QueryResult, QueryError> {
        self.backend.execute(query).await
    }

    async fn health_check(&self) -> Result<(), QueryError> {
        self.backend.health_check().await
    }

    fn name(&self) -> &'static str {
        self.backend.name()
    }

    fn dialect(&self) -> SqlDialect {
        self.backend.dialect()
    }

    async fn list_tables(&self) -> Result<Vec<TableInfo>, QueryError> {
        self.backend.list_tables().await
    }
}

#[async_trait]
impl EventWriter for QueryEngine {
    async fn append(&self, events: &[Event]) -> Result<u64, QueryError> {
        self.backend.append(events).await
    }
}

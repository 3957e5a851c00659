//! Event store configuration types

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::QueryError;

/// Event store backend type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryBackendType {
    /// ClickHouse over HTTP
    ClickHouse,
    /// In-process Polars frame, optionally persisted as Arrow IPC
    #[default]
    #[serde(alias = "polars")]
    Local,
}

impl std::fmt::Display for QueryBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryBackendType::ClickHouse => write!(f, "clickhouse"),
            QueryBackendType::Local => write!(f, "local"),
        }
    }
}

/// Event store configuration (`[store]` section)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Backend type (clickhouse, local)
    pub backend: QueryBackendType,

    /// ClickHouse HTTP URL
    pub url: Option<String>,

    /// ClickHouse database name
    pub database: String,

    /// Username for authentication
    pub username: Option<String>,

    /// Password for authentication
    pub password: Option<String>,

    /// Directory holding Arrow IPC batch files (local backend).
    /// When unset the local store lives in memory only.
    pub data_dir: Option<PathBuf>,

    /// ClickHouse `max_execution_time` in seconds
    pub max_execution_time: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            backend: QueryBackendType::Local,
            url: None,
            database: "default".to_string(),
            username: None,
            password: None,
            data_dir: None,
            max_execution_time: 60,
        }
    }
}

impl QueryConfig {
    /// Create config for ClickHouse backend
    pub fn clickhouse(url: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            backend: QueryBackendType::ClickHouse,
            url: Some(url.into()),
            database: database.into(),
            ..Default::default()
        }
    }

    /// Create config for a local store persisted under `data_dir`
    pub fn local(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            backend: QueryBackendType::Local,
            data_dir: Some(data_dir.into()),
            ..Default::default()
        }
    }

    /// Create config for a purely in-memory local store
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Check that the selected backend has what it needs
    pub fn validate(&self) -> Result<(), QueryError> {
        match self.backend {
            QueryBackendType::ClickHouse => {
                let url = self.url.as_deref().unwrap_or_default();
                if url.is_empty() {
                    return Err(QueryError::Config(
                        "url required for clickhouse backend".to_string(),
                    ));
                }
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(QueryError::Config(format!(
                        "clickhouse url must start with http:// or https://, got '{}'",
                        url
                    )));
                }
                if self.database.is_empty() {
                    return Err(QueryError::Config(
                        "database required for clickhouse backend".to_string(),
                    ));
                }
                if self.max_execution_time == 0 {
                    return Err(QueryError::Config(
                        "max_execution_time must be greater than 0".to_string(),
                    ));
                }
            }
            QueryBackendType::Local => {
                if let Some(dir) = &self.data_dir {
                    if dir.as_os_str().is_empty() {
                        return Err(QueryError::Config("data_dir cannot be empty".to_string()));
                    }
                }
            }
        }
        Ok(())
    }
}

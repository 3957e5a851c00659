//! Command implementations for the MiniHog CLI

pub mod analytics;
pub mod flags;
pub mod ingest;
pub mod sql;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use minihog_config::{Config, QueryBackendType};
use minihog_flags::{FlagService, SqliteFlagStore};
use minihog_query::QueryEngine;
use tracing::{debug, warn};

/// Open the configured event store
pub fn event_store(config: &Config) -> Result<QueryEngine> {
    if config.store.backend == QueryBackendType::Local && config.store.data_dir.is_none() {
        warn!("local event store has no data_dir, events live only for this command");
    }

    let engine = QueryEngine::from_config(&config.store).context("failed to open event store")?;
    debug!(backend = engine.backend_name(), "event store ready");
    Ok(engine)
}

/// Open the flag database and wrap it in a service
pub async fn flag_service(config: &Config) -> Result<FlagService> {
    let store = SqliteFlagStore::open(&config.flags.path)
        .await
        .with_context(|| format!("failed to open flag database: {}", config.flags.path.display()))?;
    Ok(FlagService::new(Arc::new(store)))
}

/// Clap parser for `--from`/`--to` (RFC 3339 or `YYYY-MM-DD`)
pub fn parse_time(s: &str) -> std::result::Result<DateTime<Utc>, String> {
    minihog_analytics::parse_instant(s).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_time() {
        assert_eq!(
            parse_time("2024-03-01").unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            parse_time("2024-03-01T12:30:00+02:00").unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 30, 0).unwrap()
        );
        assert!(parse_time("yesterday").is_err());
    }

    #[tokio::test]
    async fn test_flag_service_creates_database() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.flags.path = dir.path().join("nested").join("flags.db");

        let service = flag_service(&config).await.unwrap();
        assert!(service.list().await.unwrap().is_empty());
        assert!(config.flags.path.exists());
    }
}

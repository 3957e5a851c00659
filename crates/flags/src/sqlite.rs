//! Flag store backed by SQLite

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::{debug, info};

use crate::error::{FlagError, Result};
use crate::model::{FeatureFlag, FlagDecision, FlagUpdate, NewFlag, Variant};
use crate::store::FlagStore;

/// SQLite flag store
pub struct SqliteFlagStore {
    pool: SqlitePool,
}

impl SqliteFlagStore {
    /// Open or create a store at the given path
    ///
    /// Creates the database and tables if they don't exist.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                FlagError::Database(format!(
                    "failed to create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| FlagError::Database(format!("failed to open database: {}", e)))?;

        let store = Self { pool };
        store.init_schema().await?;

        info!("Flag store opened at {}", path.display());
        Ok(store)
    }

    /// Create an in-memory store
    ///
    /// A single long-lived connection keeps the database alive.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| FlagError::Database(format!("failed to create memory db: {}", e)))?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feature_flags (
                key TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                active INTEGER NOT NULL DEFAULT 1,
                rollout_percentage REAL NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| FlagError::Database(format!("failed to create flags table: {}", e)))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS flag_decisions (
                distinct_id TEXT NOT NULL,
                flag_key TEXT NOT NULL,
                variant TEXT NOT NULL,
                hash_value REAL NOT NULL,
                decided_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| FlagError::Database(format!("failed to create decisions table: {}", e)))?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_decisions_user_flag ON flag_decisions(distinct_id, flag_key)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| FlagError::Database(format!("failed to create index: {}", e)))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_decisions_flag ON flag_decisions(flag_key)")
            .execute(&self.pool)
            .await
            .map_err(|e| FlagError::Database(format!("failed to create index: {}", e)))?;

        debug!("Flag store schema initialized");
        Ok(())
    }

    async fn write_flag(&self, flag: &FeatureFlag) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE feature_flags
            SET name = ?, description = ?, active = ?, rollout_percentage = ?, updated_at = ?
            WHERE key = ?
            "#,
        )
        .bind(&flag.name)
        .bind(&flag.description)
        .bind(flag.active)
        .bind(flag.rollout_percentage)
        .bind(flag.updated_at.to_rfc3339())
        .bind(&flag.key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn parse_time(column: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| FlagError::Database(format!("invalid {} '{}': {}", column, value, e)))
}

fn flag_from_row(row: &SqliteRow) -> Result<FeatureFlag> {
    let created: String = row.try_get("created_at")?;
    let updated: String = row.try_get("updated_at")?;

    Ok(FeatureFlag {
        key: row.try_get("key")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        active: row.try_get("active")?,
        rollout_percentage: row.try_get("rollout_percentage")?,
        created_at: parse_time("created_at", &created)?,
        updated_at: parse_time("updated_at", &updated)?,
    })
}

fn decision_from_row(row: &SqliteRow) -> Result<FlagDecision> {
    let variant: String = row.try_get("variant")?;
    let decided: String = row.try_get("decided_at")?;

    Ok(FlagDecision {
        distinct_id: row.try_get("distinct_id")?,
        flag_key: row.try_get("flag_key")?,
        variant: Variant::parse(&variant)
            .ok_or_else(|| FlagError::Database(format!("invalid variant '{}'", variant)))?,
        hash_value: row.try_get("hash_value")?,
        decided_at: parse_time("decided_at", &decided)?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}

const FLAG_COLUMNS: &str =
    "key, name, description, active, rollout_percentage, created_at, updated_at";

const DECISION_COLUMNS: &str = "distinct_id, flag_key, variant, hash_value, decided_at";

#[async_trait]
impl FlagStore for SqliteFlagStore {
    async fn list_flags(&self) -> Result<Vec<FeatureFlag>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM feature_flags ORDER BY key",
            FLAG_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(flag_from_row).collect()
    }

    async fn get_flag(&self, key: &str) -> Result<Option<FeatureFlag>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM feature_flags WHERE key = ?",
            FLAG_COLUMNS
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(flag_from_row).transpose()
    }

    async fn create_flag(&self, flag: &NewFlag) -> Result<FeatureFlag> {
        flag.validate()?;
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO feature_flags (key, name, description, active, rollout_percentage, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&flag.key)
        .bind(&flag.name)
        .bind(&flag.description)
        .bind(flag.active)
        .bind(flag.rollout_percentage)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                FlagError::AlreadyExists(flag.key.clone())
            } else {
                FlagError::from(e)
            }
        })?;

        info!(key = %flag.key, rollout = flag.rollout_percentage, "Created flag");

        Ok(FeatureFlag {
            key: flag.key.clone(),
            name: flag.name.clone(),
            description: flag.description.clone(),
            active: flag.active,
            rollout_percentage: flag.rollout_percentage,
            created_at: now,
            updated_at: now,
        })
    }

    async fn update_flag(&self, key: &str, update: &FlagUpdate) -> Result<FeatureFlag> {
        let mut flag = self
            .get_flag(key)
            .await?
            .ok_or_else(|| FlagError::NotFound(key.to_string()))?;

        update.apply(&mut flag, Utc::now())?;
        self.write_flag(&flag).await?;

        info!(key = %key, active = flag.active, rollout = flag.rollout_percentage, "Updated flag");
        Ok(flag)
    }

    async fn delete_flag(&self, key: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let decisions = sqlx::query("DELETE FROM flag_decisions WHERE flag_key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let deleted = sqlx::query("DELETE FROM feature_flags WHERE key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        if deleted > 0 {
            info!(key = %key, decisions, "Deleted flag");
        }
        Ok(deleted > 0)
    }

    async fn get_decision(
        &self,
        distinct_id: &str,
        flag_key: &str,
    ) -> Result<Option<FlagDecision>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM flag_decisions WHERE distinct_id = ? AND flag_key = ?",
            DECISION_COLUMNS
        ))
        .bind(distinct_id)
        .bind(flag_key)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(decision_from_row).transpose()
    }

    async fn record_decision(&self, decision: &FlagDecision) -> Result<FlagDecision> {
        let inserted = sqlx::query(&format!(
            "INSERT INTO flag_decisions ({}) VALUES (?, ?, ?, ?, ?)",
            DECISION_COLUMNS
        ))
        .bind(&decision.distinct_id)
        .bind(&decision.flag_key)
        .bind(decision.variant.as_str())
        .bind(decision.hash_value)
        .bind(decision.decided_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(decision.clone()),
            Err(e) if is_unique_violation(&e) => {
                debug!(
                    distinct_id = %decision.distinct_id,
                    flag_key = %decision.flag_key,
                    "decision already recorded, returning stored variant"
                );
                self.get_decision(&decision.distinct_id, &decision.flag_key)
                    .await?
                    .ok_or_else(|| {
                        FlagError::Database(format!(
                            "decision for {}/{} vanished after conflict",
                            decision.distinct_id, decision.flag_key
                        ))
                    })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn clear_decisions(&self, flag_key: &str) -> Result<u64> {
        let cleared = sqlx::query("DELETE FROM flag_decisions WHERE flag_key = ?")
            .bind(flag_key)
            .execute(&self.pool)
            .await?
            .rows_affected();

        info!(flag_key = %flag_key, cleared, "Cleared flag decisions");
        Ok(cleared)
    }
}

#[cfg(test)]
#[path = "sqlite_test.rs"]
mod sqlite_test;

//! Polars event store for local and edge deployments
//!
//! Events live in a single in-memory `DataFrame` behind a read/write lock.
//! Readers execute against a snapshot (cheap: columns are reference
//! counted), writers append whole batches under the write lock.
//!
//! # Persistence
//!
//! When opened on a data directory, every appended batch is also written as
//! one Arrow IPC file and all files are loaded back on open:
//! ```text
//! {data_dir}/
//! ├── events-1705312800000-<uuid>.arrow
//! └── events-1705316400000-<uuid>.arrow
//! ```
//! Files are written under a temporary name and renamed into place, so a
//! crashed append never leaves a half batch behind.
//!
//! Timestamps are stored as `Int64` epoch milliseconds; the property bags
//! are stored as JSON text.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::RwLock;
use polars::prelude::*;

use crate::backend::{validate_sql, EventWriter, QueryBackend, SqlDialect};
use crate::error::QueryError;
use crate::event::{columns, Event, EVENTS_TABLE};
use crate::params::BoundQuery;
use crate::result::{Column, DataType, QueryResult, TableInfo};

/// Polars event store
#[derive(Debug)]
pub struct PolarsBackend {
    /// Current events, swapped wholesale on append
    frame: RwLock<DataFrame>,

    /// Directory for Arrow IPC batch files, `None` for memory-only
    data_dir: Option<PathBuf>,
}

impl PolarsBackend {
    /// Create an empty memory-only store
    pub fn in_memory() -> Result<Self, QueryError> {
        Ok(Self {
            frame: RwLock::new(empty_frame()?),
            data_dir: None,
        })
    }

    /// Open a persistent store, loading every batch file under `data_dir`
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self, QueryError> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;

        let files = discover_files(&data_dir)?;
        let mut frame = empty_frame()?;
        for file in &files {
            let batch = IpcReader::new(fs::File::open(file)?).finish()?;
            frame.vstack_mut(&batch)?;
        }

        tracing::info!(
            path = %data_dir.display(),
            files = files.len(),
            rows = frame.height(),
            "opened local event store"
        );

        Ok(Self {
            frame: RwLock::new(frame),
            data_dir: Some(data_dir),
        })
    }

    /// Number of stored events
    pub fn len(&self) -> usize {
        self.frame.read().height()
    }

    /// Whether the store holds no events
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write one batch file, returning its final path
    fn persist_batch(&self, dir: &Path, batch: &mut DataFrame) -> Result<PathBuf, QueryError> {
        let name = format!(
            "events-{}-{}.arrow",
            chrono::Utc::now().timestamp_millis(),
            uuid::Uuid::new_v4()
        );
        let final_path = dir.join(&name);
        let tmp_path = dir.join(format!("{}.tmp", name));

        if let Err(e) = write_ipc(&tmp_path, &final_path, batch) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        Ok(final_path)
    }

    /// Convert a Polars DataFrame to QueryResult
    fn dataframe_to_result(
        &self,
        df: DataFrame,
        execution_time_ms: u64,
    ) -> Result<QueryResult, QueryError> {
        let columns = schema_columns(&df);
        let rows = dataframe_to_rows(&df)?;
        Ok(QueryResult::new(columns, rows, execution_time_ms))
    }
}

#[async_trait]
impl QueryBackend for PolarsBackend {
    async fn execute(&self, query: &BoundQuery) -> Result<QueryResult, QueryError> {
        validate_sql(query.sql())?;

        let start = Instant::now();
        let sql = query.render_inline()?;

        let snapshot = self.frame.read().clone();
        let mut ctx = polars::sql::SQLContext::new();
        ctx.register(EVENTS_TABLE, snapshot.lazy());

        let lf = ctx
            .execute(&sql)
            .map_err(|e| QueryError::Execution(format!("SQL execution failed: {}", e)))?;

        let df = lf
            .collect()
            .map_err(|e| QueryError::Execution(format!("failed to collect results: {}", e)))?;

        let execution_time_ms = start.elapsed().as_millis() as u64;

        tracing::debug!(
            sql = %sql,
            rows = df.height(),
            cols = df.width(),
            time_ms = execution_time_ms,
            "polars query executed"
        );

        self.dataframe_to_result(df, execution_time_ms)
    }

    async fn health_check(&self) -> Result<(), QueryError> {
        if let Some(dir) = &self.data_dir {
            if !dir.is_dir() {
                return Err(QueryError::Config(format!(
                    "data directory {} is missing",
                    dir.display()
                )));
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "polars"
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::Polars
    }

    async fn list_tables(&self) -> Result<Vec<TableInfo>, QueryError> {
        let frame = self.frame.read();
        Ok(vec![TableInfo::new(EVENTS_TABLE)
            .with_columns(schema_columns(&frame))
            .with_row_count(frame.height() as u64)])
    }
}

#[async_trait]
impl EventWriter for PolarsBackend {
    async fn append(&self, events: &[Event]) -> Result<u64, QueryError> {
        if events.is_empty() {
            return Ok(0);
        }

        // Everything fallible happens before the batch becomes visible
        let mut batch = events_to_frame(events)?;
        if let Some(dir) = &self.data_dir {
            let path = self.persist_batch(dir, &mut batch)?;
            tracing::debug!(path = %path.display(), "persisted event batch");
        }

        let mut frame = self.frame.write();
        frame.vstack_mut(&batch)?;
        let total = frame.height();
        drop(frame);

        tracing::debug!(count = events.len(), total, "appended events");
        Ok(events.len() as u64)
    }
}

/// Write a frame to `tmp_path` and move it to `final_path`
fn write_ipc(tmp_path: &Path, final_path: &Path, batch: &mut DataFrame) -> Result<(), QueryError> {
    let mut file = fs::File::create(tmp_path)?;
    IpcWriter::new(&mut file).finish(batch)?;
    file.sync_all()?;
    fs::rename(tmp_path, final_path)?;
    Ok(())
}

/// All batch files under a data directory, oldest first
fn discover_files(dir: &Path) -> Result<Vec<PathBuf>, QueryError> {
    let pattern = format!("{}/**/*.arrow", dir.display());
    let mut files: Vec<PathBuf> = glob::glob(&pattern)?.filter_map(Result::ok).collect();
    files.sort();
    Ok(files)
}

/// Empty frame with the events schema
fn empty_frame() -> Result<DataFrame, QueryError> {
    events_to_frame(&[])
}

/// Build a columnar batch from events
fn events_to_frame(events: &[Event]) -> Result<DataFrame, QueryError> {
    let mut properties = Vec::with_capacity(events.len());
    let mut context = Vec::with_capacity(events.len());
    for event in events {
        properties.push(
            serde_json::to_string(&event.properties)
                .map_err(|e| QueryError::InvalidBatch(e.to_string()))?,
        );
        context.push(
            serde_json::to_string(&event.context)
                .map_err(|e| QueryError::InvalidBatch(e.to_string()))?,
        );
    }

    let df = df!(
        columns::EVENT => events.iter().map(|e| e.event.clone()).collect::<Vec<String>>(),
        columns::DISTINCT_ID => events.iter().map(|e| e.distinct_id.clone()).collect::<Vec<String>>(),
        columns::ANONYMOUS_ID => events.iter().map(|e| e.anonymous_id.clone()).collect::<Vec<Option<String>>>(),
        columns::TIMESTAMP => events.iter().map(|e| e.timestamp.timestamp_millis()).collect::<Vec<i64>>(),
        columns::RECEIVED_AT => events.iter().map(|e| e.received_at.timestamp_millis()).collect::<Vec<i64>>(),
        columns::PROPERTIES => properties,
        columns::CONTEXT => context,
        columns::PROJECT_ID => events.iter().map(|e| e.project_id.clone()).collect::<Vec<String>>(),
        columns::SESSION_ID => events.iter().map(|e| e.session_id.clone()).collect::<Vec<Option<String>>>(),
    )?;

    Ok(df)
}

/// Column definitions of a frame
fn schema_columns(df: &DataFrame) -> Vec<Column> {
    df.schema()
        .iter()
        .map(|(name, dtype)| {
            let data_type = if name.as_str() == columns::TIMESTAMP
                || name.as_str() == columns::RECEIVED_AT
            {
                DataType::Timestamp
            } else {
                DataType::from_polars(dtype)
            };
            Column::new(name.as_str(), data_type, true)
        })
        .collect()
}

/// Convert DataFrame rows to JSON values
fn dataframe_to_rows(df: &DataFrame) -> Result<Vec<Vec<serde_json::Value>>, QueryError> {
    let mut rows = Vec::with_capacity(df.height());

    for i in 0..df.height() {
        let mut row = Vec::with_capacity(df.width());
        for col in df.get_columns() {
            let series = col.as_materialized_series();
            row.push(series_value_to_json(series, i)?);
        }
        rows.push(row);
    }

    Ok(rows)
}

/// Convert a single Series value to JSON
fn series_value_to_json(series: &Series, idx: usize) -> Result<serde_json::Value, QueryError> {
    use polars::datatypes::DataType as PDT;
    use serde_json::Value;

    if series.is_null().get(idx).unwrap_or(false) {
        return Ok(Value::Null);
    }

    let value = match series.dtype() {
        PDT::Int8 => Value::from(series.i8()?.get(idx).unwrap_or_default()),
        PDT::Int16 => Value::from(series.i16()?.get(idx).unwrap_or_default()),
        PDT::Int32 => Value::from(series.i32()?.get(idx).unwrap_or_default()),
        PDT::Int64 => Value::from(series.i64()?.get(idx).unwrap_or_default()),
        PDT::UInt8 => Value::from(series.u8()?.get(idx).unwrap_or_default()),
        PDT::UInt16 => Value::from(series.u16()?.get(idx).unwrap_or_default()),
        PDT::UInt32 => Value::from(series.u32()?.get(idx).unwrap_or_default()),
        PDT::UInt64 => Value::from(series.u64()?.get(idx).unwrap_or_default()),
        PDT::Float32 => {
            let val = series.f32()?.get(idx).unwrap_or_default();
            serde_json::Number::from_f64(val as f64)
                .map(Value::Number)
                .unwrap_or(Value::Null)
        }
        PDT::Float64 => {
            let val = series.f64()?.get(idx).unwrap_or_default();
            serde_json::Number::from_f64(val)
                .map(Value::Number)
                .unwrap_or(Value::Null)
        }
        PDT::Boolean => Value::Bool(series.bool()?.get(idx).unwrap_or_default()),
        PDT::String => Value::String(series.str()?.get(idx).unwrap_or_default().to_string()),
        _ => Value::String(format!("{}", series.get(idx)?)),
    };

    Ok(value)
}

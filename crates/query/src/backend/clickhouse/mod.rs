//! ClickHouse event store
//!
//! Talks to ClickHouse over its HTTP interface. Reads are sent as the POST
//! body with their parameters as `param_<name>` URL parameters, so values
//! are bound server-side and never spliced into SQL text. Results come back
//! as `JSONEachRow`.

use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::backend::{validate_sql, EventWriter, QueryBackend};
use crate::config::QueryConfig;
use crate::error::QueryError;
use crate::event::{format_clickhouse_datetime, Event, EVENTS_TABLE};
use crate::params::BoundQuery;
use crate::result::{Column, DataType, QueryResult, TableInfo};

// =============================================================================
// Configuration
// =============================================================================

/// ClickHouse backend configuration
#[derive(Debug, Clone)]
pub struct ClickHouseBackendConfig {
    /// ClickHouse HTTP URL (e.g., "http://localhost:8123")
    pub url: String,

    /// Database name
    pub database: String,

    /// Username for authentication (optional)
    pub username: Option<String>,

    /// Password for authentication (optional)
    pub password: Option<String>,

    /// Max execution time in seconds
    pub max_execution_time: u64,
}

impl Default for ClickHouseBackendConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8123".into(),
            database: "default".into(),
            username: None,
            password: None,
            max_execution_time: 60,
        }
    }
}

impl ClickHouseBackendConfig {
    /// Create a new config with URL and database
    pub fn new(url: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            database: database.into(),
            ..Default::default()
        }
    }

    /// Set authentication credentials
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set the server-side execution limit
    pub fn with_max_execution_time(mut self, seconds: u64) -> Self {
        self.max_execution_time = seconds;
        self
    }

    /// Build from the `[store]` section
    pub fn from_query_config(config: &QueryConfig) -> Result<Self, QueryError> {
        let url = config
            .url
            .as_ref()
            .ok_or_else(|| QueryError::Config("url required for clickhouse backend".to_string()))?;

        let mut ch_config = Self::new(url, &config.database)
            .with_max_execution_time(config.max_execution_time);

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            ch_config = ch_config.with_credentials(user, pass);
        }

        Ok(ch_config)
    }
}

/// DDL for the events table
///
/// Ordered for the analytics access path: project, then event name, then
/// user, then time.
pub fn schema_ddl() -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table}\n\
         (\n    \
             event LowCardinality(String),\n    \
             distinct_id String,\n    \
             anonymous_id Nullable(String),\n    \
             timestamp DateTime64(3, 'UTC'),\n    \
             received_at DateTime64(3, 'UTC'),\n    \
             properties String,\n    \
             context String,\n    \
             project_id LowCardinality(String),\n    \
             session_id Nullable(String)\n\
         )\n\
         ENGINE = MergeTree\n\
         PARTITION BY toYYYYMM(timestamp)\n\
         ORDER BY (project_id, event, distinct_id, timestamp)",
        table = EVENTS_TABLE
    )
}

// =============================================================================
// Backend Implementation
// =============================================================================

/// ClickHouse event store using the HTTP interface
#[derive(Clone)]
pub struct ClickHouseBackend {
    client: reqwest::Client,
    config: ClickHouseBackendConfig,
}

impl std::fmt::Debug for ClickHouseBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClickHouseBackend")
            .field("url", &self.config.url)
            .field("database", &self.config.database)
            .finish()
    }
}

impl ClickHouseBackend {
    /// Create a new ClickHouse backend from config
    pub fn new(config: &ClickHouseBackendConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config: config.clone(),
        }
    }

    /// Create from URL and database directly
    pub fn from_url(url: impl Into<String>, database: impl Into<String>) -> Self {
        let config = ClickHouseBackendConfig::new(url, database);
        Self::new(&config)
    }

    /// URL parameters common to every request plus the bound query parameters
    fn request_params(&self, query: Option<&BoundQuery>) -> Vec<(String, String)> {
        let mut params = vec![
            ("database".to_string(), self.config.database.clone()),
            (
                "max_execution_time".to_string(),
                self.config.max_execution_time.to_string(),
            ),
            // Keep 64-bit counts as JSON numbers
            (
                "output_format_json_quote_64bit_integers".to_string(),
                "0".to_string(),
            ),
        ];

        if let Some(query) = query {
            for (name, value) in query.params() {
                params.push((format!("param_{}", name), value.to_clickhouse()));
            }
        }

        params
    }

    /// POST a statement and return the raw response body
    async fn post(
        &self,
        params: &[(String, String)],
        body: String,
    ) -> Result<String, QueryError> {
        let mut request = self.client.post(&self.config.url).query(params).body(body);

        if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            request = request.basic_auth(user, Some(pass));
        }

        let response = request.send().await.map_err(|e| {
            QueryError::Connection(format!("ClickHouse connection failed: {}", e))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(QueryError::Execution(format!(
                "ClickHouse error ({}): {}",
                status, body
            )));
        }

        response
            .text()
            .await
            .map_err(|e| QueryError::Execution(format!("failed to read response: {}", e)))
    }

    /// Run a bound read query and return the `JSONEachRow` body
    async fn fetch(&self, query: &BoundQuery) -> Result<String, QueryError> {
        let sql = format!(
            "{} FORMAT JSONEachRow",
            query.sql().trim().trim_end_matches(';')
        );
        let params = self.request_params(Some(query));
        self.post(&params, sql).await
    }

    /// Create the events table if it does not exist
    pub async fn ensure_schema(&self) -> Result<(), QueryError> {
        let params = self.request_params(None);
        self.post(&params, schema_ddl()).await?;
        tracing::info!(
            database = %self.config.database,
            table = EVENTS_TABLE,
            "ensured ClickHouse schema"
        );
        Ok(())
    }

    /// Get column information for a table
    async fn get_table_columns(&self, table: &str) -> Result<Vec<Column>, QueryError> {
        let query = BoundQuery::new(
            "SELECT name, type FROM system.columns \
             WHERE database = {database:String} AND table = {table:String}",
        )
        .bind("database", self.config.database.as_str())
        .bind("table", table);

        let column_rows: Vec<ColumnRowJson> = parse_lines(&self.fetch(&query).await?)?;

        Ok(column_rows
            .into_iter()
            .map(|col| {
                Column::new(
                    col.name,
                    clickhouse_type_to_datatype(&col.r#type),
                    col.r#type.contains("Nullable"),
                )
            })
            .collect())
    }
}

#[async_trait]
impl QueryBackend for ClickHouseBackend {
    async fn execute(&self, query: &BoundQuery) -> Result<QueryResult, QueryError> {
        validate_sql(query.sql())?;

        let start = Instant::now();
        let response_text = self.fetch(query).await?;
        let execution_time_ms = start.elapsed().as_millis() as u64;

        let json_rows: Vec<serde_json::Map<String, Value>> = parse_lines(&response_text)?;
        let result = rows_to_result(json_rows, execution_time_ms);

        tracing::debug!(
            sql = query.sql(),
            params = query.params().len(),
            rows = result.row_count,
            time_ms = execution_time_ms,
            "ClickHouse query executed"
        );

        Ok(result)
    }

    async fn health_check(&self) -> Result<(), QueryError> {
        self.fetch(&BoundQuery::new("SELECT 1")).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "clickhouse"
    }

    async fn list_tables(&self) -> Result<Vec<TableInfo>, QueryError> {
        let query = BoundQuery::new(
            "SELECT name, total_rows FROM system.tables WHERE database = {database:String}",
        )
        .bind("database", self.config.database.as_str());

        let table_rows: Vec<TableRowJson> = parse_lines(&self.fetch(&query).await?)?;

        let mut tables = Vec::with_capacity(table_rows.len());
        for table_row in table_rows {
            let columns = self.get_table_columns(&table_row.name).await?;
            tables.push(TableInfo {
                name: table_row.name,
                row_count: table_row.total_rows,
                columns,
            });
        }

        Ok(tables)
    }
}

#[async_trait]
impl EventWriter for ClickHouseBackend {
    async fn append(&self, events: &[Event]) -> Result<u64, QueryError> {
        if events.is_empty() {
            return Ok(0);
        }

        let mut body = String::new();
        for event in events {
            body.push_str(&serde_json::to_string(&insert_row(event)?)?);
            body.push('\n');
        }

        // A single INSERT is applied atomically for a batch that fits one block
        let mut params = self.request_params(None);
        params.push((
            "query".to_string(),
            format!("INSERT INTO {} FORMAT JSONEachRow", EVENTS_TABLE),
        ));
        self.post(&params, body).await?;

        tracing::debug!(count = events.len(), "appended events to ClickHouse");
        Ok(events.len() as u64)
    }
}

// =============================================================================
// Helper Types
// =============================================================================

/// Table metadata row
#[derive(Debug, Deserialize)]
struct TableRowJson {
    name: String,
    total_rows: Option<u64>,
}

/// Column metadata row
#[derive(Debug, Deserialize)]
struct ColumnRowJson {
    name: String,
    r#type: String,
}

/// Parse a `JSONEachRow` body
fn parse_lines<T: serde::de::DeserializeOwned>(body: &str) -> Result<Vec<T>, QueryError> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line)
                .map_err(|e| QueryError::Serialization(format!("failed to parse JSON row: {}", e)))
        })
        .collect()
}

/// Turn parsed rows into a result, taking column order from the first row
fn rows_to_result(
    json_rows: Vec<serde_json::Map<String, Value>>,
    execution_time_ms: u64,
) -> QueryResult {
    let Some(first_row) = json_rows.first() else {
        return QueryResult::new(Vec::new(), Vec::new(), execution_time_ms);
    };

    let column_names: Vec<String> = first_row.keys().cloned().collect();
    let columns: Vec<Column> = first_row
        .iter()
        .map(|(name, value)| Column::new(name.clone(), infer_data_type(value), true))
        .collect();

    let rows = json_rows
        .into_iter()
        .map(|mut row| {
            column_names
                .iter()
                .map(|name| row.remove(name).unwrap_or(Value::Null))
                .collect()
        })
        .collect();

    QueryResult::new(columns, rows, execution_time_ms)
}

/// Encode an event as a `JSONEachRow` insert row
fn insert_row(event: &Event) -> Result<serde_json::Map<String, Value>, QueryError> {
    let mut row = serde_json::Map::new();
    row.insert("event".into(), Value::String(event.event.clone()));
    row.insert("distinct_id".into(), Value::String(event.distinct_id.clone()));
    row.insert(
        "anonymous_id".into(),
        event.anonymous_id.clone().map_or(Value::Null, Value::String),
    );
    row.insert(
        "timestamp".into(),
        Value::String(format_clickhouse_datetime(event.timestamp)),
    );
    row.insert(
        "received_at".into(),
        Value::String(format_clickhouse_datetime(event.received_at)),
    );
    row.insert(
        "properties".into(),
        Value::String(serde_json::to_string(&event.properties)?),
    );
    row.insert(
        "context".into(),
        Value::String(serde_json::to_string(&event.context)?),
    );
    row.insert("project_id".into(), Value::String(event.project_id.clone()));
    row.insert(
        "session_id".into(),
        event.session_id.clone().map_or(Value::Null, Value::String),
    );
    Ok(row)
}

// =============================================================================
// Type Conversion
// =============================================================================

/// Infer DataType from a JSON value
fn infer_data_type(value: &Value) -> DataType {
    match value {
        Value::Null => DataType::Unknown,
        Value::Bool(_) => DataType::Boolean,
        Value::Number(n) => {
            if n.is_f64() {
                DataType::Float64
            } else if n.is_u64() {
                DataType::UInt64
            } else {
                DataType::Int64
            }
        }
        Value::String(_) => DataType::String,
        Value::Array(_) | Value::Object(_) => DataType::Json,
    }
}

/// Convert ClickHouse type string to DataType
fn clickhouse_type_to_datatype(ch_type: &str) -> DataType {
    let inner_type = ch_type
        .strip_prefix("Nullable(")
        .and_then(|s| s.strip_suffix(')'))
        .unwrap_or(ch_type);

    let inner_type = inner_type
        .strip_prefix("LowCardinality(")
        .and_then(|s| s.strip_suffix(')'))
        .unwrap_or(inner_type);

    match inner_type {
        "Int8" | "Int16" | "Int32" | "Int64" => DataType::Int64,
        "UInt8" | "UInt16" | "UInt32" | "UInt64" => DataType::UInt64,
        "Float32" | "Float64" => DataType::Float64,
        "String" => DataType::String,
        t if t.starts_with("FixedString(") || t.starts_with("Enum") => DataType::String,
        t if t.starts_with("UUID") => DataType::String,
        "Bool" => DataType::Boolean,
        "Date" | "Date32" => DataType::Timestamp,
        t if t.starts_with("DateTime") => DataType::Timestamp,
        "JSON" => DataType::Json,
        t if t.starts_with("Array(") || t.starts_with("Map(") => DataType::Json,
        _ => DataType::Unknown,
    }
}

//! SQL and schema commands
//!
//! # Usage
//!
//! ```bash
//! minihog sql "SELECT event, COUNT(*) AS n FROM events GROUP BY event"
//! minihog schema           # print the ClickHouse DDL
//! minihog schema --apply   # create the table on the configured server
//! ```

use anyhow::{Context, Result};
use clap::Args;
use minihog_config::{Config, QueryBackendType};
use minihog_query::{
    schema_ddl, validate_sql, BoundQuery, ClickHouseBackend, ClickHouseBackendConfig,
    QueryBackend, QueryResult,
};
use serde_json::{json, Value};

use super::event_store;

/// SQL command arguments
#[derive(Args, Debug)]
pub struct SqlArgs {
    /// SQL query to execute (SELECT/WITH only)
    #[arg(value_name = "SQL")]
    pub sql: String,
}

/// Schema command arguments
#[derive(Args, Debug)]
pub struct SchemaArgs {
    /// Run the DDL against the configured ClickHouse store
    #[arg(long)]
    pub apply: bool,
}

/// Run the sql command
pub async fn run(args: SqlArgs, config: &Config) -> Result<Value> {
    validate_sql(&args.sql)?;

    let engine = event_store(config)?;
    let result = engine
        .execute(&BoundQuery::new(args.sql))
        .await
        .context("query execution failed")?;

    Ok(render(&result, engine.backend_name()))
}

fn render(result: &QueryResult, backend: &str) -> Value {
    json!({
        "columns": result.column_names(),
        "rows": result.to_objects(),
        "row_count": result.row_count,
        "execution_time_ms": result.execution_time_ms,
        "backend": backend,
    })
}

/// Run the schema command
pub async fn schema(args: SchemaArgs, config: &Config) -> Result<Value> {
    let ddl = schema_ddl();
    if !args.apply {
        return Ok(json!({ "ddl": ddl }));
    }

    if config.store.backend != QueryBackendType::ClickHouse {
        anyhow::bail!("schema --apply needs a clickhouse store, the local store has no schema");
    }

    let ch_config = ClickHouseBackendConfig::from_query_config(&config.store)?;
    ClickHouseBackend::new(&ch_config)
        .ensure_schema()
        .await
        .context("failed to apply schema")?;

    Ok(json!({ "ddl": ddl, "applied": true, "database": ch_config.database }))
}

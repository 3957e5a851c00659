//! Query result types
//!
//! Unified result format across all backends (ClickHouse, Polars).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Unified query result across all backends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column definitions
    pub columns: Vec<Column>,

    /// Row data as JSON values (backend-agnostic)
    pub rows: Vec<Vec<Value>>,

    /// Total row count
    pub row_count: usize,

    /// Query execution time in milliseconds
    pub execution_time_ms: u64,
}

impl QueryResult {
    /// Create a new query result
    pub fn new(columns: Vec<Column>, rows: Vec<Vec<Value>>, execution_time_ms: u64) -> Self {
        let row_count = rows.len();
        Self {
            columns,
            rows,
            row_count,
            execution_time_ms,
        }
    }

    /// Create an empty result
    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new(), 0)
    }

    /// Check if result is empty
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Get column names
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Position of a column by name
    ///
    /// Backends disagree on column order (ClickHouse JSON keys, Polars
    /// projection order), so readers look columns up by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Cell at `row` in the named column
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// Rows as JSON objects keyed by column name
    pub fn to_objects(&self) -> Vec<serde_json::Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row.iter())
                    .map(|(col, value)| (col.name.clone(), value.clone()))
                    .collect()
            })
            .collect()
    }
}

/// Column definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    /// Column name
    pub name: String,

    /// Data type
    pub data_type: DataType,

    /// Whether the column is nullable
    pub nullable: bool,
}

impl Column {
    /// Create a new column definition
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
        }
    }
}

/// Data types supported in query results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Signed 64-bit integer
    Int64,
    /// Unsigned 64-bit integer
    UInt64,
    /// 64-bit floating point
    Float64,
    /// UTF-8 string
    String,
    /// Boolean
    Boolean,
    /// Timestamp (milliseconds since epoch)
    Timestamp,
    /// JSON object
    Json,
    /// Unknown/other type
    Unknown,
}

impl DataType {
    /// Convert from Polars data type
    pub fn from_polars(dtype: &polars::datatypes::DataType) -> Self {
        use polars::datatypes::DataType as PDT;
        match dtype {
            PDT::Int8 | PDT::Int16 | PDT::Int32 | PDT::Int64 => DataType::Int64,
            PDT::UInt8 | PDT::UInt16 | PDT::UInt32 | PDT::UInt64 => DataType::UInt64,
            PDT::Float32 | PDT::Float64 => DataType::Float64,
            PDT::String => DataType::String,
            PDT::Boolean => DataType::Boolean,
            PDT::Datetime(_, _) | PDT::Date => DataType::Timestamp,
            PDT::List(_) => DataType::Json,
            _ => DataType::Unknown,
        }
    }
}

/// Table information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInfo {
    /// Table name
    pub name: String,

    /// Estimated row count (if available)
    pub row_count: Option<u64>,

    /// Column definitions
    pub columns: Vec<Column>,
}

impl TableInfo {
    /// Create new table info with just a name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            row_count: None,
            columns: Vec::new(),
        }
    }

    /// Add columns to table info
    pub fn with_columns(mut self, columns: Vec<Column>) -> Self {
        self.columns = columns;
        self
    }

    /// Set the row count
    pub fn with_row_count(mut self, row_count: u64) -> Self {
        self.row_count = Some(row_count);
        self
    }
}

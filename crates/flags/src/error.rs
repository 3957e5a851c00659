//! Feature flag error types

use thiserror::Error;

/// Result type for flag operations
pub type Result<T> = std::result::Result<T, FlagError>;

/// Errors from flag administration and evaluation
#[derive(Debug, Error)]
pub enum FlagError {
    /// No flag with this key
    #[error("flag not found: {0}")]
    NotFound(String),

    /// A flag with this key already exists
    #[error("flag already exists: {0}")]
    AlreadyExists(String),

    /// Rollout percentage outside 0..=100
    #[error("invalid rollout percentage: {0} (must be between 0 and 100)")]
    InvalidRollout(f64),

    /// Malformed flag definition
    #[error("invalid flag: {0}")]
    InvalidInput(String),

    /// Storage failure
    #[error("database error: {0}")]
    Database(String),
}

impl FlagError {
    /// Whether the caller is at fault rather than the store
    pub fn is_client_error(&self) -> bool {
        !matches!(self, FlagError::Database(_))
    }
}

impl From<sqlx::Error> for FlagError {
    fn from(err: sqlx::Error) -> Self {
        FlagError::Database(err.to_string())
    }
}

//! MiniHog Configuration
//!
//! TOML-based configuration loading with sensible defaults.
//! An empty file is a valid config: an in-memory local event store, a flag
//! database under `data/`, and console logging.
//!
//! # Parsing
//!
//! ```
//! use minihog_config::Config;
//! use std::str::FromStr;
//!
//! let config = Config::from_str("[store]\nbackend = \"local\"").unwrap();
//! ```
//!
//! # Example Config
//!
//! ```toml
//! [log]
//! level = "info"
//!
//! [store]
//! backend = "clickhouse"
//! url = "http://localhost:8123"
//! database = "analytics"
//!
//! [flags]
//! path = "data/flags.db"
//!
//! [analytics]
//! funnel_window = "14d"
//! retention_periods = 8
//! ```

mod error;
mod logging;

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use minihog_analytics::Period;
use serde::Deserialize;

pub use error::{ConfigError, Result};
pub use logging::{LogConfig, LogFormat, LogLevel, LogOutput};
pub use minihog_query::{QueryBackendType, QueryConfig};

/// Feature flag storage (`[flags]` section)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FlagsConfig {
    /// SQLite database file
    pub path: PathBuf,
}

impl Default for FlagsConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/flags.db"),
        }
    }
}

/// Engine defaults (`[analytics]` section)
///
/// Applied when a command does not say otherwise.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Funnel window, period token
    pub funnel_window: String,
    /// Retention lookback, period token
    pub retention_date_range: String,
    pub retention_periods: u32,
    /// Trends and event listing window, period token
    pub trends_period: String,
    pub top_events_limit: u32,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            funnel_window: "7d".to_string(),
            retention_date_range: "90d".to_string(),
            retention_periods: 12,
            trends_period: "7d".to_string(),
            top_events_limit: 10,
        }
    }
}

impl AnalyticsConfig {
    fn validate(&self) -> Result<()> {
        for (field, token) in [
            ("funnel_window", &self.funnel_window),
            ("retention_date_range", &self.retention_date_range),
            ("trends_period", &self.trends_period),
        ] {
            Period::parse(token)
                .map_err(|e| ConfigError::invalid_value("analytics", field, e.to_string()))?;
        }

        if !(1..=52).contains(&self.retention_periods) {
            return Err(ConfigError::invalid_value(
                "analytics",
                "retention_periods",
                format!("must be between 1 and 52, got {}", self.retention_periods),
            ));
        }

        if !(1..=1000).contains(&self.top_events_limit) {
            return Err(ConfigError::invalid_value(
                "analytics",
                "top_events_limit",
                format!("must be between 1 and 1000, got {}", self.top_events_limit),
            ));
        }

        Ok(())
    }
}

/// Main configuration structure
///
/// All sections are optional with sensible defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,

    /// Event store backend
    pub store: QueryConfig,

    /// Feature flag database
    pub flags: FlagsConfig,

    /// Engine defaults
    pub analytics: AnalyticsConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read, contains invalid TOML, or fails
    /// validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        Self::from_str(&contents)
    }

    /// Load from a file when given, defaults otherwise
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    fn parse(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.store
            .validate()
            .map_err(|e| ConfigError::invalid_value("store", "backend", e.to_string()))?;

        if self.flags.path.as_os_str().is_empty() {
            return Err(ConfigError::invalid_value("flags", "path", "cannot be empty"));
        }

        self.analytics.validate()
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

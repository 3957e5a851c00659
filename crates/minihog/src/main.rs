//! MiniHog - product analytics from the command line
//!
//! Every command prints one JSON envelope to stdout:
//! `{"success": true, "data": ...}` or `{"success": false, "error": "..."}`.
//!
//! # Usage
//!
//! ```bash
//! minihog --config minihog.toml ingest events.ndjson
//! minihog funnel --steps pageview,signup,purchase --window 14d
//! minihog retention --period-type weekly --periods 8
//! minihog flags create new-checkout --rollout 25
//! minihog flags evaluate new-checkout user-123
//! ```

mod cmd;
mod output;

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use minihog_config::{Config, LogConfig, LogFormat, LogLevel, LogOutput};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// MiniHog - product analytics from the command line
#[derive(Parser, Debug)]
#[command(name = "minihog")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file (defaults apply when omitted)
    #[arg(short, long, global = true, env = "MINIHOG_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). Overrides config file.
    #[arg(short, long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Conversion through an ordered list of events
    Funnel(cmd::analytics::FunnelArgs),

    /// Cohort retention
    Retention(cmd::analytics::RetentionArgs),

    /// Event counts over time
    Trends(cmd::analytics::TrendsArgs),

    /// Daily, weekly and monthly active users
    ActiveUsers,

    /// Most frequent events
    TopEvents(cmd::analytics::TopEventsArgs),

    /// List raw events, newest first
    Events(cmd::analytics::EventsArgs),

    /// Feature flag administration and evaluation
    Flags(cmd::flags::FlagsArgs),

    /// Append an NDJSON file of events as one batch
    Ingest(cmd::ingest::IngestArgs),

    /// Run a read-only SQL query against the event store
    Sql(cmd::sql::SqlArgs),

    /// Print (or apply) the ClickHouse events table DDL
    Schema(cmd::sql::SchemaArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let outcome = match setup(&cli) {
        Ok(config) => run(cli.command, &config).await,
        Err(e) => Err(e),
    };

    std::process::exit(output::emit(outcome));
}

/// Load config and install logging
fn setup(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref()).context("failed to load config")?;

    if let Some(level) = &cli.log_level {
        let level: LogLevel = level.parse()?;
        config.log = config.log.with_level(level);
    }

    init_logging(&config.log)?;
    Ok(config)
}

async fn run(command: Command, config: &Config) -> Result<serde_json::Value> {
    match command {
        Command::Funnel(args) => cmd::analytics::funnel(args, config).await,
        Command::Retention(args) => cmd::analytics::retention(args, config).await,
        Command::Trends(args) => cmd::analytics::trends(args, config).await,
        Command::ActiveUsers => cmd::analytics::active_users(config).await,
        Command::TopEvents(args) => cmd::analytics::top_events(args, config).await,
        Command::Events(args) => cmd::analytics::events(args, config).await,
        Command::Flags(args) => cmd::flags::run(args, config).await,
        Command::Ingest(args) => cmd::ingest::run(args, config).await,
        Command::Sql(args) => cmd::sql::run(args, config).await,
        Command::Schema(args) => cmd::sql::schema(args, config).await,
    }
}

/// Initialize the tracing subscriber for logging
fn init_logging(log: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_new(log.level.as_str())
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("invalid log level: {}", e))?;

    let writer = match &log.output {
        LogOutput::Stdout => BoxMakeWriter::new(std::io::stdout),
        LogOutput::Stderr => BoxMakeWriter::new(std::io::stderr),
        LogOutput::File(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file: {}", path))?;
            BoxMakeWriter::new(Arc::new(file))
        }
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match log.format {
        LogFormat::Console => registry
            .with(fmt::layer().with_target(true).with_writer(writer))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(writer))
            .try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install logger: {}", e))
}

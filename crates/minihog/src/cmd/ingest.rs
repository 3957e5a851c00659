//! Ingest command - append NDJSON events to the event store
//!
//! One JSON event per line; blank lines are skipped. The whole file is
//! written as a single batch, so a bad line rejects everything.
//!
//! ```bash
//! minihog ingest events.ndjson
//! cat events.ndjson | minihog ingest -
//! ```

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use minihog_config::Config;
use minihog_query::{Event, EventWriter};
use serde_json::{json, Value};
use tracing::info;

use super::event_store;

#[derive(Args, Debug)]
pub struct IngestArgs {
    /// NDJSON file, or `-` for stdin
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
}

/// Run the ingest command
pub async fn run(args: IngestArgs, config: &Config) -> Result<Value> {
    let contents = if args.file.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read stdin")?;
        buf
    } else {
        std::fs::read_to_string(&args.file)
            .with_context(|| format!("failed to read {}", args.file.display()))?
    };

    let events = parse_ndjson(&contents)?;
    let engine = event_store(config)?;
    let written = engine
        .append(&events)
        .await
        .context("failed to append events")?;

    info!(written, backend = engine.backend_name(), "ingested events");
    Ok(json!({ "written": written, "backend": engine.backend_name() }))
}

/// Parse newline-delimited events
pub fn parse_ndjson(contents: &str) -> Result<Vec<Event>> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str::<Event>(line).with_context(|| format!("line {}", i + 1))
        })
        .collect()
}

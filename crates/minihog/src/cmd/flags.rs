//! Flags command - feature flag administration and evaluation
//!
//! # Usage
//!
//! ```bash
//! minihog flags create new-checkout --rollout 25 --name "New checkout"
//! minihog flags update new-checkout --rollout 50
//! minihog flags evaluate new-checkout user-123
//! minihog flags decision new-checkout user-123
//! minihog flags clear-decisions new-checkout
//! ```

use anyhow::Result;
use clap::{Args, Subcommand};
use minihog_config::Config;
use minihog_flags::{FlagService, FlagUpdate, NewFlag};
use serde_json::{json, Value};

use super::flag_service;
use crate::output::to_data;

/// Flags command arguments
#[derive(Args, Debug)]
pub struct FlagsArgs {
    #[command(subcommand)]
    pub command: FlagsCommand,
}

#[derive(Subcommand, Debug)]
pub enum FlagsCommand {
    /// List all flags
    List,

    /// Show one flag
    Get { key: String },

    /// Create a flag
    Create(CreateArgs),

    /// Change a flag (recorded decisions are kept)
    Update(UpdateArgs),

    /// Delete a flag and its decisions
    Delete { key: String },

    /// Evaluate a flag for a user
    Evaluate { key: String, distinct_id: String },

    /// Show the recorded decision for a user
    Decision { key: String, distinct_id: String },

    /// Forget every recorded decision for a flag
    ClearDecisions { key: String },
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    pub key: String,

    /// Percentage of new users in treatment (0-100)
    #[arg(short, long, default_value = "0")]
    pub rollout: f64,

    /// Display name (defaults to the key)
    #[arg(short, long)]
    pub name: Option<String>,

    #[arg(short, long)]
    pub description: Option<String>,

    /// Create the flag switched off
    #[arg(long)]
    pub inactive: bool,
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    pub key: String,

    #[arg(short, long)]
    pub rollout: Option<f64>,

    #[arg(short, long)]
    pub name: Option<String>,

    #[arg(short, long)]
    pub description: Option<String>,

    /// Switch the flag on or off
    #[arg(short, long)]
    pub active: Option<bool>,
}

impl From<CreateArgs> for NewFlag {
    fn from(args: CreateArgs) -> Self {
        let mut flag = NewFlag::new(args.key, args.rollout);
        if let Some(name) = args.name {
            flag = flag.with_name(name);
        }
        if let Some(description) = args.description {
            flag = flag.with_description(description);
        }
        if args.inactive {
            flag = flag.inactive();
        }
        flag
    }
}

impl From<&UpdateArgs> for FlagUpdate {
    fn from(args: &UpdateArgs) -> Self {
        FlagUpdate {
            name: args.name.clone(),
            description: args.description.clone(),
            active: args.active,
            rollout_percentage: args.rollout,
        }
    }
}

/// Run the flags command
pub async fn run(args: FlagsArgs, config: &Config) -> Result<Value> {
    let service = flag_service(config).await?;
    execute(&service, args.command).await
}

async fn execute(service: &FlagService, command: FlagsCommand) -> Result<Value> {
    match command {
        FlagsCommand::List => to_data(&service.list().await?),
        FlagsCommand::Get { key } => to_data(&service.get(&key).await?),
        FlagsCommand::Create(args) => to_data(&service.create(&args.into()).await?),
        FlagsCommand::Update(args) => {
            let update = FlagUpdate::from(&args);
            if update.is_empty() {
                anyhow::bail!("nothing to update for flag '{}'", args.key);
            }
            to_data(&service.update(&args.key, &update).await?)
        }
        FlagsCommand::Delete { key } => {
            service.delete(&key).await?;
            Ok(json!({ "deleted": key }))
        }
        FlagsCommand::Evaluate { key, distinct_id } => {
            to_data(&service.evaluate(&key, &distinct_id).await?)
        }
        FlagsCommand::Decision { key, distinct_id } => {
            to_data(&service.decision(&key, &distinct_id).await?)
        }
        FlagsCommand::ClearDecisions { key } => {
            let cleared = service.clear_decisions(&key).await?;
            Ok(json!({ "flag_key": key, "cleared": cleared }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use minihog_flags::SqliteFlagStore;

    async fn service() -> FlagService {
        FlagService::new(Arc::new(SqliteFlagStore::in_memory().await.unwrap()))
    }

    fn create(key: &str, rollout: f64) -> FlagsCommand {
        FlagsCommand::Create(CreateArgs {
            key: key.to_string(),
            rollout,
            name: None,
            description: None,
            inactive: false,
        })
    }

    #[tokio::test]
    async fn test_create_then_evaluate() {
        let service = service().await;

        let created = execute(&service, create("beta", 100.0)).await.unwrap();
        assert_eq!(created["key"], "beta");
        assert_eq!(created["name"], "beta");

        let evaluation = execute(
            &service,
            FlagsCommand::Evaluate {
                key: "beta".to_string(),
                distinct_id: "alice".to_string(),
            },
        )
        .await
        .unwrap();
        assert_eq!(evaluation["enabled"], true);
        assert_eq!(evaluation["variant"], "treatment");

        let decision = execute(
            &service,
            FlagsCommand::Decision {
                key: "beta".to_string(),
                distinct_id: "alice".to_string(),
            },
        )
        .await
        .unwrap();
        assert_eq!(decision["variant"], "treatment");
    }

    #[tokio::test]
    async fn test_empty_update_is_rejected() {
        let service = service().await;
        execute(&service, create("beta", 10.0)).await.unwrap();

        let err = execute(
            &service,
            FlagsCommand::Update(UpdateArgs {
                key: "beta".to_string(),
                rollout: None,
                name: None,
                description: None,
                active: None,
            }),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("nothing to update"));
    }

    #[tokio::test]
    async fn test_clear_and_delete() {
        let service = service().await;
        execute(&service, create("beta", 100.0)).await.unwrap();
        service.evaluate("beta", "alice").await.unwrap();

        let cleared = execute(
            &service,
            FlagsCommand::ClearDecisions {
                key: "beta".to_string(),
            },
        )
        .await
        .unwrap();
        assert_eq!(cleared["cleared"], 1);

        execute(
            &service,
            FlagsCommand::Delete {
                key: "beta".to_string(),
            },
        )
        .await
        .unwrap();
        let missing = execute(
            &service,
            FlagsCommand::Get {
                key: "beta".to_string(),
            },
        )
        .await;
        assert!(missing.is_err());
    }

    #[test]
    fn test_create_args_into_new_flag() {
        let flag: NewFlag = CreateArgs {
            key: "dark-mode".to_string(),
            rollout: 25.0,
            name: Some("Dark mode".to_string()),
            description: None,
            inactive: true,
        }
        .into();

        assert_eq!(flag.name, "Dark mode");
        assert_eq!(flag.rollout_percentage, 25.0);
        assert!(!flag.active);
    }
}

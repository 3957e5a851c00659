//! MiniHog Feature Flags
//!
//! Percentage rollouts with deterministic, sticky user bucketing.
//!
//! # Overview
//!
//! - [`bucket_hash`] maps `(distinct_id, flag_key)` to a stable value in `[0, 1)`
//! - [`FlagService`] evaluates flags and records the first decision per user
//! - [`FlagStore`] abstracts storage; [`SqliteFlagStore`] is the SQLite implementation
//!
//! # Usage
//!
//! ```ignore
//! let store = SqliteFlagStore::open("data/flags.db").await?;
//! let flags = FlagService::new(Arc::new(store));
//!
//! flags.create(&NewFlag::new("new-checkout", 25.0)).await?;
//! let eval = flags.evaluate("new-checkout", "user-123").await?;
//! ```

mod error;
mod hash;
mod model;
mod service;
mod sqlite;
mod store;

pub use error::{FlagError, Result};
pub use hash::bucket_hash;
pub use model::{
    validate_rollout, FeatureFlag, FlagDecision, FlagEvaluation, FlagUpdate, NewFlag, Variant,
};
pub use service::{FlagService, REASON_INACTIVE, REASON_NOT_FOUND, REASON_STICKY};
pub use sqlite::SqliteFlagStore;
pub use store::FlagStore;

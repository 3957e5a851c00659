//! Flag store trait for abstracting storage backends

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{FeatureFlag, FlagDecision, FlagUpdate, NewFlag};

/// Storage for flags and their sticky decisions
#[async_trait]
pub trait FlagStore: Send + Sync {
    // Flags

    /// All flags, ordered by key
    async fn list_flags(&self) -> Result<Vec<FeatureFlag>>;

    async fn get_flag(&self, key: &str) -> Result<Option<FeatureFlag>>;

    /// Fails with `AlreadyExists` on a duplicate key
    async fn create_flag(&self, flag: &NewFlag) -> Result<FeatureFlag>;

    /// Fails with `NotFound` when the flag is absent
    async fn update_flag(&self, key: &str, update: &FlagUpdate) -> Result<FeatureFlag>;

    /// Delete a flag and its decisions; `false` when absent
    async fn delete_flag(&self, key: &str) -> Result<bool>;

    // Decisions

    async fn get_decision(&self, distinct_id: &str, flag_key: &str)
        -> Result<Option<FlagDecision>>;

    /// Insert a decision, or return the one already stored for the pair
    ///
    /// The returned decision is the one that persisted.
    async fn record_decision(&self, decision: &FlagDecision) -> Result<FlagDecision>;

    /// Remove all decisions for a flag; returns how many were removed
    async fn clear_decisions(&self, flag_key: &str) -> Result<u64>;
}

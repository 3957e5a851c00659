//! Flag evaluation and administration
//!
//! Evaluation is sticky: the first decision recorded for a user and flag is
//! returned forever after, whatever later happens to the rollout. New users
//! are bucketed by [`bucket_hash`].

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::{FlagError, Result};
use crate::hash::bucket_hash;
use crate::model::{FeatureFlag, FlagDecision, FlagEvaluation, FlagUpdate, NewFlag, Variant};
use crate::store::FlagStore;

pub const REASON_NOT_FOUND: &str = "Flag not found";
pub const REASON_INACTIVE: &str = "Flag is inactive";
pub const REASON_STICKY: &str = "Sticky bucketing";

/// Flag service over a store
#[derive(Clone)]
pub struct FlagService {
    store: Arc<dyn FlagStore>,
}

impl FlagService {
    pub fn new(store: Arc<dyn FlagStore>) -> Self {
        Self { store }
    }

    /// Evaluate a flag for a user
    pub async fn evaluate(&self, flag_key: &str, distinct_id: &str) -> Result<FlagEvaluation> {
        let Some(flag) = self.store.get_flag(flag_key).await? else {
            return Ok(FlagEvaluation::control(flag_key, REASON_NOT_FOUND));
        };

        if !flag.active {
            return Ok(FlagEvaluation::control(flag_key, REASON_INACTIVE));
        }

        if let Some(existing) = self.store.get_decision(distinct_id, flag_key).await? {
            return Ok(sticky(flag_key, &existing));
        }

        let hash_value = bucket_hash(distinct_id, flag_key);
        let bucket = hash_value * 100.0;
        let variant = if bucket < flag.rollout_percentage {
            Variant::Treatment
        } else {
            Variant::Control
        };

        let candidate = FlagDecision {
            distinct_id: distinct_id.to_string(),
            flag_key: flag_key.to_string(),
            variant,
            hash_value,
            decided_at: Utc::now(),
        };
        let stored = self.store.record_decision(&candidate).await?;

        if stored != candidate {
            warn!(
                flag_key = %flag_key,
                distinct_id = %distinct_id,
                variant = %stored.variant,
                "lost decision race, returning stored variant"
            );
            return Ok(sticky(flag_key, &stored));
        }

        debug!(
            flag_key = %flag_key,
            distinct_id = %distinct_id,
            variant = %variant,
            bucket,
            "bucketed user"
        );

        Ok(FlagEvaluation {
            key: flag_key.to_string(),
            enabled: variant.is_enabled(),
            variant,
            reason: format!("Bucketed at {:.2}%", bucket),
        })
    }

    pub async fn list(&self) -> Result<Vec<FeatureFlag>> {
        self.store.list_flags().await
    }

    /// Get a flag, failing with `NotFound`
    pub async fn get(&self, key: &str) -> Result<FeatureFlag> {
        self.store
            .get_flag(key)
            .await?
            .ok_or_else(|| FlagError::NotFound(key.to_string()))
    }

    pub async fn create(&self, flag: &NewFlag) -> Result<FeatureFlag> {
        self.store.create_flag(flag).await
    }

    pub async fn update(&self, key: &str, update: &FlagUpdate) -> Result<FeatureFlag> {
        self.store.update_flag(key, update).await
    }

    /// Delete a flag and its decisions, failing with `NotFound`
    pub async fn delete(&self, key: &str) -> Result<()> {
        if self.store.delete_flag(key).await? {
            Ok(())
        } else {
            Err(FlagError::NotFound(key.to_string()))
        }
    }

    /// The recorded decision for a user, if any
    pub async fn decision(&self, flag_key: &str, distinct_id: &str) -> Result<Option<FlagDecision>> {
        self.store.get_decision(distinct_id, flag_key).await
    }

    /// Forget every decision for a flag so users are bucketed afresh
    pub async fn clear_decisions(&self, flag_key: &str) -> Result<u64> {
        self.get(flag_key).await?;
        self.store.clear_decisions(flag_key).await
    }
}

fn sticky(flag_key: &str, decision: &FlagDecision) -> FlagEvaluation {
    FlagEvaluation {
        key: flag_key.to_string(),
        enabled: decision.variant.is_enabled(),
        variant: decision.variant,
        reason: REASON_STICKY.to_string(),
    }
}

#[cfg(test)]
#[path = "service_test.rs"]
mod service_test;

//! Tests for flag evaluation

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{FlagError, Result};
use crate::model::{FeatureFlag, FlagDecision, FlagUpdate, NewFlag, Variant};
use crate::service::{FlagService, REASON_INACTIVE, REASON_NOT_FOUND, REASON_STICKY};
use crate::sqlite::SqliteFlagStore;
use crate::store::FlagStore;

async fn service_with(flags: &[NewFlag]) -> FlagService {
    let store = SqliteFlagStore::in_memory().await.unwrap();
    for flag in flags {
        store.create_flag(flag).await.unwrap();
    }
    FlagService::new(Arc::new(store))
}

#[tokio::test]
async fn test_missing_flag_is_control() {
    let service = service_with(&[]).await;

    let result = service.evaluate("ghost", "alice").await.unwrap();

    assert!(!result.enabled);
    assert_eq!(result.variant, Variant::Control);
    assert_eq!(result.reason, REASON_NOT_FOUND);
    assert_eq!(result.key, "ghost");
}

#[tokio::test]
async fn test_inactive_flag_is_control_and_not_recorded() {
    let service = service_with(&[NewFlag::new("beta", 100.0).inactive()]).await;

    let result = service.evaluate("beta", "alice").await.unwrap();

    assert_eq!(result.variant, Variant::Control);
    assert_eq!(result.reason, REASON_INACTIVE);
    assert!(service.decision("beta", "alice").await.unwrap().is_none());
}

#[tokio::test]
async fn test_first_evaluation_reports_bucket() {
    // sha256("user-1:new-checkout") lands at 33.53
    let service = service_with(&[NewFlag::new("new-checkout", 50.0)]).await;

    let result = service.evaluate("new-checkout", "user-1").await.unwrap();

    assert!(result.enabled);
    assert_eq!(result.variant, Variant::Treatment);
    assert_eq!(result.reason, "Bucketed at 33.53%");

    let stored = service.decision("new-checkout", "user-1").await.unwrap().unwrap();
    assert_eq!(stored.variant, Variant::Treatment);
}

#[tokio::test]
async fn test_bucket_equal_to_rollout_is_control() {
    let service = service_with(&[NewFlag::new("new-checkout", 33.0)]).await;

    let result = service.evaluate("new-checkout", "user-1").await.unwrap();

    assert_eq!(result.variant, Variant::Control);
    assert!(!result.enabled);
}

#[tokio::test]
async fn test_sticky_across_rollout_changes() {
    let service = service_with(&[NewFlag::new("beta", 100.0)]).await;

    let first = service.evaluate("beta", "alice").await.unwrap();
    assert_eq!(first.variant, Variant::Treatment);

    service
        .update(
            "beta",
            &FlagUpdate {
                rollout_percentage: Some(0.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let again = service.evaluate("beta", "alice").await.unwrap();
    assert_eq!(again.variant, Variant::Treatment);
    assert!(again.enabled);
    assert_eq!(again.reason, REASON_STICKY);

    // New users follow the new rollout
    let newcomer = service.evaluate("beta", "bob").await.unwrap();
    assert_eq!(newcomer.variant, Variant::Control);
}

#[tokio::test]
async fn test_zero_rollout_disables_everyone() {
    let service = service_with(&[NewFlag::new("off", 0.0)]).await;

    for i in 0..1000 {
        let result = service.evaluate("off", &format!("user-{}", i)).await.unwrap();
        assert!(!result.enabled);
        assert_eq!(result.variant, Variant::Control);
    }
}

#[tokio::test]
async fn test_full_rollout_enables_everyone() {
    let service = service_with(&[NewFlag::new("on", 100.0)]).await;

    for i in 0..200 {
        let result = service.evaluate("on", &format!("user-{}", i)).await.unwrap();
        assert!(result.enabled);
    }
}

#[tokio::test]
async fn test_rollout_converges() {
    let service = service_with(&[NewFlag::new("half", 30.0)]).await;

    let mut enabled = 0;
    for i in 0..2000 {
        if service
            .evaluate("half", &format!("user-{}", i))
            .await
            .unwrap()
            .enabled
        {
            enabled += 1;
        }
    }

    let share = enabled as f64 / 2000.0 * 100.0;
    assert!((share - 30.0).abs() < 5.0, "share was {}", share);
}

#[tokio::test]
async fn test_clear_decisions_rebuckets() {
    let service = service_with(&[NewFlag::new("beta", 100.0)]).await;
    service.evaluate("beta", "alice").await.unwrap();

    service
        .update(
            "beta",
            &FlagUpdate {
                rollout_percentage: Some(0.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(service.clear_decisions("beta").await.unwrap(), 1);

    let result = service.evaluate("beta", "alice").await.unwrap();
    assert_eq!(result.variant, Variant::Control);
    assert!(result.reason.starts_with("Bucketed at"));
}

#[tokio::test]
async fn test_admin_not_found() {
    let service = service_with(&[]).await;

    assert!(matches!(service.get("ghost").await, Err(FlagError::NotFound(_))));
    assert!(matches!(service.delete("ghost").await, Err(FlagError::NotFound(_))));
    assert!(matches!(
        service.clear_decisions("ghost").await,
        Err(FlagError::NotFound(_))
    ));
}

/// Store whose decision lookups miss, so every evaluation races an insert
/// that some other evaluation already made
struct RacingStore {
    inner: SqliteFlagStore,
}

#[async_trait]
impl FlagStore for RacingStore {
    async fn list_flags(&self) -> Result<Vec<FeatureFlag>> {
        self.inner.list_flags().await
    }

    async fn get_flag(&self, key: &str) -> Result<Option<FeatureFlag>> {
        self.inner.get_flag(key).await
    }

    async fn create_flag(&self, flag: &NewFlag) -> Result<FeatureFlag> {
        self.inner.create_flag(flag).await
    }

    async fn update_flag(&self, key: &str, update: &FlagUpdate) -> Result<FeatureFlag> {
        self.inner.update_flag(key, update).await
    }

    async fn delete_flag(&self, key: &str) -> Result<bool> {
        self.inner.delete_flag(key).await
    }

    async fn get_decision(&self, _: &str, _: &str) -> Result<Option<FlagDecision>> {
        Ok(None)
    }

    async fn record_decision(&self, decision: &FlagDecision) -> Result<FlagDecision> {
        self.inner.record_decision(decision).await
    }

    async fn clear_decisions(&self, flag_key: &str) -> Result<u64> {
        self.inner.clear_decisions(flag_key).await
    }
}

#[tokio::test]
async fn test_race_loser_returns_stored_decision() {
    let inner = SqliteFlagStore::in_memory().await.unwrap();
    inner.create_flag(&NewFlag::new("beta", 100.0)).await.unwrap();
    inner
        .record_decision(&FlagDecision {
            distinct_id: "alice".to_string(),
            flag_key: "beta".to_string(),
            variant: Variant::Control,
            hash_value: 0.99,
            decided_at: Utc::now(),
        })
        .await
        .unwrap();

    let service = FlagService::new(Arc::new(RacingStore { inner }));
    let result = service.evaluate("beta", "alice").await.unwrap();

    assert_eq!(result.variant, Variant::Control);
    assert!(!result.enabled);
    assert_eq!(result.reason, REASON_STICKY);
}

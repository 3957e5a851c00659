//! Tests for the SQLite flag store

use chrono::Utc;

use crate::error::FlagError;
use crate::model::{FlagDecision, FlagUpdate, NewFlag, Variant};
use crate::sqlite::SqliteFlagStore;
use crate::store::FlagStore;

fn decision(user: &str, flag: &str, variant: Variant) -> FlagDecision {
    FlagDecision {
        distinct_id: user.to_string(),
        flag_key: flag.to_string(),
        variant,
        hash_value: 0.42,
        decided_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_create_and_get_flag() {
    let store = SqliteFlagStore::in_memory().await.unwrap();

    let created = store
        .create_flag(
            &NewFlag::new("new-checkout", 25.0)
                .with_name("New checkout")
                .with_description("Single page checkout"),
        )
        .await
        .unwrap();

    let fetched = store.get_flag("new-checkout").await.unwrap().unwrap();
    assert_eq!(fetched.key, created.key);
    assert_eq!(fetched.name, "New checkout");
    assert_eq!(fetched.description.as_deref(), Some("Single page checkout"));
    assert!(fetched.active);
    assert_eq!(fetched.rollout_percentage, 25.0);
    assert_eq!(fetched.created_at, fetched.updated_at);

    assert!(store.get_flag("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_duplicate_key() {
    let store = SqliteFlagStore::in_memory().await.unwrap();
    store.create_flag(&NewFlag::new("beta", 10.0)).await.unwrap();

    let err = store
        .create_flag(&NewFlag::new("beta", 50.0))
        .await
        .unwrap_err();

    assert!(matches!(err, FlagError::AlreadyExists(key) if key == "beta"));
}

#[tokio::test]
async fn test_create_rejects_bad_rollout() {
    let store = SqliteFlagStore::in_memory().await.unwrap();

    for rollout in [-1.0, 100.5, f64::NAN] {
        let err = store
            .create_flag(&NewFlag::new("beta", rollout))
            .await
            .unwrap_err();
        assert!(matches!(err, FlagError::InvalidRollout(_)));
    }
    assert!(store.list_flags().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_fractional_rollout_round_trips() {
    let store = SqliteFlagStore::in_memory().await.unwrap();
    store
        .create_flag(&NewFlag::new("canary", 12.5))
        .await
        .unwrap();

    let fetched = store.get_flag("canary").await.unwrap().unwrap();
    assert_eq!(fetched.rollout_percentage, 12.5);
}

#[tokio::test]
async fn test_list_flags_sorted() {
    let store = SqliteFlagStore::in_memory().await.unwrap();
    for key in ["zeta", "alpha", "mid"] {
        store.create_flag(&NewFlag::new(key, 0.0)).await.unwrap();
    }

    let keys: Vec<String> = store
        .list_flags()
        .await
        .unwrap()
        .into_iter()
        .map(|f| f.key)
        .collect();
    assert_eq!(keys, vec!["alpha", "mid", "zeta"]);
}

#[tokio::test]
async fn test_partial_update() {
    let store = SqliteFlagStore::in_memory().await.unwrap();
    let created = store
        .create_flag(&NewFlag::new("beta", 10.0).with_name("Beta"))
        .await
        .unwrap();

    let updated = store
        .update_flag(
            "beta",
            &FlagUpdate {
                rollout_percentage: Some(60.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.rollout_percentage, 60.0);
    assert_eq!(updated.name, "Beta");
    assert!(updated.updated_at >= created.updated_at);

    let stored = store.get_flag("beta").await.unwrap().unwrap();
    assert_eq!(stored.rollout_percentage, 60.0);
    assert_eq!(stored.created_at, created.created_at);
}

#[tokio::test]
async fn test_update_missing_and_invalid() {
    let store = SqliteFlagStore::in_memory().await.unwrap();

    let err = store
        .update_flag("ghost", &FlagUpdate::default())
        .await
        .unwrap_err();
    assert!(matches!(err, FlagError::NotFound(_)));

    store.create_flag(&NewFlag::new("beta", 10.0)).await.unwrap();
    let err = store
        .update_flag(
            "beta",
            &FlagUpdate {
                rollout_percentage: Some(101.0),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, FlagError::InvalidRollout(_)));
}

#[tokio::test]
async fn test_record_decision_keeps_first() {
    let store = SqliteFlagStore::in_memory().await.unwrap();

    let first = store
        .record_decision(&decision("alice", "beta", Variant::Treatment))
        .await
        .unwrap();
    assert_eq!(first.variant, Variant::Treatment);

    let second = store
        .record_decision(&decision("alice", "beta", Variant::Control))
        .await
        .unwrap();
    assert_eq!(second.variant, Variant::Treatment);

    let stored = store.get_decision("alice", "beta").await.unwrap().unwrap();
    assert_eq!(stored.variant, Variant::Treatment);
    assert_eq!(stored.hash_value, 0.42);
}

#[tokio::test]
async fn test_delete_flag_removes_decisions() {
    let store = SqliteFlagStore::in_memory().await.unwrap();
    store.create_flag(&NewFlag::new("beta", 10.0)).await.unwrap();
    store
        .record_decision(&decision("alice", "beta", Variant::Control))
        .await
        .unwrap();

    assert!(store.delete_flag("beta").await.unwrap());
    assert!(store.get_flag("beta").await.unwrap().is_none());
    assert!(store.get_decision("alice", "beta").await.unwrap().is_none());

    assert!(!store.delete_flag("beta").await.unwrap());
}

#[tokio::test]
async fn test_clear_decisions_scoped_to_flag() {
    let store = SqliteFlagStore::in_memory().await.unwrap();
    for user in ["a", "b", "c"] {
        store
            .record_decision(&decision(user, "beta", Variant::Control))
            .await
            .unwrap();
    }
    store
        .record_decision(&decision("a", "other", Variant::Treatment))
        .await
        .unwrap();

    assert_eq!(store.clear_decisions("beta").await.unwrap(), 3);
    assert!(store.get_decision("a", "beta").await.unwrap().is_none());
    assert!(store.get_decision("a", "other").await.unwrap().is_some());
}

#[tokio::test]
async fn test_open_persists_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("flags.db");

    {
        let store = SqliteFlagStore::open(&path).await.unwrap();
        store.create_flag(&NewFlag::new("beta", 30.0)).await.unwrap();
    }

    let reopened = SqliteFlagStore::open(&path).await.unwrap();
    let flag = reopened.get_flag("beta").await.unwrap().unwrap();
    assert_eq!(flag.rollout_percentage, 30.0);
}

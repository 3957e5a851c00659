//! Tests for the funnel engine

use std::sync::Arc;

use serde_json::json;

use crate::error::AnalyticsError;
use crate::funnel::{FunnelEngine, FunnelQuery, FunnelStep, StepOrder};
use crate::test_utils::{at_days, at_hours, event, t0, FakeEventStore};

fn query(steps: &[&str]) -> FunnelQuery {
    let mut query = FunnelQuery::new(steps.iter().map(|s| FunnelStep::new(*s)).collect());
    query.from = Some(t0());
    query.to = Some(at_days(7));
    query
}

fn engine(store: FakeEventStore) -> FunnelEngine {
    FunnelEngine::new(Arc::new(store))
}

#[tokio::test]
async fn test_two_step_conversion() {
    let store = FakeEventStore::new(vec![
        event("pageview", "a", t0()),
        event("pageview", "b", t0()),
        event("purchase", "a", at_hours(1)),
    ]);

    let result = engine(store)
        .calculate_funnel(&query(&["pageview", "purchase"]))
        .await
        .unwrap();

    let counts: Vec<u64> = result.steps.iter().map(|s| s.users_count).collect();
    assert_eq!(counts, vec![2, 1]);
    assert_eq!(result.steps[0].completion_rate, 100.0);
    assert_eq!(result.steps[1].completion_rate, 50.0);
    assert_eq!(result.steps[0].drop_off_rate, 0.0);
    assert_eq!(result.steps[1].drop_off_rate, 50.0);
    assert_eq!(result.steps[0].avg_time_to_next.as_deref(), Some("1h"));
    assert_eq!(result.steps[1].avg_time_to_next, None);
    assert_eq!(result.total_users_entered, 2);
    assert_eq!(result.total_users_converted, 1);
    assert_eq!(result.total_conversion_rate, 50.0);
    assert_eq!(result.average_completion_time.as_deref(), Some("1h"));
    assert_eq!(result.time_window, "7d");
}

#[tokio::test]
async fn test_step_before_previous_does_not_count() {
    let store = FakeEventStore::new(vec![
        event("purchase", "a", t0()),
        event("pageview", "a", at_hours(1)),
        event("pageview", "b", at_hours(1)),
        event("purchase", "b", at_hours(3)),
    ]);

    let result = engine(store)
        .calculate_funnel(&query(&["pageview", "purchase"]))
        .await
        .unwrap();

    assert_eq!(result.steps[1].users_count, 1);
    assert_eq!(result.steps[0].avg_time_to_next.as_deref(), Some("2h"));
}

#[tokio::test]
async fn test_same_instant_is_not_after() {
    let store = FakeEventStore::new(vec![
        event("pageview", "a", t0()),
        event("signup", "a", t0()),
    ]);

    let result = engine(store)
        .calculate_funnel(&query(&["pageview", "signup"]))
        .await
        .unwrap();

    assert_eq!(result.steps[1].users_count, 0);
    assert_eq!(result.steps[0].avg_time_to_next, None);
    assert_eq!(result.average_completion_time, None);
}

#[tokio::test]
async fn test_strict_counts_never_increase() {
    let store = FakeEventStore::new(vec![
        event("pageview", "a", t0()),
        event("pageview", "b", t0()),
        event("pageview", "c", t0()),
        event("signup", "a", at_hours(1)),
        event("signup", "b", at_hours(2)),
        event("signup", "d", at_hours(2)),
        event("purchase", "a", at_hours(5)),
        event("purchase", "d", at_hours(6)),
        event("purchase", "c", at_hours(6)),
    ]);

    let result = engine(store)
        .calculate_funnel(&query(&["pageview", "signup", "purchase"]))
        .await
        .unwrap();

    let counts: Vec<u64> = result.steps.iter().map(|s| s.users_count).collect();
    assert_eq!(counts, vec![3, 2, 1]);
    assert!(counts.windows(2).all(|w| w[1] <= w[0]));

    let last = result.steps.last().unwrap();
    assert_eq!(result.total_conversion_rate, last.completion_rate);
    assert_eq!(last.completion_rate, 33.33);
    assert_eq!(result.steps[1].drop_off_rate, 33.33);
    assert_eq!(result.steps[2].drop_off_rate, 50.0);
    assert_eq!(result.steps[0].avg_time_to_next.as_deref(), Some("1h 30m"));
    assert_eq!(result.steps[1].avg_time_to_next.as_deref(), Some("4h"));
    assert_eq!(result.average_completion_time.as_deref(), Some("5h"));
}

#[tokio::test]
async fn test_earliest_occurrence_is_step_time() {
    let store = FakeEventStore::new(vec![
        event("pageview", "a", at_hours(2)),
        event("pageview", "a", t0()),
        event("purchase", "a", at_hours(1)),
    ]);

    let result = engine(store)
        .calculate_funnel(&query(&["pageview", "purchase"]))
        .await
        .unwrap();

    assert_eq!(result.steps[1].users_count, 1);
    assert_eq!(result.steps[0].avg_time_to_next.as_deref(), Some("1h"));
}

#[tokio::test]
async fn test_empty_store_yields_zero_rates() {
    let result = engine(FakeEventStore::new(Vec::new()))
        .calculate_funnel(&query(&["pageview", "purchase"]))
        .await
        .unwrap();

    assert_eq!(result.total_users_entered, 0);
    assert_eq!(result.total_conversion_rate, 0.0);
    assert_eq!(result.steps[0].completion_rate, 100.0);
    assert_eq!(result.steps[1].completion_rate, 0.0);
    assert_eq!(result.steps[1].drop_off_rate, 0.0);
}

#[tokio::test]
async fn test_no_entrants_skips_later_queries() {
    let store = Arc::new(FakeEventStore::new(Vec::new()));
    let engine = FunnelEngine::new(store.clone());

    engine
        .calculate_funnel(&query(&["pageview", "signup", "purchase"]))
        .await
        .unwrap();

    assert_eq!(store.queries().len(), 1);
}

#[tokio::test]
async fn test_later_steps_bind_entrants() {
    let store = Arc::new(FakeEventStore::new(vec![
        event("pageview", "a", t0()),
        event("purchase", "a", at_hours(1)),
    ]));
    let engine = FunnelEngine::new(store.clone());

    engine
        .calculate_funnel(&query(&["pageview", "purchase"]))
        .await
        .unwrap();

    let queries = store.queries();
    assert_eq!(queries.len(), 2);
    assert!(!queries[0].sql().contains("distinct_id IN"));
    assert!(queries[1].sql().contains("distinct_id IN ({u0:String})"));
    assert!(!queries[1].sql().contains("'a'"));
}

#[tokio::test]
async fn test_any_order_counts_independently() {
    let store = FakeEventStore::new(vec![
        event("pageview", "a", at_hours(2)),
        event("purchase", "a", t0()),
        event("purchase", "b", t0()),
    ]);

    let mut q = query(&["pageview", "purchase"]);
    q.step_order = StepOrder::AnyOrder;

    let result = engine(store).calculate_funnel(&q).await.unwrap();

    let counts: Vec<u64> = result.steps.iter().map(|s| s.users_count).collect();
    assert_eq!(counts, vec![1, 2]);
    assert_eq!(result.steps[1].completion_rate, 200.0);
    assert_eq!(result.steps[1].drop_off_rate, -100.0);
    assert_eq!(result.total_conversion_rate, 200.0);
    assert!(result.steps.iter().all(|s| s.avg_time_to_next.is_none()));
    assert_eq!(result.average_completion_time, None);
}

#[tokio::test]
async fn test_step_property_filter() {
    let store = FakeEventStore::new(vec![
        event("pageview", "a", t0()),
        event("pageview", "b", t0()),
        event("purchase", "a", at_hours(1)).with_property("plan", json!("pro")),
        event("purchase", "b", at_hours(1)).with_property("plan", json!("free")),
    ]);

    let q = FunnelQuery {
        steps: vec![
            FunnelStep::new("pageview").named("Landing"),
            FunnelStep::new("purchase").with_property("plan", "pro"),
        ],
        ..query(&[])
    };

    let result = engine(store).calculate_funnel(&q).await.unwrap();

    assert_eq!(result.steps[0].name, "Landing");
    assert_eq!(result.steps[1].name, "purchase");
    assert_eq!(result.steps[1].users_count, 1);
}

#[tokio::test]
async fn test_events_outside_window_ignored() {
    let store = FakeEventStore::new(vec![
        event("pageview", "a", t0()),
        event("purchase", "a", at_days(10)),
    ]);

    let result = engine(store)
        .calculate_funnel(&query(&["pageview", "purchase"]))
        .await
        .unwrap();

    assert_eq!(result.steps[1].users_count, 0);
}

#[tokio::test]
async fn test_single_step_rejected() {
    let err = engine(FakeEventStore::new(Vec::new()))
        .calculate_funnel(&query(&["pageview"]))
        .await
        .unwrap_err();

    assert!(matches!(err, AnalyticsError::InvalidFunnelDefinition(_)));
    assert!(err.is_client_error());
}

#[tokio::test]
async fn test_invalid_window_rejected() {
    let mut q = query(&["pageview", "purchase"]);
    q.from = None;
    q.time_window = "7x".to_string();

    let err = engine(FakeEventStore::new(Vec::new()))
        .calculate_funnel(&q)
        .await
        .unwrap_err();

    assert!(matches!(err, AnalyticsError::InvalidPeriodFormat(_)));
}

#[tokio::test]
async fn test_store_failure_surfaces() {
    let err = engine(FakeEventStore::unavailable())
        .calculate_funnel(&query(&["pageview", "purchase"]))
        .await
        .unwrap_err();

    assert!(matches!(err, AnalyticsError::Backend(_)));
    assert!(!err.is_client_error());
}

#[test]
fn test_query_deserializes_with_defaults() {
    let q: FunnelQuery = serde_json::from_value(json!({
        "steps": [{"event": "pageview"}, {"event": "purchase", "properties": {"plan": "pro"}}],
        "step_order": "any_order"
    }))
    .unwrap();

    assert_eq!(q.time_window, "7d");
    assert_eq!(q.step_order, StepOrder::AnyOrder);
    assert_eq!(q.steps[1].properties.as_ref().unwrap()["plan"], json!("pro"));
    assert!(q.from.is_none());
}

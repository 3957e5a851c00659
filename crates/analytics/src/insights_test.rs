//! Tests for the insights engine, run against the in-memory Polars store

use std::sync::Arc;

use minihog_query::{Event, EventWriter, PolarsBackend};
use serde_json::json;

use crate::error::AnalyticsError;
use crate::insights::{EventsQuery, InsightsEngine, TopEventsQuery, TrendsQuery};
use crate::test_utils::{at_days, at_hours, event, t0, FakeEventStore};
use crate::timerange::Interval;

async fn engine_with(events: Vec<Event>) -> InsightsEngine {
    let store = PolarsBackend::in_memory().unwrap();
    store.append(&events).await.unwrap();
    InsightsEngine::new(Arc::new(store))
}

fn sample_events() -> Vec<Event> {
    vec![
        event("pageview", "a", at_hours(1)),
        event("pageview", "b", at_hours(2)),
        event("pageview", "a", at_days(1)),
        event("signup", "a", at_days(1) + chrono::Duration::minutes(5)),
        event("pageview", "c", at_days(3)),
        event("purchase", "a", at_days(3))
            .with_property("plan", json!("pro"))
            .with_session("s-1"),
    ]
}

#[tokio::test]
async fn test_trends_by_day() {
    let engine = engine_with(sample_events()).await;

    let result = engine
        .trends(&TrendsQuery {
            from: Some(t0()),
            to: Some(at_days(7)),
            ..Default::default()
        })
        .await
        .unwrap();

    let series: Vec<(&str, u64)> = result
        .series
        .iter()
        .map(|p| (p.timestamp.as_str(), p.count))
        .collect();
    assert_eq!(
        series,
        vec![("2024-01-01", 2), ("2024-01-02", 2), ("2024-01-04", 2)]
    );
    assert_eq!(result.total, 6);
    assert_eq!(result.interval, Interval::Day);
    assert_eq!(result.period, "7d");
}

#[tokio::test]
async fn test_trends_for_one_event() {
    let engine = engine_with(sample_events()).await;

    let result = engine
        .trends(&TrendsQuery {
            event_name: Some("pageview".to_string()),
            from: Some(t0()),
            to: Some(at_days(7)),
            interval: Interval::Week,
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(result.series.len(), 1);
    assert_eq!(result.series[0].timestamp, "2024-01-01");
    assert_eq!(result.total, 4);
    assert_eq!(result.event_name.as_deref(), Some("pageview"));
}

#[tokio::test]
async fn test_trends_by_month() {
    let engine = engine_with(vec![
        event("pageview", "a", at_days(4)),
        event("pageview", "b", at_days(19) + chrono::Duration::hours(23)),
        event("pageview", "a", at_days(32)),
    ])
    .await;

    let result = engine
        .trends(&TrendsQuery {
            from: Some(t0()),
            to: Some(at_days(59)),
            interval: Interval::Month,
            ..Default::default()
        })
        .await
        .unwrap();

    let series: Vec<(&str, u64)> = result
        .series
        .iter()
        .map(|p| (p.timestamp.as_str(), p.count))
        .collect();
    assert_eq!(series, vec![("2024-01", 2), ("2024-02", 1)]);
    assert_eq!(result.total, 3);
}

#[tokio::test]
async fn test_trends_by_hour() {
    let engine = engine_with(sample_events()).await;

    let result = engine
        .trends(&TrendsQuery {
            event_name: Some("pageview".to_string()),
            from: Some(t0()),
            to: Some(at_days(1)),
            interval: Interval::Hour,
            ..Default::default()
        })
        .await
        .unwrap();

    let labels: Vec<&str> = result.series.iter().map(|p| p.timestamp.as_str()).collect();
    assert_eq!(
        labels,
        vec!["2024-01-01 01:00:00", "2024-01-01 02:00:00", "2024-01-02 00:00:00"]
    );
    assert_eq!(result.total, 3);
}

#[tokio::test]
async fn test_trends_empty_store() {
    let engine = engine_with(Vec::new()).await;

    let result = engine.trends(&TrendsQuery::default()).await.unwrap();

    assert!(result.series.is_empty());
    assert_eq!(result.total, 0);
}

#[tokio::test]
async fn test_trends_rejects_bad_period() {
    let engine = engine_with(Vec::new()).await;

    let err = engine
        .trends(&TrendsQuery {
            period: "1q".to_string(),
            ..Default::default()
        })
        .await
        .unwrap_err();

    assert!(matches!(err, AnalyticsError::InvalidPeriodFormat(_)));
}

#[tokio::test]
async fn test_active_users() {
    let now = at_days(30);
    let engine = engine_with(vec![
        event("pageview", "a", now - chrono::Duration::hours(3)),
        event("pageview", "a", at_days(26)),
        event("pageview", "b", at_days(26)),
        event("pageview", "c", at_days(5)),
        event("pageview", "d", at_days(-5)),
    ])
    .await;

    let result = engine.active_users(now).await.unwrap();

    assert_eq!(result.dau, 1);
    assert_eq!(result.wau, 2);
    assert_eq!(result.mau, 3);
    assert_eq!(result.calculated_at, now);
}

#[tokio::test]
async fn test_active_users_store_failure() {
    let engine = InsightsEngine::new(Arc::new(FakeEventStore::unavailable()));

    let err = engine.active_users(t0()).await.unwrap_err();

    assert!(matches!(err, AnalyticsError::Backend(_)));
}

#[tokio::test]
async fn test_top_events() {
    let engine = engine_with(sample_events()).await;

    let result = engine
        .top_events(&TopEventsQuery {
            limit: 2,
            from: Some(t0()),
            to: Some(at_days(7)),
        })
        .await
        .unwrap();

    assert_eq!(result.events.len(), 2);
    assert_eq!(result.events[0].event, "pageview");
    assert_eq!(result.events[0].count, 4);
    assert_eq!(result.events[1].event, "purchase");
    assert_eq!(result.total_events, 5);
    assert_eq!(result.events[0].percentage, 80.0);
    assert_eq!(result.events[1].percentage, 20.0);
    assert_eq!(result.period, None);
}

#[tokio::test]
async fn test_top_events_default_window() {
    let engine = engine_with(Vec::new()).await;

    let result = engine.top_events(&TopEventsQuery::default()).await.unwrap();

    assert!(result.events.is_empty());
    assert_eq!(result.total_events, 0);
    assert_eq!(result.period.as_deref(), Some("30d"));
}

#[tokio::test]
async fn test_top_events_limit_bounds() {
    let engine = engine_with(Vec::new()).await;

    for limit in [0, 1001] {
        let err = engine
            .top_events(&TopEventsQuery {
                limit,
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::OutOfRange(_)));
    }
}

#[tokio::test]
async fn test_events_pagination() {
    let engine = engine_with(sample_events()).await;

    let query = EventsQuery {
        page: 2,
        limit: 4,
        from: Some(t0()),
        to: Some(at_days(7)),
        ..Default::default()
    };
    let result = engine.events(&query).await.unwrap();

    assert_eq!(result.total, 6);
    assert_eq!(result.total_pages, 2);
    assert_eq!(result.page, 2);
    assert_eq!(result.events.len(), 2);
    assert_eq!(result.events[0].timestamp, at_hours(2));
    assert_eq!(result.events[1].timestamp, at_hours(1));
}

#[tokio::test]
async fn test_events_newest_first_with_filters() {
    let engine = engine_with(sample_events()).await;

    let result = engine
        .events(&EventsQuery {
            distinct_id: Some("a".to_string()),
            event_name: Some("purchase".to_string()),
            from: Some(t0()),
            to: Some(at_days(7)),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(result.total, 1);
    assert_eq!(result.total_pages, 1);

    let record = &result.events[0];
    assert_eq!(record.event, "purchase");
    assert_eq!(record.distinct_id, "a");
    assert_eq!(record.properties["plan"], json!("pro"));
    assert_eq!(record.session_id.as_deref(), Some("s-1"));
    assert_eq!(record.anonymous_id, None);
}

#[tokio::test]
async fn test_events_rejects_page_zero() {
    let engine = engine_with(Vec::new()).await;

    let err = engine
        .events(&EventsQuery {
            page: 0,
            ..Default::default()
        })
        .await
        .unwrap_err();

    assert!(matches!(err, AnalyticsError::InvalidInput(_)));
}

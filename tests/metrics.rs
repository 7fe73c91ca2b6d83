// tests/metrics.rs
//
// Installs the process-wide Prometheus recorder, drives the refresher once
// through success and once through failure, then reads /metrics.
// One test per file: the recorder can only be installed once per process.

use std::sync::Arc;

use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use rfd_topics::metrics::Metrics;
use rfd_topics::provider::rfd::RfdProvider;
use rfd_topics::refresh::{RefreshSettings, Refresher};
use rfd_topics::store::TopicStore;

const FIXTURE: &str = include_str!("fixtures/rfd_topics.json");

#[tokio::test]
async fn metrics_endpoint_exposes_refresh_and_provider_series() {
    let metrics = Metrics::init().expect("recorder");
    let store = Arc::new(TopicStore::new());

    let good = RfdProvider::from_fixture_str("https://forums.redflagdeals.com", FIXTURE);
    let mut refresher = Refresher::new(Arc::new(good), Arc::clone(&store), RefreshSettings::default());
    assert!(!refresher.refresh_once().await.is_failure());

    let bad = RfdProvider::from_fixture_str("https://forums.redflagdeals.com", "not json");
    let mut failing = Refresher::new(Arc::new(bad), Arc::clone(&store), RefreshSettings::default());
    assert!(failing.refresh_once().await.is_failure());

    let resp = metrics
        .router()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body::to_bytes(resp.into_body(), 1_048_576).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();

    for needle in [
        "topics_refresh_attempts_total",
        "topics_refresh_failures_total",
        "topics_refresh_fetch_ms",
        "topics_snapshot_generation",
        "topics_snapshot_size",
        "topics_refresh_consecutive_failures",
        "topics_provider_items_total",
        "topics_provider_parse_ms",
    ] {
        assert!(
            text.contains(needle),
            "metrics exposition missing '{needle}'\n{text}"
        );
    }

    assert!(text.contains("topics_refresh_attempts_total 2"), "{text}");
}

//! Failure scenarios: broken queue, broken store, broken registry, bad
//! patterns. Nothing here may crash a daemon or halt other URLs.

use std::sync::Arc;
use std::time::Duration;

use webwatch::pipeline::MetricPipeline;
use webwatch::queue::memory::MemoryQueue;
use webwatch::storage::memory::MemoryStore;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

#[tokio::test]
async fn test_publish_failure_is_dropped_and_reported() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&mock_server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(MemoryQueue::default());
    store.add_url(&mock_server.uri(), None);

    // More failures than the retry budget: the metric must be dropped.
    queue.inject_publish_failures(50);

    let stack = spawn_checker(
        store.clone(),
        queue.clone(),
        Duration::from_secs(60),
        Duration::from_secs(5),
    );

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let mut dropped = 0;
    while tokio::time::Instant::now() < deadline {
        dropped = stack.publisher.stats().await.map_or(0, |stats| stats.dropped);
        if dropped >= 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(dropped >= 1, "exhausted retries must be reported as a drop");

    assert_eq!(queue.backlog(), 0);

    stack.shutdown().await;
}

#[tokio::test]
async fn test_publish_recovers_from_transient_failure() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&mock_server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(MemoryQueue::default());
    let id = store.add_url(&mock_server.uri(), None);

    // Fewer failures than the retry budget: the metric must get through.
    queue.inject_publish_failures(2);

    let stack = spawn_checker(
        store.clone(),
        queue.clone(),
        Duration::from_secs(60),
        Duration::from_secs(5),
    );
    let pipeline = MetricPipeline::new(queue.clone(), store.clone(), fast_pipeline_settings());
    let sink = tokio::spawn(pipeline.run());

    assert!(wait_for(Duration::from_secs(5), || !store.history(id).is_empty()).await);

    let stats = stack.publisher.stats().await.unwrap();
    assert_eq!(stats.published, 1);
    assert_eq!(stats.dropped, 0);

    sink.abort();
    stack.shutdown().await;
}

#[tokio::test]
async fn test_registry_outage_keeps_last_snapshot_checking() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&mock_server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(MemoryQueue::default());
    let id = store.add_url(&mock_server.uri(), None);

    let stack = spawn_checker(
        store.clone(),
        queue.clone(),
        Duration::from_millis(1100),
        Duration::from_secs(5),
    );
    let pipeline = MetricPipeline::new(queue.clone(), store.clone(), fast_pipeline_settings());
    let sink = tokio::spawn(pipeline.run());

    assert!(wait_for(Duration::from_secs(5), || !store.history(id).is_empty()).await);

    // Registry goes dark. Checks must continue on the last snapshot.
    store.inject_registry_failures(1000);
    let count_at_outage = store.history(id).len();

    assert!(
        wait_for(Duration::from_secs(10), || {
            store.history(id).len() > count_at_outage
        })
        .await,
        "checks must continue while the registry is unreadable"
    );

    sink.abort();
    stack.shutdown().await;
}

#[tokio::test]
async fn test_invalid_pattern_fails_check_but_not_daemon() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&mock_server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(MemoryQueue::default());
    let id = store.add_url(&mock_server.uri(), Some("(unclosed"));

    let stack = spawn_checker(
        store.clone(),
        queue.clone(),
        Duration::from_secs(60),
        Duration::from_secs(5),
    );
    let pipeline = MetricPipeline::new(queue.clone(), store.clone(), fast_pipeline_settings());
    let sink = tokio::spawn(pipeline.run());

    assert!(wait_for(Duration::from_secs(5), || !store.history(id).is_empty()).await);

    let history = store.history(id);
    assert_eq!(history[0].return_code, 200);
    assert!(!history[0].regex_check);

    sink.abort();
    stack.shutdown().await;
}

#[tokio::test]
async fn test_one_dead_url_does_not_starve_others() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&mock_server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(MemoryQueue::default());

    // One URL that always times out, one healthy one.
    let dead = store.add_url("http://127.0.0.1:9", None);
    let alive = store.add_url(&mock_server.uri(), None);

    let stack = spawn_checker(
        store.clone(),
        queue.clone(),
        Duration::from_secs(60),
        Duration::from_millis(200),
    );
    let pipeline = MetricPipeline::new(queue.clone(), store.clone(), fast_pipeline_settings());
    let sink = tokio::spawn(pipeline.run());

    assert!(
        wait_for(Duration::from_secs(5), || {
            !store.history(dead).is_empty() && !store.history(alive).is_empty()
        })
        .await,
        "both urls must produce a metric"
    );

    assert!(store.history(dead)[0].is_failure());
    assert!(!store.history(alive)[0].is_failure());

    sink.abort();
    stack.shutdown().await;
}

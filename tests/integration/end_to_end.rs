//! End-to-end scenarios: registry → scheduler → fetcher pool → publisher →
//! queue → sink pipeline → metric history

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use webwatch::FAILURE_RETURN_CODE;
use webwatch::pipeline::MetricPipeline;
use webwatch::queue::memory::MemoryQueue;
use webwatch::storage::memory::MemoryStore;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

#[tokio::test]
async fn test_successful_check_is_persisted_end_to_end() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>hello</html>"))
        .mount(&mock_server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(MemoryQueue::default());
    let id = store.add_url(&mock_server.uri(), None);

    let stack = spawn_checker(
        store.clone(),
        queue.clone(),
        Duration::from_secs(60),
        Duration::from_secs(5),
    );
    let pipeline = MetricPipeline::new(queue.clone(), store.clone(), fast_pipeline_settings());
    let sink = tokio::spawn(pipeline.run());

    assert!(
        wait_for(Duration::from_secs(5), || !store.history(id).is_empty()).await,
        "metric should travel the whole pipeline"
    );

    let history = store.history(id);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].return_code, 200);
    assert!(history[0].regex_check, "no regexp is vacuously satisfied");
    assert!(history[0].response_time >= 0);
    assert_eq!(history[0].timestamp.timestamp_subsec_nanos(), 0);

    sink.abort();
    stack.shutdown().await;
}

#[tokio::test]
async fn test_body_pattern_mismatch_is_recorded_as_false() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("maintenance page"))
        .mount(&mock_server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(MemoryQueue::default());
    let id = store.add_url(&mock_server.uri(), Some("service is up"));

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
async fn test_timeout_persists_failure_sentinel() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("OK")
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&mock_server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(MemoryQueue::default());
    let id = store.add_url(&mock_server.uri(), Some("OK"));

    let stack = spawn_checker(
        store.clone(),
        queue.clone(),
        Duration::from_secs(60),
        Duration::from_millis(100),
    );
    let pipeline = MetricPipeline::new(queue.clone(), store.clone(), fast_pipeline_settings());
    let sink = tokio::spawn(pipeline.run());

    assert!(wait_for(Duration::from_secs(5), || !store.history(id).is_empty()).await);

    let history = store.history(id);
    assert_eq!(history[0].return_code, FAILURE_RETURN_CODE);
    assert!(!history[0].regex_check);

    sink.abort();
    stack.shutdown().await;
}

#[tokio::test]
async fn test_repeated_checks_preserve_completion_order() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&mock_server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(MemoryQueue::default());
    let id = store.add_url(&mock_server.uri(), None);

    // Timestamps are second precision, so checks must be over a second
    // apart to be distinct history entries.
    let stack = spawn_checker(
        store.clone(),
        queue.clone(),
        Duration::from_millis(1100),
        Duration::from_secs(5),
    );
    let pipeline = MetricPipeline::new(queue.clone(), store.clone(), fast_pipeline_settings());
    let sink = tokio::spawn(pipeline.run());

    assert!(
        wait_for(Duration::from_secs(10), || store.history(id).len() >= 3).await,
        "expected at least three checks"
    );

    let history = store.history(id);
    for pair in history.windows(2) {
        assert!(
            pair[0].timestamp < pair[1].timestamp,
            "history must be in completion order"
        );
    }

    sink.abort();
    stack.shutdown().await;
}

#[tokio::test]
async fn test_removed_url_stops_being_checked() {
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

    // Deleting drops the history row too, so count dispatched checks via
    // the scheduler after the poller observes the removal.
    store.remove_url(id);
    stack.registry.poll_now().await.unwrap();

    let stats = stack.scheduler.stats().await.unwrap();
    assert_eq!(stats.registered, 0, "removal must unregister the url");
    let dispatched_at_removal = stats.dispatched;

    // Two further intervals: nothing new may be dispatched.
    tokio::time::sleep(Duration::from_millis(2500)).await;
    let stats = stack.scheduler.stats().await.unwrap();
    assert_eq!(stats.dispatched, dispatched_at_removal);

    sink.abort();
    stack.shutdown().await;
}

#[tokio::test]
async fn test_many_urls_share_a_bounded_pool() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&mock_server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(MemoryQueue::default());

    let ids: Vec<i64> = (0..10)
        .map(|i| store.add_url(&format!("{}/page-{i}", mock_server.uri()), None))
        .collect();

    let stack = spawn_checker(
        store.clone(),
        queue.clone(),
        Duration::from_secs(60),
        Duration::from_secs(5),
    );
    assert_eq!(stack.pool.worker_count(), 2);

    let pipeline = MetricPipeline::new(queue.clone(), store.clone(), fast_pipeline_settings());
    let sink = tokio::spawn(pipeline.run());

    // Every URL gets its check despite only two workers (liveness under a
    // saturated pool).
    assert!(
        wait_for(Duration::from_secs(10), || ids
            .iter()
            .all(|id| !store.history(*id).is_empty()))
        .await,
        "every registered url must eventually be checked"
    );

    sink.abort();
    stack.shutdown().await;
}

//! At-least-once redelivery: the sink must turn redelivered batches into
//! idempotent no-ops, across both the in-memory window and a fresh sink
//! instance that has lost it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use pretty_assertions::assert_eq;
use webwatch::codec::{self, MetricEnvelope};
use webwatch::pipeline::MetricPipeline;
use webwatch::queue::memory::MemoryQueue;
use webwatch::queue::{QueueConsumer, QueuePublisher};
use webwatch::storage::memory::MemoryStore;
use webwatch::{Metric, check_timestamp};

use crate::helpers::*;

fn metric(offset_secs: i64) -> Metric {
    Metric {
        timestamp: check_timestamp(Utc::now()) + TimeDelta::seconds(offset_secs),
        response_time: 75,
        return_code: 200,
        regex_check: true,
    }
}

async fn publish(queue: &MemoryQueue, url_id: i64, metric: &Metric) {
    let payload = codec::encode(&MetricEnvelope::new(url_id, metric)).unwrap();
    queue
        .publish(&codec::partition_key(url_id), &payload)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_crash_before_commit_redelivers_without_duplicating() {
    let queue = Arc::new(MemoryQueue::default());
    let store = Arc::new(MemoryStore::new());
    let id = store.add_url("https://example.com", None);

    let first = metric(0);
    let second = metric(1);
    publish(&queue, id, &first).await;
    publish(&queue, id, &second).await;

    let mut pipeline = MetricPipeline::new(queue.clone(), store.clone(), fast_pipeline_settings());

    // Fetch and persist, then "crash" before committing.
    let batch = queue.fetch(16, Duration::from_millis(50)).await.unwrap();
    assert_eq!(batch.len(), 2);
    pipeline.process_batch(&batch).await;
    queue.rewind_to_committed();

    // Same batch again: already-persisted entries, not new ones and not a
    // reorder.
    let redelivered = queue.fetch(16, Duration::from_millis(50)).await.unwrap();
    assert_eq!(redelivered.len(), 2);
    pipeline.process_batch(&redelivered).await;

    assert_eq!(store.history(id), vec![first, second]);
    assert_eq!(pipeline.stats().persisted, 2);
    assert_eq!(pipeline.stats().duplicates, 2);
}

#[tokio::test]
async fn test_fresh_sink_instance_relies_on_storage_guard() {
    let queue = Arc::new(MemoryQueue::default());
    let store = Arc::new(MemoryStore::new());
    let id = store.add_url("https://example.com", None);

    let m = metric(0);
    publish(&queue, id, &m).await;

    // First sink persists but never commits.
    let mut first_sink =
        MetricPipeline::new(queue.clone(), store.clone(), fast_pipeline_settings());
    let batch = queue.fetch(16, Duration::from_millis(50)).await.unwrap();
    first_sink.process_batch(&batch).await;
    drop(first_sink);
    queue.rewind_to_committed();

    // Replacement sink has an empty window; only the store knows the
    // metric. It must still not be appended twice.
    let mut second_sink =
        MetricPipeline::new(queue.clone(), store.clone(), fast_pipeline_settings());
    let redelivered = queue.fetch(16, Duration::from_millis(50)).await.unwrap();
    second_sink.process_batch(&redelivered).await;

    assert_eq!(store.history(id).len(), 1);
    assert_eq!(second_sink.stats().duplicates, 1);
    assert_eq!(second_sink.stats().persisted, 0);
}

#[tokio::test]
async fn test_committed_batches_are_not_redelivered() {
    let queue = Arc::new(MemoryQueue::default());
    let store = Arc::new(MemoryStore::new());
    let id = store.add_url("https://example.com", None);

    publish(&queue, id, &metric(0)).await;

    let mut pipeline = MetricPipeline::new(queue.clone(), store.clone(), fast_pipeline_settings());
    let batch = queue.fetch(16, Duration::from_millis(50)).await.unwrap();
    pipeline.process_batch(&batch).await;
    queue.commit(&batch).await.unwrap();

    queue.rewind_to_committed();
    let nothing = queue.fetch(16, Duration::from_millis(50)).await.unwrap();
    assert!(nothing.is_empty());
}

#[tokio::test]
async fn test_interleaved_urls_keep_their_own_order() {
    let queue = Arc::new(MemoryQueue::default());
    let store = Arc::new(MemoryStore::new());
    let a = store.add_url("https://a.example", None);
    let b = store.add_url("https://b.example", None);

    let a1 = metric(0);
    let b1 = metric(0);
    let a2 = metric(1);
    let b2 = metric(1);

    publish(&queue, a, &a1).await;
    publish(&queue, b, &b1).await;
    publish(&queue, a, &a2).await;
    publish(&queue, b, &b2).await;

    let mut pipeline = MetricPipeline::new(queue.clone(), store.clone(), fast_pipeline_settings());
    let batch = queue.fetch(16, Duration::from_millis(50)).await.unwrap();
    pipeline.process_batch(&batch).await;

    assert_eq!(store.history(a), vec![a1, a2]);
    assert_eq!(store.history(b), vec![b1, b2]);
}

//! Helper functions for integration tests

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use webwatch::actors::fetcher::FetcherPool;
use webwatch::actors::publisher::{PublisherHandle, PublisherSettings};
use webwatch::actors::registry::RegistryHandle;
use webwatch::actors::scheduler::{SchedulerHandle, SchedulerSettings};
use webwatch::pipeline::PipelineSettings;
use webwatch::queue::memory::MemoryQueue;
use webwatch::storage::memory::MemoryStore;

/// The whole checker side wired over an in-memory queue and store.
pub struct CheckerStack {
    pub scheduler: SchedulerHandle,
    pub publisher: PublisherHandle,
    pub registry: RegistryHandle,
    pub pool: FetcherPool,
}

impl CheckerStack {
    pub async fn shutdown(self) {
        self.registry.shutdown().await;
        self.scheduler.shutdown().await;
        self.publisher.shutdown().await;
    }
}

/// Spawn scheduler + fetcher pool + publisher + registry poller with
/// test-friendly timings. `check_interval` stays a real parameter because
/// metric timestamps have second precision: tests that need more than one
/// metric per URL must keep it above one second.
pub fn spawn_checker(
    store: Arc<MemoryStore>,
    queue: Arc<MemoryQueue>,
    check_interval: Duration,
    fetch_timeout: Duration,
) -> CheckerStack {
    let (jobs_tx, jobs_rx) = mpsc::channel(4);

    let scheduler = SchedulerHandle::spawn(
        SchedulerSettings {
            check_interval,
            tick_period: Duration::from_millis(10),
        },
        jobs_tx,
    );

    let publisher = PublisherHandle::spawn_with_settings(
        queue,
        PublisherSettings {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(8),
        },
    );

    let pool = FetcherPool::spawn(
        2,
        jobs_rx,
        scheduler.clone(),
        publisher.clone(),
        fetch_timeout,
    );

    let registry = RegistryHandle::spawn(store, scheduler.clone(), Duration::from_millis(50));

    CheckerStack {
        scheduler,
        publisher,
        registry,
        pool,
    }
}

pub fn fast_pipeline_settings() -> PipelineSettings {
    PipelineSettings {
        batch_size: 16,
        poll_wait: Duration::from_millis(20),
        persist_attempts: 3,
        persist_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(8),
    }
}

/// Poll `predicate` until it holds or `deadline` passes.
pub async fn wait_for(deadline: Duration, predicate: impl Fn() -> bool) -> bool {
    let end = tokio::time::Instant::now() + deadline;
    loop {
        if predicate() {
            return true;
        }
        if tokio::time::Instant::now() >= end {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

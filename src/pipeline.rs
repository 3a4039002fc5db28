//! Sink pipeline: durable queue → deduplication → metric history
//!
//! The queue delivers at least once and in per-partition order. The pipeline
//! turns that stream into idempotent, ordered appends:
//!
//! 1. fetch a batch (per-partition order preserved by the queue)
//! 2. decode each record; malformed payloads are logged and skipped
//! 3. drop known duplicates via the recent window
//! 4. append with a bounded retry on transient store errors; `Duplicate`
//!    and `UnknownUrl` outcomes are quiet no-ops
//! 5. commit the read position - only after the whole batch went through
//!
//! A crash anywhere before step 5 redelivers the batch, and every redelivered
//! record lands in `Duplicate`. That is the exactly-once-effective story;
//! nothing here assumes the queue delivers exactly once.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, error, instrument, trace, warn};

use crate::codec;
use crate::dedup::DedupWindow;
use crate::queue::{Delivery, QueueConsumer};
use crate::storage::{AppendOutcome, MetricStore};

/// Pipeline tuning knobs.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Max records fetched per batch.
    pub batch_size: usize,

    /// How long a fetch waits for the first record.
    pub poll_wait: Duration,

    /// Total attempts to persist one metric before it is dropped.
    pub persist_attempts: u32,

    /// Backoff after the first failed persist; doubled per retry.
    pub persist_backoff: Duration,

    /// Upper bound for a single backoff pause.
    pub max_backoff: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            batch_size: 64,
            poll_wait: Duration::from_secs(1),
            persist_attempts: 5,
            persist_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
        }
    }
}

/// Counters of everything that can happen to a delivered record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Metrics newly appended to a history
    pub persisted: u64,

    /// Redelivered metrics skipped (window or storage guard)
    pub duplicates: u64,

    /// Metrics for URLs deleted before they arrived
    pub orphaned: u64,

    /// Metrics dropped after exhausting persist retries
    pub dropped: u64,

    /// Records that failed to decode
    pub malformed: u64,
}

pub struct MetricPipeline {
    queue: Arc<dyn QueueConsumer>,
    store: Arc<dyn MetricStore>,
    dedup: DedupWindow,
    settings: PipelineSettings,
    stats: PipelineStats,
}

impl MetricPipeline {
    pub fn new(
        queue: Arc<dyn QueueConsumer>,
        store: Arc<dyn MetricStore>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            queue,
            store,
            dedup: DedupWindow::default(),
            settings,
            stats: PipelineStats::default(),
        }
    }

    /// Consume forever. Fetch errors are logged and retried; nothing short
    /// of task cancellation stops the loop.
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting sink pipeline");

        loop {
            match self
                .queue
                .fetch(self.settings.batch_size, self.settings.poll_wait)
                .await
            {
                Ok(batch) if batch.is_empty() => continue,
                Ok(batch) => {
                    trace!("processing batch of {} records", batch.len());
                    self.process_batch(&batch).await;

                    if let Err(e) = self.queue.commit(&batch).await {
                        // Safe to continue: the batch will be redelivered
                        // and deduplicated.
                        warn!("commit failed, batch will be redelivered: {e}");
                    }
                }
                Err(e) => {
                    warn!("queue fetch failed: {e}");
                    sleep(self.settings.poll_wait).await;
                }
            }
        }
    }

    /// Hand every record of a batch through dedup and persistence, in
    /// delivery order. Public so tests (and alternative drivers) can run
    /// the pipeline without the infinite loop.
    pub async fn process_batch(&mut self, batch: &[Delivery]) {
        for delivery in batch {
            self.handle_delivery(delivery).await;
        }
    }

    async fn handle_delivery(&mut self, delivery: &Delivery) {
        let envelope = match codec::decode(&delivery.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(
                    "skipping malformed record at partition {} offset {}: {e}",
                    delivery.partition, delivery.offset
                );
                self.stats.malformed += 1;
                return;
            }
        };

        let url_id = envelope.url_id;
        let metric = envelope.metric();

        if self.dedup.is_duplicate(url_id, metric.timestamp) {
            trace!("duplicate metric for url {url_id} at {}", metric.timestamp);
            self.stats.duplicates += 1;
            return;
        }

        let mut backoff = self.settings.persist_backoff;
        for attempt in 1..=self.settings.persist_attempts {
            match self.store.append_metric(url_id, &metric).await {
                Ok(AppendOutcome::Appended) => {
                    trace!("persisted metric for url {url_id} at {}", metric.timestamp);
                    self.dedup.record(url_id, metric.timestamp);
                    self.stats.persisted += 1;
                    return;
                }
                Ok(AppendOutcome::Duplicate) => {
                    // The window had forgotten it; the storage guard caught
                    // it. Still a success.
                    debug!(
                        "metric for url {url_id} at {} already persisted",
                        metric.timestamp
                    );
                    self.dedup.record(url_id, metric.timestamp);
                    self.stats.duplicates += 1;
                    return;
                }
                Ok(AppendOutcome::UnknownUrl) => {
                    debug!("url {url_id} no longer registered, dropping metric");
                    self.stats.orphaned += 1;
                    return;
                }
                Err(e) if attempt < self.settings.persist_attempts && e.is_transient() => {
                    warn!(
                        "persist attempt {attempt}/{} for url {url_id} failed: {e}",
                        self.settings.persist_attempts
                    );
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(self.settings.max_backoff);
                }
                Err(e) => {
                    error!(
                        "dropping metric for url {url_id} after {attempt} attempts: {e}"
                    );
                    self.stats.dropped += 1;
                    return;
                }
            }
        }
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }
}

//! PublisherActor - serializes metrics onto the durable queue
//!
//! A single actor owns the producer side of the queue. Metrics arrive over
//! its command channel in completion order and are published one at a time,
//! which keeps per-URL publish order intact even across retries.
//!
//! Transient publish failures are retried with capped exponential backoff.
//! After the attempt budget is exhausted the metric is dropped and reported
//! (log + counter) - a broken queue must never take the checker down or
//! stall other URLs indefinitely.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;
use tracing::{debug, error, instrument, trace, warn};

use crate::Metric;
use crate::codec::{self, MetricEnvelope};
use crate::queue::QueuePublisher;

use super::messages::{PublisherCommand, PublisherStats};

/// Publishing retry policy.
#[derive(Debug, Clone)]
pub struct PublisherSettings {
    /// Total attempts per metric before it is dropped.
    pub max_attempts: u32,

    /// Backoff after the first failed attempt; doubled per retry.
    pub base_backoff: Duration,

    /// Upper bound for a single backoff pause.
    pub max_backoff: Duration,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
        }
    }
}

pub struct PublisherActor {
    queue: Arc<dyn QueuePublisher>,
    command_rx: mpsc::Receiver<PublisherCommand>,
    settings: PublisherSettings,
    published: u64,
    dropped: u64,
}

impl PublisherActor {
    pub fn new(
        queue: Arc<dyn QueuePublisher>,
        command_rx: mpsc::Receiver<PublisherCommand>,
        settings: PublisherSettings,
    ) -> Self {
        Self {
            queue,
            command_rx,
            settings,
            published: 0,
            dropped: 0,
        }
    }

    /// Run the actor's main loop
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting publisher actor");

        while let Some(cmd) = self.command_rx.recv().await {
            match cmd {
                PublisherCommand::Publish { url_id, metric } => {
                    self.publish_with_retry(url_id, metric).await;
                }

                PublisherCommand::GetStats { respond_to } => {
                    let _ = respond_to.send(PublisherStats {
                        published: self.published,
                        dropped: self.dropped,
                    });
                }

                PublisherCommand::Shutdown => {
                    debug!("received shutdown command");
                    break;
                }
            }
        }

        debug!("publisher actor stopped");
    }

    async fn publish_with_retry(&mut self, url_id: i64, metric: Metric) {
        let envelope = MetricEnvelope::new(url_id, &metric);
        let payload = match codec::encode(&envelope) {
            Ok(payload) => payload,
            Err(e) => {
                error!("dropping unencodable metric for url {url_id}: {e}");
                self.dropped += 1;
                return;
            }
        };
        let key = codec::partition_key(url_id);

        let mut backoff = self.settings.base_backoff;
        for attempt in 1..=self.settings.max_attempts {
            match self.queue.publish(&key, &payload).await {
                Ok(()) => {
                    self.published += 1;
                    trace!("published metric for url {url_id} (attempt {attempt})");
                    return;
                }
                Err(e) if attempt < self.settings.max_attempts && e.is_transient() => {
                    warn!(
                        "publish attempt {attempt}/{} for url {url_id} failed: {e}",
                        self.settings.max_attempts
                    );
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(self.settings.max_backoff);
                }
                Err(e) => {
                    error!(
                        "dropping metric for url {url_id} after {attempt} attempts: {e}"
                    );
                    self.dropped += 1;
                    return;
                }
            }
        }
    }
}

/// Handle for controlling the PublisherActor
#[derive(Clone)]
pub struct PublisherHandle {
    sender: mpsc::Sender<PublisherCommand>,
}

impl PublisherHandle {
    /// Spawn a publisher with the default retry policy.
    pub fn spawn(queue: Arc<dyn QueuePublisher>) -> Self {
        Self::spawn_with_settings(queue, PublisherSettings::default())
    }

    pub fn spawn_with_settings(
        queue: Arc<dyn QueuePublisher>,
        settings: PublisherSettings,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);

        let actor = PublisherActor::new(queue, cmd_rx, settings);

        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Queue one metric for publication.
    pub async fn publish(&self, url_id: i64, metric: Metric) -> Result<()> {
        self.sender
            .send(PublisherCommand::Publish { url_id, metric })
            .await
            .context("failed to send metric to publisher")?;
        Ok(())
    }

    /// Get publishing statistics
    pub async fn stats(&self) -> Option<PublisherStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PublisherCommand::GetStats { respond_to: tx })
            .await
            .ok()?;

        rx.await.ok()
    }

    /// Gracefully shut down the publisher
    pub async fn shutdown(&self) {
        let _ = self.sender.send(PublisherCommand::Shutdown).await;
    }
}

//! RegistryPoller - feeds registry snapshots to the scheduler
//!
//! The URL registry lives in the external store and is polled on a fixed
//! interval. Every successful read is pushed to the scheduler as a snapshot
//! command; the scheduler seeds new URLs and drops removed ones on its next
//! command round.
//!
//! A failed read leaves the previous snapshot in effect: the scheduler
//! simply receives nothing and keeps checking the URLs it already knows.
//! The poll delay backs off exponentially while reads keep failing and
//! snaps back to the configured interval on the first success.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;
use tracing::{debug, instrument, trace, warn};

use crate::storage::MetricStore;

use super::messages::RegistryCommand;
use super::scheduler::SchedulerHandle;

/// Upper bound for the failure backoff.
const MAX_POLL_BACKOFF: Duration = Duration::from_secs(60);

pub struct RegistryPoller {
    store: Arc<dyn MetricStore>,
    scheduler: SchedulerHandle,
    command_rx: mpsc::Receiver<RegistryCommand>,
    poll_interval: Duration,
}

impl RegistryPoller {
    pub fn new(
        store: Arc<dyn MetricStore>,
        scheduler: SchedulerHandle,
        command_rx: mpsc::Receiver<RegistryCommand>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            scheduler,
            command_rx,
            poll_interval,
        }
    }

    /// Run the poller's main loop
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting registry poller");

        // First poll happens immediately so the scheduler is seeded at
        // startup.
        let mut delay = Duration::ZERO;

        loop {
            tokio::select! {
                _ = sleep(delay) => {
                    delay = match self.poll().await {
                        Ok(()) => self.poll_interval,
                        Err(e) => {
                            let next = next_backoff(delay, self.poll_interval);
                            warn!(
                                "registry poll failed (retrying in {}s, last snapshot stays in effect): {e:#}",
                                next.as_secs()
                            );
                            next
                        }
                    };
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(RegistryCommand::PollNow { respond_to }) => {
                            debug!("received PollNow command");
                            let result = self.poll().await;
                            let _ = respond_to.send(result);
                        }

                        Some(RegistryCommand::Shutdown) => {
                            debug!("received shutdown command");
                            break;
                        }

                        None => {
                            warn!("command channel closed, shutting down");
                            break;
                        }
                    }
                }
            }
        }

        debug!("registry poller stopped");
    }

    async fn poll(&self) -> Result<()> {
        let snapshot = self
            .store
            .fetch_registry()
            .await
            .context("failed to read url registry")?;

        trace!("registry snapshot: {} urls", snapshot.len());

        self.scheduler
            .apply_registry(snapshot)
            .await
            .context("failed to hand snapshot to scheduler")?;

        Ok(())
    }
}

fn next_backoff(current: Duration, floor: Duration) -> Duration {
    let doubled = current.max(floor) * 2;
    doubled.min(MAX_POLL_BACKOFF)
}

/// Handle for controlling the RegistryPoller
#[derive(Clone)]
pub struct RegistryHandle {
    sender: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    /// Spawn a poller against `store`, feeding `scheduler`.
    pub fn spawn(
        store: Arc<dyn MetricStore>,
        scheduler: SchedulerHandle,
        poll_interval: Duration,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);

        let poller = RegistryPoller::new(store, scheduler, cmd_rx, poll_interval);

        tokio::spawn(poller.run());

        Self { sender: cmd_tx }
    }

    /// Poll immediately, bypassing the interval timer.
    pub async fn poll_now(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryCommand::PollNow { respond_to: tx })
            .await
            .context("failed to send PollNow command")?;

        rx.await.context("failed to receive response")??;
        Ok(())
    }

    /// Gracefully shut down the poller
    pub async fn shutdown(&self) {
        let _ = self.sender.send(RegistryCommand::Shutdown).await;
    }
}

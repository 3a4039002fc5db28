//! Message types for actor communication
//!
//! ## Design Principles
//!
//! 1. **Commands**: request/response messages sent to specific actors via
//!    mpsc
//! 2. **Jobs**: units of work handed from the scheduler to the fetcher pool
//! 3. **Single writer**: scheduling state is only ever mutated inside the
//!    scheduler task; completions and snapshots arrive as commands

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use crate::{Metric, MonitoredUrl, WatchedUrl};

/// A due URL on its way to the fetcher pool.
#[derive(Debug, Clone)]
pub struct CheckJob {
    pub target: Arc<WatchedUrl>,
}

/// Commands that can be sent to the SchedulerActor
#[derive(Debug)]
pub enum SchedulerCommand {
    /// A fresh registry snapshot from the poller. New URLs are seeded due
    /// immediately; missing URLs stop being scheduled.
    Registry(Vec<MonitoredUrl>),

    /// A check finished (success or failure). Clears the in-flight mark and
    /// re-arms the URL at `finished_at + check_interval`.
    Complete {
        url_id: i64,
        finished_at: DateTime<Utc>,
    },

    /// Get scheduling statistics
    GetStats {
        respond_to: oneshot::Sender<SchedulerStats>,
    },

    /// Gracefully shut down the scheduler
    Shutdown,
}

/// Scheduling statistics
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    /// URLs currently registered
    pub registered: usize,

    /// Checks currently in flight
    pub in_flight: usize,

    /// Jobs handed to the fetcher pool since startup
    pub dispatched: u64,
}

/// Commands that can be sent to the PublisherActor
#[derive(Debug)]
pub enum PublisherCommand {
    /// Serialize and publish one metric to the durable queue.
    Publish { url_id: i64, metric: Metric },

    /// Get publishing statistics
    GetStats {
        respond_to: oneshot::Sender<PublisherStats>,
    },

    /// Gracefully shut down the publisher
    Shutdown,
}

/// Publishing statistics
#[derive(Debug, Clone, Default)]
pub struct PublisherStats {
    /// Metrics durably accepted by the queue
    pub published: u64,

    /// Metrics dropped after exhausting retries
    pub dropped: u64,
}

/// Commands that can be sent to the RegistryPoller
#[derive(Debug)]
pub enum RegistryCommand {
    /// Poll the registry immediately (bypassing the interval timer) and
    /// push the snapshot to the scheduler.
    PollNow {
        respond_to: oneshot::Sender<anyhow::Result<()>>,
    },

    /// Gracefully shut down the poller
    Shutdown,
}

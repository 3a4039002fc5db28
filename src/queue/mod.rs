//! Durable queue boundary between the checker and the sink.
//!
//! The queue engine itself is a black box behind two traits: the checker
//! only publishes, the sink only consumes. The contract both sides rely on:
//!
//! - **Partitioned by key**: records sharing a partition key are observed
//!   by consumers in publish order; records with different keys interleave
//!   arbitrarily.
//! - **At-least-once**: a consumer that fetched but did not commit will see
//!   the same records again after a restart. Deduplication happens
//!   downstream, never here.
//!
//! ## Implementations
//!
//! - [`kafka`] - Kafka via rdkafka (default deployment backend)
//! - [`memory`] - in-process partitioned queue for tests

#[cfg(feature = "queue-kafka")]
pub mod kafka;
pub mod memory;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

pub type QueueResult<T> = Result<T, QueueError>;

/// Errors crossing the queue boundary.
#[derive(Debug)]
pub enum QueueError {
    /// A record could not be appended; retrying may succeed.
    PublishFailed(String),

    /// Fetching records failed; retrying may succeed.
    ConsumeFailed(String),

    /// Committing the read position failed. The records will be redelivered,
    /// which is safe (at-least-once).
    CommitFailed(String),

    /// The queue client could not be built from the given configuration.
    InvalidConfig(String),
}

impl QueueError {
    /// Transient errors are worth a bounded retry; configuration errors are
    /// not.
    pub fn is_transient(&self) -> bool {
        !matches!(self, QueueError::InvalidConfig(_))
    }
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::PublishFailed(msg) => write!(f, "failed to publish record: {msg}"),
            QueueError::ConsumeFailed(msg) => write!(f, "failed to consume records: {msg}"),
            QueueError::CommitFailed(msg) => write!(f, "failed to commit read position: {msg}"),
            QueueError::InvalidConfig(msg) => write!(f, "invalid queue configuration: {msg}"),
        }
    }
}

impl std::error::Error for QueueError {}

/// One record as handed to the consumer, with enough position information
/// to commit it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub partition: i32,
    pub offset: i64,
    pub key: String,
    pub payload: Vec<u8>,
}

/// Producer side of the queue.
#[async_trait]
pub trait QueuePublisher: Send + Sync {
    /// Append a record under `key`. Returns once the queue has durably
    /// accepted it.
    async fn publish(&self, key: &str, payload: &[u8]) -> QueueResult<()>;
}

/// Consumer side of the queue.
#[async_trait]
pub trait QueueConsumer: Send + Sync {
    /// Fetch up to `max` records, waiting at most `wait` for the first one.
    /// Records of one partition arrive in order; an empty batch means
    /// nothing was available in time.
    async fn fetch(&self, max: usize, wait: Duration) -> QueueResult<Vec<Delivery>>;

    /// Commit the read position covering `batch`. Only call after every
    /// record of the batch has been handed to the persistence pipeline.
    async fn commit(&self, batch: &[Delivery]) -> QueueResult<()>;
}

//! Relational store boundary: URL registry source and metric history sink.
//!
//! The store is a black box behind the [`MetricStore`] trait. The one
//! guarantee implementations must provide: [`MetricStore::append_metric`]
//! is atomic under concurrent invocation for the same URL (storage-engine
//! atomicity, never an in-process lock - sink workers may be separate
//! processes) and idempotent on `(url_id, timestamp)`.
//!
//! ## Implementations
//!
//! - [`postgres`] - PostgreSQL with a `metric[]` composite-array column
//!   per website (default deployment backend)
//! - [`memory`] - in-memory store for tests

pub mod error;
pub mod memory;
#[cfg(feature = "storage-postgres")]
pub mod postgres;

pub use error::{StorageError, StorageResult};

use async_trait::async_trait;

use crate::{Metric, MonitoredUrl};

/// What happened to an append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The metric is now part of the URL's history.
    Appended,

    /// A metric with the same `(url_id, timestamp)` was already persisted.
    /// Idempotent success, not an error.
    Duplicate,

    /// The URL was deleted before the metric arrived. The metric is dropped.
    UnknownUrl,
}

#[async_trait]
pub trait MetricStore: Send + Sync {
    /// Current registry of monitored URLs, ordered by id.
    async fn fetch_registry(&self) -> StorageResult<Vec<MonitoredUrl>>;

    /// Atomically append `metric` to the URL's history, unless an entry
    /// with the same timestamp already exists.
    async fn append_metric(&self, url_id: i64, metric: &Metric) -> StorageResult<AppendOutcome>;

    /// Most recently appended metric for a URL, if any.
    async fn latest_metric(&self, url_id: i64) -> StorageResult<Option<Metric>>;
}

//! In-memory store with the same registry and append semantics as the real
//! backend. Used by tests and local development without a database.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{Metric, MonitoredUrl};

use super::error::{StorageError, StorageResult};
use super::{AppendOutcome, MetricStore};

#[derive(Debug, Default)]
struct Site {
    url: String,
    regexp: Option<String>,
    metrics: Vec<Metric>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    sites: BTreeMap<i64, Site>,
    fail_appends: usize,
    fail_registry_reads: usize,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a URL. Returns its id.
    pub fn add_url(&self, url: &str, regexp: Option<&str>) -> i64 {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        inner.next_id += 1;
        let id = inner.next_id;
        inner.sites.insert(
            id,
            Site {
                url: url.to_string(),
                regexp: regexp.map(str::to_string),
                metrics: Vec::new(),
            },
        );
        id
    }

    /// Delete a URL. Its history goes with it.
    pub fn remove_url(&self, id: i64) {
        self.inner
            .lock()
            .expect("store lock poisoned")
            .sites
            .remove(&id);
    }

    /// Full persisted history of a URL, in append order.
    pub fn history(&self, id: i64) -> Vec<Metric> {
        self.inner
            .lock()
            .expect("store lock poisoned")
            .sites
            .get(&id)
            .map(|site| site.metrics.clone())
            .unwrap_or_default()
    }

    /// Make the next `n` appends fail, for failure-scenario tests.
    pub fn inject_append_failures(&self, n: usize) {
        self.inner.lock().expect("store lock poisoned").fail_appends = n;
    }

    /// Make the next `n` registry reads fail, for failure-scenario tests.
    pub fn inject_registry_failures(&self, n: usize) {
        self.inner
            .lock()
            .expect("store lock poisoned")
            .fail_registry_reads = n;
    }
}

#[async_trait]
impl MetricStore for MemoryStore {
    async fn fetch_registry(&self) -> StorageResult<Vec<MonitoredUrl>> {
        let mut inner = self.inner.lock().expect("store lock poisoned");

        if inner.fail_registry_reads > 0 {
            inner.fail_registry_reads -= 1;
            return Err(StorageError::ConnectionFailed(String::from(
                "injected registry read failure",
            )));
        }

        Ok(inner
            .sites
            .iter()
            .map(|(id, site)| MonitoredUrl {
                id: *id,
                url: site.url.clone(),
                regexp: site.regexp.clone(),
            })
            .collect())
    }

    async fn append_metric(&self, url_id: i64, metric: &Metric) -> StorageResult<AppendOutcome> {
        let mut inner = self.inner.lock().expect("store lock poisoned");

        if inner.fail_appends > 0 {
            inner.fail_appends -= 1;
            return Err(StorageError::QueryFailed(String::from(
                "injected append failure",
            )));
        }

        let Some(site) = inner.sites.get_mut(&url_id) else {
            return Ok(AppendOutcome::UnknownUrl);
        };

        if site.metrics.iter().any(|m| m.timestamp == metric.timestamp) {
            return Ok(AppendOutcome::Duplicate);
        }

        site.metrics.push(metric.clone());
        Ok(AppendOutcome::Appended)
    }

    async fn latest_metric(&self, url_id: i64) -> StorageResult<Option<Metric>> {
        let inner = self.inner.lock().expect("store lock poisoned");
        Ok(inner
            .sites
            .get(&url_id)
            .and_then(|site| site.metrics.last().cloned()))
    }
}

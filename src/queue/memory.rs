//! In-process queue with the same ordering and redelivery semantics as the
//! real backend.
//!
//! Used by tests and by local development without a broker. Records are
//! spread over a fixed number of partitions by key hash, each partition is
//! strictly FIFO, and the read position is tracked separately from the
//! committed position so tests can exercise at-least-once redelivery via
//! [`MemoryQueue::rewind_to_committed`].

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use super::{Delivery, QueueConsumer, QueueError, QueuePublisher, QueueResult};

const DEFAULT_PARTITIONS: usize = 8;

/// How often `fetch` re-checks an empty queue while waiting.
const POLL_PERIOD: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
struct Partition {
    records: Vec<(String, Vec<u8>)>,
    read: usize,
    committed: usize,
}

#[derive(Debug)]
struct Inner {
    partitions: Vec<Partition>,
    fail_publishes: usize,
}

#[derive(Debug, Clone)]
pub struct MemoryQueue {
    inner: Arc<Mutex<Inner>>,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(DEFAULT_PARTITIONS)
    }
}

impl MemoryQueue {
    pub fn new(partitions: usize) -> Self {
        let partitions = (0..partitions.max(1)).map(|_| Partition::default()).collect();
        Self {
            inner: Arc::new(Mutex::new(Inner {
                partitions,
                fail_publishes: 0,
            })),
        }
    }

    fn partition_for(&self, key: &str, partition_count: usize) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % partition_count
    }

    /// Make the next `n` publishes fail, for failure-scenario tests.
    pub fn inject_publish_failures(&self, n: usize) {
        self.inner.lock().expect("queue lock poisoned").fail_publishes = n;
    }

    /// Reset read positions to the committed positions, simulating a
    /// consumer restart. Fetched-but-uncommitted records are redelivered.
    pub fn rewind_to_committed(&self) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        for partition in &mut inner.partitions {
            partition.read = partition.committed;
        }
    }

    /// Records not yet fetched.
    pub fn backlog(&self) -> usize {
        let inner = self.inner.lock().expect("queue lock poisoned");
        inner
            .partitions
            .iter()
            .map(|p| p.records.len() - p.read)
            .sum()
    }

    fn try_fetch(&self, max: usize) -> Vec<Delivery> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        let mut out = Vec::new();

        // Round-robin over partitions so one hot partition cannot starve
        // the others within a batch.
        let mut progressed = true;
        while progressed && out.len() < max {
            progressed = false;
            for (idx, partition) in inner.partitions.iter_mut().enumerate() {
                if out.len() >= max {
                    break;
                }
                if partition.read < partition.records.len() {
                    let offset = partition.read;
                    let (key, payload) = partition.records[offset].clone();
                    partition.read += 1;
                    out.push(Delivery {
                        partition: idx as i32,
                        offset: offset as i64,
                        key,
                        payload,
                    });
                    progressed = true;
                }
            }
        }

        out
    }
}

#[async_trait]
impl QueuePublisher for MemoryQueue {
    async fn publish(&self, key: &str, payload: &[u8]) -> QueueResult<()> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");

        if inner.fail_publishes > 0 {
            inner.fail_publishes -= 1;
            return Err(QueueError::PublishFailed(String::from(
                "injected publish failure",
            )));
        }

        let partition_count = inner.partitions.len();
        let idx = self.partition_for(key, partition_count);
        inner.partitions[idx]
            .records
            .push((key.to_string(), payload.to_vec()));
        Ok(())
    }
}

#[async_trait]
impl QueueConsumer for MemoryQueue {
    async fn fetch(&self, max: usize, wait: Duration) -> QueueResult<Vec<Delivery>> {
        let deadline = tokio::time::Instant::now() + wait;

        loop {
            let batch = self.try_fetch(max);
            if !batch.is_empty() {
                return Ok(batch);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            sleep(POLL_PERIOD).await;
        }
    }

    async fn commit(&self, batch: &[Delivery]) -> QueueResult<()> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");

        for delivery in batch {
            let idx = delivery.partition as usize;
            let Some(partition) = inner.partitions.get_mut(idx) else {
                return Err(QueueError::CommitFailed(format!(
                    "unknown partition {}",
                    delivery.partition
                )));
            };
            let next = delivery.offset as usize + 1;
            if next > partition.committed {
                partition.committed = next;
            }
        }

        Ok(())
    }
}

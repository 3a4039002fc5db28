//! Recent-window duplicate filter for redelivered metrics.
//!
//! The queue delivers at least once, so the sink sees the same metric again
//! after a crash or rebalance. The window keeps the most recent timestamps
//! per URL as a cheap first line; the storage layer's uniqueness guard on
//! `(url_id, timestamp)` remains the ground truth for anything that has
//! fallen out of the window.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};

/// Timestamps remembered per URL before the oldest are forgotten.
const DEFAULT_WINDOW: usize = 256;

#[derive(Debug)]
pub struct DedupWindow {
    per_url: HashMap<i64, VecDeque<DateTime<Utc>>>,
    capacity: usize,
}

impl Default for DedupWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl DedupWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            per_url: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Has this `(url_id, timestamp)` already been seen?
    pub fn is_duplicate(&self, url_id: i64, timestamp: DateTime<Utc>) -> bool {
        self.per_url
            .get(&url_id)
            .is_some_and(|seen| seen.contains(&timestamp))
    }

    /// Remember a persisted `(url_id, timestamp)`. Call only after the
    /// metric is durably applied, so a dropped metric can still be
    /// redelivered and retried.
    pub fn record(&mut self, url_id: i64, timestamp: DateTime<Utc>) {
        let seen = self.per_url.entry(url_id).or_default();
        if seen.contains(&timestamp) {
            return;
        }
        seen.push_back(timestamp);
        if seen.len() > self.capacity {
            seen.pop_front();
        }
    }

    pub fn tracked_urls(&self) -> usize {
        self.per_url.len()
    }
}

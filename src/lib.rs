pub mod actors;
pub mod codec;
pub mod config;
pub mod dedup;
pub mod pipeline;
pub mod queue;
pub mod storage;
pub mod util;

use std::sync::Arc;

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

/// Return code recorded when a check never produced an HTTP response
/// (timeout, DNS failure, connection refused). Outside the range of real
/// HTTP status codes.
pub const FAILURE_RETURN_CODE: i32 = -1;

/// Response time recorded alongside a failed fetch.
pub const FAILURE_RESPONSE_TIME: i32 = -1;

/// One entry of the URL registry: what to fetch and, optionally, which
/// pattern the body must contain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredUrl {
    pub id: i64,
    pub url: String,
    pub regexp: Option<String>,
}

/// The result of a single check of a single URL.
///
/// Immutable once created. `(url_id, timestamp)` is the stable identity used
/// for deduplication downstream, which is why `timestamp` is truncated to
/// whole seconds (see [`check_timestamp`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metric {
    /// Check start time, second precision, UTC.
    pub timestamp: DateTime<Utc>,

    /// Milliseconds until the response body was fully read, or
    /// [`FAILURE_RESPONSE_TIME`] when the fetch failed.
    pub response_time: i32,

    /// Final HTTP status code, or [`FAILURE_RETURN_CODE`] when no response
    /// was obtained.
    pub return_code: i32,

    /// `true` when no pattern is configured (vacuously satisfied) or the
    /// pattern matched the body. `false` on a failed match or failed fetch.
    pub regex_check: bool,
}

impl Metric {
    /// Metric recorded when the fetch itself failed.
    pub fn failure(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            response_time: FAILURE_RESPONSE_TIME,
            return_code: FAILURE_RETURN_CODE,
            regex_check: false,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.return_code == FAILURE_RETURN_CODE
    }
}

/// Body validation attached to a watched URL.
///
/// Patterns are compiled once, when a registry snapshot is applied, not per
/// check. A pattern that fails to compile never matches.
#[derive(Debug, Clone)]
pub enum BodyCheck {
    /// No pattern configured - every body passes.
    None,
    Pattern(regex::Regex),
    /// The configured pattern did not compile - every body fails.
    Invalid,
}

impl BodyCheck {
    pub fn compile(regexp: Option<&str>) -> Self {
        match regexp {
            None => BodyCheck::None,
            Some(pattern) => match regex::Regex::new(pattern) {
                Ok(re) => BodyCheck::Pattern(re),
                Err(e) => {
                    error!("invalid regexp '{pattern}': {e}");
                    BodyCheck::Invalid
                }
            },
        }
    }

    pub fn evaluate(&self, body: &str) -> bool {
        match self {
            BodyCheck::None => true,
            BodyCheck::Pattern(re) => re.is_match(body),
            BodyCheck::Invalid => false,
        }
    }
}

/// A registry entry with its compiled body check, as dispatched to the
/// fetcher pool.
#[derive(Debug)]
pub struct WatchedUrl {
    pub id: i64,
    pub url: String,
    pub regexp: Option<String>,
    pub check: BodyCheck,
}

impl WatchedUrl {
    pub fn resolve(entry: MonitoredUrl) -> Arc<Self> {
        let check = BodyCheck::compile(entry.regexp.as_deref());
        Arc::new(Self {
            id: entry.id,
            url: entry.url,
            regexp: entry.regexp,
            check,
        })
    }
}

/// Truncate an instant to whole seconds, the precision metrics are recorded
/// (and deduplicated) at.
pub fn check_timestamp(now: DateTime<Utc>) -> DateTime<Utc> {
    now.with_nanosecond(0).unwrap_or(now)
}

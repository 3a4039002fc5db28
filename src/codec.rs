//! Wire format for metrics on the durable queue.
//!
//! A metric travels as a versioned JSON envelope. Decoding tolerates unknown
//! fields so older sinks can skip data added by newer checkers; an envelope
//! from a newer major schema version is rejected (and counted by the caller),
//! never a crash.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Metric;

/// Current wire schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// A [`Metric`] tagged with its URL and schema version, as carried on the
/// queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricEnvelope {
    /// Envelopes written before versioning are treated as version 1.
    #[serde(default = "default_version")]
    pub version: u32,
    pub url_id: i64,
    pub timestamp: DateTime<Utc>,
    pub response_time: i32,
    pub return_code: i32,
    pub regex_check: bool,
}

impl MetricEnvelope {
    pub fn new(url_id: i64, metric: &Metric) -> Self {
        Self {
            version: SCHEMA_VERSION,
            url_id,
            timestamp: metric.timestamp,
            response_time: metric.response_time,
            return_code: metric.return_code,
            regex_check: metric.regex_check,
        }
    }

    pub fn metric(&self) -> Metric {
        Metric {
            timestamp: self.timestamp,
            response_time: self.response_time,
            return_code: self.return_code,
            regex_check: self.regex_check,
        }
    }
}

fn default_version() -> u32 {
    1
}

/// Queue partition key for a URL. All metrics of one URL share a key so the
/// queue keeps them in publish order.
pub fn partition_key(url_id: i64) -> String {
    url_id.to_string()
}

pub fn encode(envelope: &MetricEnvelope) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(envelope).map_err(CodecError::Malformed)
}

pub fn decode(payload: &[u8]) -> Result<MetricEnvelope, CodecError> {
    let envelope: MetricEnvelope =
        serde_json::from_slice(payload).map_err(CodecError::Malformed)?;

    if envelope.version > SCHEMA_VERSION {
        return Err(CodecError::UnsupportedVersion(envelope.version));
    }

    Ok(envelope)
}

#[derive(Debug)]
pub enum CodecError {
    Malformed(serde_json::Error),
    UnsupportedVersion(u32),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Malformed(e) => write!(f, "malformed metric payload: {e}"),
            CodecError::UnsupportedVersion(v) => {
                write!(f, "unsupported metric schema version {v}")
            }
        }
    }
}

impl std::error::Error for CodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CodecError::Malformed(e) => Some(e),
            CodecError::UnsupportedVersion(_) => None,
        }
    }
}

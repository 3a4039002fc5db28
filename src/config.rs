use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::trace;

/// Top-level daemon configuration, read from a JSON file.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub queue: QueueConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

/// Connection parameters for the durable queue.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct QueueConfig {
    /// Bootstrap broker list, e.g. "broker-1:9092,broker-2:9092".
    pub brokers: String,

    #[serde(default = "default_topic")]
    pub topic: String,

    /// Consumer group of the sink daemon.
    #[serde(default = "default_group")]
    pub group: String,

    pub username: Option<String>,
    pub password: Option<String>,

    /// CA certificate file for TLS brokers.
    pub ca_file: Option<PathBuf>,
}

/// Connection parameters for the relational store.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct DatabaseConfig {
    pub host: String,

    #[serde(default = "default_database_port")]
    pub port: u16,

    #[serde(default = "default_database_name")]
    pub name: String,

    pub user: String,
    pub password: Option<String>,
}

/// Tunables of the monitoring pipeline itself.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct MonitorConfig {
    /// Seconds between two checks of the same URL.
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    /// Per-check fetch timeout in seconds.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Number of concurrent fetch workers.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Seconds between registry polls.
    #[serde(default = "default_registry_poll")]
    pub registry_poll_secs: u64,
}

impl MonitorConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn registry_poll_interval(&self) -> Duration {
        Duration::from_secs(self.registry_poll_secs)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            fetch_timeout_secs: default_fetch_timeout(),
            workers: default_workers(),
            registry_poll_secs: default_registry_poll(),
        }
    }
}

fn default_topic() -> String {
    String::from("webwatch-metrics")
}

fn default_group() -> String {
    String::from("webwatch-sink")
}

fn default_database_port() -> u16 {
    5432
}

fn default_database_name() -> String {
    String::from("webwatch")
}

fn default_check_interval() -> u64 {
    20
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_workers() -> usize {
    4
}

fn default_registry_poll() -> u64 {
    5
}

pub fn read_config_file(path: impl AsRef<Path>) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path.as_ref())?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("invalid configuration file: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}

//! FetcherPool - bounded pool of workers executing URL checks
//!
//! Each worker pulls one due URL from the shared job channel, performs the
//! HTTP GET, measures the elapsed time, evaluates the body check and turns
//! the result into a [`Metric`]. Failures are captured in the metric (as the
//! failure sentinel), never propagated - a URL that keeps failing produces a
//! run of failure metrics rather than silence.
//!
//! The per-check timeout is enforced here with [`tokio::time::timeout`]
//! around the whole fetch-plus-body read, on top of the client timeout, so
//! a slow URL can never hold a worker beyond the configured bound.
//!
//! ## Message Flow
//!
//! ```text
//! CheckJob → HTTP GET + timing + body check → Metric
//!              ├──► PublisherActor (Publish)
//!              └──► SchedulerActor (Complete)
//! ```
//!
//! The metric is handed to the publisher *before* the completion is
//! reported. Together with the scheduler's in-flight flag this serializes a
//! URL's metrics into the publisher in completion order.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::{Metric, WatchedUrl, check_timestamp};

use super::messages::CheckJob;
use super::publisher::PublisherHandle;
use super::scheduler::SchedulerHandle;

/// A bounded set of fetch workers over one shared job channel.
pub struct FetcherPool {
    workers: Vec<JoinHandle<()>>,
}

impl FetcherPool {
    /// Spawn `workers` fetch workers. The pool runs until the job channel
    /// closes (i.e. the scheduler goes away).
    pub fn spawn(
        workers: usize,
        jobs_rx: mpsc::Receiver<CheckJob>,
        scheduler: SchedulerHandle,
        publisher: PublisherHandle,
        fetch_timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .build()
            .expect("Failed to build HTTP client");

        let jobs_rx = Arc::new(Mutex::new(jobs_rx));

        let workers = (0..workers.max(1))
            .map(|worker_id| {
                let jobs_rx = jobs_rx.clone();
                let client = client.clone();
                let scheduler = scheduler.clone();
                let publisher = publisher.clone();

                tokio::spawn(worker(
                    worker_id,
                    jobs_rx,
                    client,
                    scheduler,
                    publisher,
                    fetch_timeout,
                ))
            })
            .collect();

        Self { workers }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Abort all workers. Normally unnecessary - workers exit on their own
    /// once the job channel closes.
    pub fn abort(self) {
        for handle in self.workers {
            handle.abort();
        }
    }
}

async fn worker(
    worker_id: usize,
    jobs_rx: Arc<Mutex<mpsc::Receiver<CheckJob>>>,
    client: reqwest::Client,
    scheduler: SchedulerHandle,
    publisher: PublisherHandle,
    fetch_timeout: Duration,
) {
    debug!("fetch worker {worker_id} started");

    loop {
        let job = {
            let mut rx = jobs_rx.lock().await;
            rx.recv().await
        };

        let Some(CheckJob { target }) = job else {
            break;
        };

        trace!("worker {worker_id} checking url {} ({})", target.id, target.url);

        let metric = check_url(&client, &target, fetch_timeout).await;
        let finished_at = Utc::now();

        // Publish before completing: the in-flight flag guarantees no other
        // worker holds this URL, so the publisher sees its metrics in
        // completion order.
        if let Err(e) = publisher.publish(target.id, metric).await {
            warn!("worker {worker_id} could not hand metric to publisher: {e:#}");
        }

        if let Err(e) = scheduler.complete(target.id, finished_at).await {
            warn!("worker {worker_id} could not report completion: {e:#}");
        }
    }

    debug!("fetch worker {worker_id} stopped");
}

/// Execute one check: GET the URL, time the exchange, evaluate the body
/// check. Never fails - transport-level errors become the failure sentinel.
pub async fn check_url(
    client: &reqwest::Client,
    target: &WatchedUrl,
    fetch_timeout: Duration,
) -> Metric {
    let timestamp = check_timestamp(Utc::now());
    let started = std::time::Instant::now();

    match tokio::time::timeout(fetch_timeout, fetch_body(client, &target.url)).await {
        Ok(Ok((return_code, body))) => {
            let response_time = started.elapsed().as_millis().min(i32::MAX as u128) as i32;
            Metric {
                timestamp,
                response_time,
                return_code: return_code as i32,
                regex_check: target.check.evaluate(&body),
            }
        }
        Ok(Err(e)) => {
            warn!("fetch of {} failed: {e}", target.url);
            Metric::failure(timestamp)
        }
        Err(_) => {
            warn!(
                "fetch of {} timed out after {}ms",
                target.url,
                fetch_timeout.as_millis()
            );
            Metric::failure(timestamp)
        }
    }
}

/// Returns (status code, body) of a completed HTTP exchange. Non-2xx codes
/// are results, not errors.
async fn fetch_body(client: &reqwest::Client, url: &str) -> reqwest::Result<(u16, String)> {
    let response = client.get(url).send().await?;
    let status = response.status().as_u16();
    let body = response.text().await?;
    Ok((status, body))
}

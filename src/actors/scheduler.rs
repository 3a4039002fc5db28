//! SchedulerActor - decides when each URL is due for a check
//!
//! The scheduler owns the due-time table: one entry per registered URL with
//! its next-due instant, an in-flight flag and an arming sequence number.
//! The table is only ever touched inside the actor task; the fetcher pool
//! reports completions and the registry poller pushes snapshots as
//! commands.
//!
//! ## Guarantees
//!
//! 1. **No overlap** - a URL with an in-flight check is never selected
//!    again until its completion is reported
//! 2. **Liveness** - a full fetcher pool delays a due URL but never loses
//!    it: the in-flight mark is reverted and the URL is retried on the next
//!    tick, keeping the scheduler loop itself non-blocking
//! 3. **Fairness** - equally-due URLs are dispatched FIFO by arming order
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick → select due URLs → CheckJob ↦ fetcher pool
//!     ↑
//!     └─── Commands (Registry, Complete, GetStats, Shutdown)
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;
use tracing::{debug, instrument, trace, warn};

use crate::{MonitoredUrl, WatchedUrl};

use super::messages::{CheckJob, SchedulerCommand, SchedulerStats};

/// Scheduler tuning knobs.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Time between two checks of the same URL.
    pub check_interval: Duration,

    /// How often the due-time table is scanned. Bounds scheduling latency,
    /// not check frequency.
    pub tick_period: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(20),
            tick_period: Duration::from_secs(1),
        }
    }
}

#[derive(Debug)]
struct Entry {
    target: Arc<WatchedUrl>,
    due_at: DateTime<Utc>,
    /// Arming order, FIFO tie-breaker among equally-due URLs.
    seq: u64,
    in_flight: bool,
}

/// The due-time table. Pure state machine, driven by the actor below and
/// directly exercised by the property tests.
#[derive(Debug)]
pub struct DueTable {
    entries: HashMap<i64, Entry>,
    interval: TimeDelta,
    next_seq: u64,
}

impl DueTable {
    pub fn new(check_interval: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            interval: TimeDelta::milliseconds(check_interval.as_millis().min(i64::MAX as u128) as i64),
            next_seq: 0,
        }
    }

    fn arm_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Replace the registered URL set with a fresh registry snapshot.
    ///
    /// New URLs become due immediately. Removed URLs are dropped: an
    /// in-flight check still completes, but [`DueTable::complete`] for an
    /// unknown id is a no-op, so it is never re-armed. Edited URLs keep
    /// their scheduling state and take effect at the next dispatch; the
    /// body-check pattern is recompiled only when it actually changed.
    pub fn apply_registry(&mut self, snapshot: Vec<MonitoredUrl>, now: DateTime<Utc>) {
        let mut entries = HashMap::with_capacity(snapshot.len());

        for monitored in snapshot {
            let id = monitored.id;
            match self.entries.remove(&id) {
                Some(mut entry) => {
                    if entry.target.url != monitored.url || entry.target.regexp != monitored.regexp
                    {
                        debug!("url {id} changed, recompiling");
                        entry.target = WatchedUrl::resolve(monitored);
                    }
                    entries.insert(id, entry);
                }
                None => {
                    trace!("url {id} registered, due immediately");
                    let seq = self.arm_seq();
                    entries.insert(
                        id,
                        Entry {
                            target: WatchedUrl::resolve(monitored),
                            due_at: now,
                            seq,
                            in_flight: false,
                        },
                    );
                }
            }
        }

        for id in self.entries.keys() {
            debug!("url {id} removed from registry, dropping schedule");
        }

        self.entries = entries;
    }

    /// Select every URL that is due and not in flight, marking each as
    /// in flight. FIFO among equally-due URLs.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<Arc<WatchedUrl>> {
        let mut due: Vec<(DateTime<Utc>, u64, i64)> = self
            .entries
            .iter()
            .filter(|(_, e)| !e.in_flight && e.due_at <= now)
            .map(|(id, e)| (e.due_at, e.seq, *id))
            .collect();

        due.sort_unstable();

        due.into_iter()
            .filter_map(|(_, _, id)| {
                let entry = self.entries.get_mut(&id)?;
                entry.in_flight = true;
                Some(entry.target.clone())
            })
            .collect()
    }

    /// Revert the in-flight mark of a URL whose job could not be handed to
    /// the pool. It keeps its due time and FIFO position.
    pub fn release(&mut self, url_id: i64) {
        if let Some(entry) = self.entries.get_mut(&url_id) {
            entry.in_flight = false;
        }
    }

    /// Clear the in-flight mark and re-arm the URL one interval after its
    /// completion. Unknown ids (deleted mid-check) are ignored.
    pub fn complete(&mut self, url_id: i64, finished_at: DateTime<Utc>) {
        let seq = self.arm_seq();
        if let Some(entry) = self.entries.get_mut(&url_id) {
            entry.in_flight = false;
            entry.due_at = finished_at + self.interval;
            entry.seq = seq;
        } else {
            trace!("completion for unregistered url {url_id}, not re-arming");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn in_flight_count(&self) -> usize {
        self.entries.values().filter(|e| e.in_flight).count()
    }
}

/// Actor wrapping the due-time table.
pub struct SchedulerActor {
    table: DueTable,
    command_rx: mpsc::Receiver<SchedulerCommand>,
    jobs_tx: mpsc::Sender<CheckJob>,
    tick_period: Duration,
    dispatched: u64,
}

impl SchedulerActor {
    pub fn new(
        settings: SchedulerSettings,
        command_rx: mpsc::Receiver<SchedulerCommand>,
        jobs_tx: mpsc::Sender<CheckJob>,
    ) -> Self {
        Self {
            table: DueTable::new(settings.check_interval),
            command_rx,
            jobs_tx,
            tick_period: settings.tick_period,
            dispatched: 0,
        }
    }

    /// Run the actor's main loop
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting scheduler actor");

        let mut ticker = interval(self.tick_period);

        loop {
            tokio::select! {
                // Timer tick - dispatch everything that is due
                _ = ticker.tick() => {
                    self.dispatch_due();
                }

                // Handle commands
                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        SchedulerCommand::Registry(snapshot) => {
                            trace!("applying registry snapshot ({} urls)", snapshot.len());
                            self.table.apply_registry(snapshot, Utc::now());
                        }

                        SchedulerCommand::Complete { url_id, finished_at } => {
                            trace!("check for url {url_id} completed");
                            self.table.complete(url_id, finished_at);
                        }

                        SchedulerCommand::GetStats { respond_to } => {
                            let _ = respond_to.send(SchedulerStats {
                                registered: self.table.len(),
                                in_flight: self.table.in_flight_count(),
                                dispatched: self.dispatched,
                            });
                        }

                        SchedulerCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                // Command channel closed - exit
                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("scheduler actor stopped");
    }

    fn dispatch_due(&mut self) {
        let now = Utc::now();

        for target in self.table.tick(now) {
            let url_id = target.id;
            match self.jobs_tx.try_send(CheckJob { target }) {
                Ok(()) => {
                    self.dispatched += 1;
                    trace!("dispatched check for url {url_id}");
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    // Pool is saturated; the URL stays due and keeps its
                    // FIFO position for the next tick.
                    trace!("fetcher pool full, url {url_id} stays due");
                    self.table.release(url_id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    warn!("job channel closed, url {url_id} stays due");
                    self.table.release(url_id);
                }
            }
        }
    }
}

/// Handle for controlling the SchedulerActor
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    /// Spawn a new scheduler actor feeding `jobs_tx`.
    pub fn spawn(settings: SchedulerSettings, jobs_tx: mpsc::Sender<CheckJob>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);

        let actor = SchedulerActor::new(settings, cmd_rx, jobs_tx);

        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Push a fresh registry snapshot.
    pub async fn apply_registry(&self, snapshot: Vec<MonitoredUrl>) -> Result<()> {
        self.sender
            .send(SchedulerCommand::Registry(snapshot))
            .await
            .context("failed to send registry snapshot")?;
        Ok(())
    }

    /// Report a finished check.
    pub async fn complete(&self, url_id: i64, finished_at: DateTime<Utc>) -> Result<()> {
        self.sender
            .send(SchedulerCommand::Complete {
                url_id,
                finished_at,
            })
            .await
            .context("failed to send completion")?;
        Ok(())
    }

    /// Get scheduling statistics
    pub async fn stats(&self) -> Option<SchedulerStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::GetStats { respond_to: tx })
            .await
            .ok()?;

        rx.await.ok()
    }

    /// Gracefully shut down the scheduler
    pub async fn shutdown(&self) {
        let _ = self.sender.send(SchedulerCommand::Shutdown).await;
    }
}

//! Checker daemon: polls the URL registry, schedules due checks, fetches
//! them with a bounded worker pool and publishes the resulting metrics to
//! the durable queue.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

use webwatch::actors::fetcher::FetcherPool;
use webwatch::actors::publisher::PublisherHandle;
use webwatch::actors::registry::RegistryHandle;
use webwatch::actors::scheduler::{SchedulerHandle, SchedulerSettings};
use webwatch::config::read_config_file;
use webwatch::queue::kafka::KafkaPublisher;
use webwatch::storage::postgres::PgStore;
use webwatch::util;

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("webwatch", LevelFilter::DEBUG),
        ("webwatch_checker", LevelFilter::DEBUG),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();

    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_config_file(util::config_path(args.config))?;
    let monitor = config.monitor.clone();

    let store = PgStore::connect(&config.database).await?;
    store.ping().await?;
    let store: Arc<PgStore> = Arc::new(store);

    let queue = Arc::new(KafkaPublisher::new(&config.queue)?);

    // The job channel is the backpressure point between scheduling and
    // fetching; 2 slots per worker, as small as it can be without starving
    // the pool between ticks.
    let (jobs_tx, jobs_rx) = mpsc::channel(monitor.workers * 2);

    let scheduler = SchedulerHandle::spawn(
        SchedulerSettings {
            check_interval: monitor.check_interval(),
            ..SchedulerSettings::default()
        },
        jobs_tx,
    );

    let publisher = PublisherHandle::spawn(queue);

    let pool = FetcherPool::spawn(
        monitor.workers,
        jobs_rx,
        scheduler.clone(),
        publisher.clone(),
        monitor.fetch_timeout(),
    );

    let registry = RegistryHandle::spawn(
        store,
        scheduler.clone(),
        monitor.registry_poll_interval(),
    );

    info!(
        "checker running ({} workers, {}s interval, {}s timeout)",
        pool.worker_count(),
        monitor.check_interval_secs,
        monitor.fetch_timeout_secs
    );

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    registry.shutdown().await;
    scheduler.shutdown().await;
    publisher.shutdown().await;

    Ok(())
}

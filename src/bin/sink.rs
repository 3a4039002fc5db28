//! Sink daemon: consumes metrics from the durable queue and appends them,
//! deduplicated, to each URL's history in the relational store.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

use webwatch::config::read_config_file;
use webwatch::pipeline::{MetricPipeline, PipelineSettings};
use webwatch::queue::kafka::KafkaConsumer;
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
        ("webwatch_sink", LevelFilter::DEBUG),
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

    let store = PgStore::connect(&config.database).await?;
    store.ping().await?;

    let consumer = Arc::new(KafkaConsumer::new(&config.queue)?);

    let pipeline = MetricPipeline::new(consumer, Arc::new(store), PipelineSettings::default());

    info!("sink running");

    tokio::select! {
        _ = pipeline.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }

    Ok(())
}

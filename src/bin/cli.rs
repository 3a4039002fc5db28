//! Operator CLI: manage the database schema and the watchlist.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use webwatch::config::read_config_file;
use webwatch::storage::MetricStore;
use webwatch::storage::postgres::PgStore;
use webwatch::util;

#[derive(Debug, Parser)]
#[command(name = "webwatch", version, about = "Manage watched URLs and the metric database")]
struct Cli {
    /// Config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Manage the database backend
    Database {
        #[command(subcommand)]
        command: DatabaseCommand,
    },

    /// Manage watched URLs
    Url {
        #[command(subcommand)]
        command: UrlCommand,
    },
}

#[derive(Debug, Subcommand)]
enum DatabaseCommand {
    /// Create the metric type and websites table
    Init,

    /// Drop the websites table and the metric type
    Reset,
}

#[derive(Debug, Subcommand)]
enum UrlCommand {
    /// Add a URL to the watchlist, optionally with a body pattern
    Add {
        url: String,
        regexp: Option<String>,
    },

    /// Remove a URL from the watchlist
    Remove { url: String },

    /// Print watched URLs
    List,

    /// Print the latest metric for each watched URL
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let config = read_config_file(util::config_path(cli.config))?;
    let store = PgStore::connect(&config.database).await?;

    match cli.command {
        Command::Database { command } => match command {
            DatabaseCommand::Init => {
                store.init_schema().await?;
                println!("database initialized");
            }
            DatabaseCommand::Reset => {
                store.reset_schema().await?;
                println!("database reset");
            }
        },

        Command::Url { command } => match command {
            UrlCommand::Add { url, regexp } => {
                let id = store.url_add(&url, regexp.as_deref()).await?;
                println!("{id}");
            }
            UrlCommand::Remove { url } => {
                let removed = store.url_remove(&url).await?;
                if removed == 0 {
                    println!("no such url: {url}");
                }
            }
            UrlCommand::List => {
                for entry in store.fetch_registry().await? {
                    match entry.regexp {
                        Some(regexp) => println!("{}\t{}\t{}", entry.id, entry.url, regexp),
                        None => println!("{}\t{}", entry.id, entry.url),
                    }
                }
            }
            UrlCommand::Status => {
                for status in store.url_status().await? {
                    match status.latest {
                        Some(metric) => println!(
                            "{}\t{}\t{} checks\tlast: {} {}ms code={} regex={}",
                            status.id,
                            status.url,
                            status.checks,
                            metric.timestamp,
                            metric.response_time,
                            metric.return_code,
                            metric.regex_check
                        ),
                        None => println!("{}\t{}\tno checks yet", status.id, status.url),
                    }
                }
            }
        },
    }

    Ok(())
}

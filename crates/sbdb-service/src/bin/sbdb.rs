//! sbdb CLI
//!
//! Run with:
//! ```bash
//! cargo run -p sbdb-service --bin sbdb -- --db-dir ./sbdb-data update stream1.bin stream2.bin
//! cargo run -p sbdb-service --bin sbdb -- --db-dir ./sbdb-data lookup http://phish.example/login
//! cargo run -p sbdb-service --bin sbdb -- --db-dir ./sbdb-data tables
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use sbdb_core::{split_tables, ClassifierConfig};
use sbdb_service::{metrics, DbService, ServiceError, UpdateObserver};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Bytes handed to the parser per call, mimicking network reads
const READ_SIZE: usize = 4096;

#[derive(Parser, Debug)]
#[command(name = "sbdb")]
#[command(about = "Maintain and query a local URL reputation database")]
struct Args {
    /// Database directory (overrides the config file)
    #[arg(long)]
    db_dir: Option<PathBuf>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print a Prometheus metrics snapshot before exiting
    #[arg(long)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply update streams, one per file, as a single update
    Update {
        files: Vec<PathBuf>,

        /// Table preselected for each stream
        #[arg(long)]
        table: Option<String>,

        /// Comma-separated tables to spoil if the update fails
        #[arg(long)]
        tables: Option<String>,
    },
    /// Look up a URL and print its verdict
    Lookup { url: String },
    /// Print the known tables and chunk ranges
    Tables,
}

struct LogObserver;

impl UpdateObserver for LogObserver {
    fn update_url_requested(&mut self, url: &str, table: &str) {
        println!("forward {} {}", table, url);
    }

    fn stream_finished(&mut self, error: Option<&ServiceError>) {
        if let Some(e) = error {
            warn!(error = %e, "Stream failed");
        }
    }

    fn update_error(&mut self, error: &ServiceError) {
        warn!(error = %error, "Update failed");
    }

    fn update_success(&mut self, wait_secs: u32) {
        info!(wait_secs, "Update applied");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("sbdb=info".parse()?)
                .add_directive("sbdb_core=info".parse()?)
                .add_directive("sbdb_service=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ClassifierConfig::load(path)?,
        None => ClassifierConfig::default(),
    };
    if let Some(dir) = args.db_dir {
        config.db_dir = dir;
    }

    let prometheus = if args.metrics {
        Some(metrics::init_prometheus_recorder()?)
    } else {
        None
    };

    let service = DbService::builder(config.clone()).build()?;
    let result = run(&service, &config, args.command).await;
    service.shutdown().await?;

    if let Some(handle) = prometheus {
        println!("{}", handle.render());
    }
    result
}

async fn run(service: &DbService, config: &ClassifierConfig, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Update { files, table, tables } => {
            let spoil = match tables {
                Some(list) => split_tables(&list),
                None => {
                    let mut all = config.malware_tables();
                    all.extend(config.phishing_tables());
                    all
                }
            };
            service.begin_update(LogObserver, spoil).await?;

            for file in &files {
                let data = match std::fs::read(file) {
                    Ok(data) => data,
                    Err(e) => {
                        service.cancel_update().await?;
                        return Err(e.into());
                    }
                };
                info!(file = %file.display(), bytes = data.len(), "Applying stream");

                service.begin_stream(table.as_deref()).await?;
                for piece in data.chunks(READ_SIZE) {
                    if service.update_stream(piece).await.is_err() {
                        // recorded on the session, reported at finish
                        break;
                    }
                }
                if let Err(e) = service.finish_stream().await {
                    warn!(file = %file.display(), error = %e, "Stream rejected");
                }
            }
            service.finish_update().await?;
            println!("{}", service.table_request().await?);
        }
        Command::Lookup { url } => {
            let tables = service.lookup(&url).await?;
            let verdict = sbdb_service::Classification::from_tables(&tables, config);
            if tables.is_empty() {
                println!("{}: {}", url, verdict);
            } else {
                println!("{}: {} ({})", url, verdict, tables);
            }
        }
        Command::Tables => {
            print!("{}", service.table_request().await?);
        }
    }
    Ok(())
}

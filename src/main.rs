mod batch;
mod config;
mod form;
mod http;
mod metrics;
mod models;
mod session;
mod tokens;

#[cfg(test)]
mod testing;

use batch::{BatchOptions, run_batch};
use clap::{Parser, Subcommand};
use config::{Endpoints, HttpSettings};
use eyre::WrapErr;
use session::SessionConfig;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

/// Publishes classified ads on bolha.com for a batch of accounts.
#[derive(Parser)]
#[command(name = "bolha-uploader")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in to every account in the records file and publish its ads
    Upload {
        /// JSON array of `{ "user": {...}, "ads": [...] }` records
        #[arg(short, long)]
        file: PathBuf,

        /// Publish without removing the account's active listings first
        #[arg(long)]
        keep_existing: bool,

        /// Limit how many accounts are processed at once (overrides BATCH_MAX_CONCURRENCY)
        #[arg(long)]
        max_concurrency: Option<usize>,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        error!(target = "bolha.cli", "upload aborted: {err:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> eyre::Result<()> {
    match cli.command {
        Commands::Upload {
            file,
            keep_existing,
            max_concurrency,
        } => upload(file, keep_existing, max_concurrency).await,
    }
}

async fn upload(
    file: PathBuf,
    keep_existing: bool,
    max_concurrency: Option<usize>,
) -> eyre::Result<()> {
    let records = models::load_records(&file)
        .await
        .wrap_err("loading upload records")?;
    let endpoints = Endpoints::from_env().wrap_err("resolving platform endpoints")?;
    let config = SessionConfig::new(endpoints, HttpSettings::from_env());
    let options = BatchOptions {
        clear_existing: !keep_existing,
        max_concurrency: max_concurrency
            .filter(|n| *n > 0)
            .or_else(config::batch_max_concurrency),
    };
    info!(
        target = "bolha.cli",
        file = %file.display(),
        records = records.len(),
        clear_existing = options.clear_existing,
        "upload_started"
    );

    // Per-record failures are reported in the batch summary; they do not fail the run.
    let report = run_batch(records, config, options).await;
    let summary =
        serde_json::to_string_pretty(&report.records).wrap_err("rendering batch summary")?;
    println!("{summary}");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,reqwest=warn,hyper=warn"));
    let _ = fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}

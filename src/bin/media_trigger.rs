use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use ad_media_pipeline::config;
use ad_media_pipeline::db;
use ad_media_pipeline::worker::BatchWorker;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Run the ad media pipeline once, for a batch or a single ad"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Process up to N eligible records
    Batch {
        /// Batch size (defaults to scheduler.batch_size)
        #[arg(long)]
        size: Option<u32>,
    },
    /// Re-run the pipeline for one ad, whatever its status
    Single {
        #[arg(long)]
        ad_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;
    let worker = BatchWorker::from_config(pool, &cfg)?;

    match args.command {
        Command::Batch { size } => {
            let size = size.filter(|s| *s > 0).unwrap_or(cfg.scheduler.batch_size);
            info!(size, "manual batch trigger");
            let summary = worker.trigger_batch(size).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Single { ad_id } => {
            let result = worker.trigger_single(&ad_id).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.success {
                std::process::exit(2);
            }
        }
    }
    Ok(())
}

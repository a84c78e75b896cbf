use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use ad_media_pipeline::config;
use ad_media_pipeline::db;
use ad_media_pipeline::report;

#[derive(Debug, Parser)]
#[command(author, version, about = "Print the ad media processing status report")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Emit JSON instead of a table
    #[arg(long)]
    json: bool,

    /// Override report.stale_processing_minutes
    #[arg(long)]
    stale_minutes: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let mut cfg = config::load(Some(&args.config))?;
    if let Some(minutes) = args.stale_minutes.filter(|m| *m > 0) {
        cfg.report.stale_processing_minutes = minutes;
    }

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let status = report::status_report(&pool, cfg.stale_processing_after()).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("{status}");
    }
    Ok(())
}

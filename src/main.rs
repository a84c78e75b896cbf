use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use ad_media_pipeline::config;
use ad_media_pipeline::db;
use ad_media_pipeline::scheduler::{ScheduleSettings, Scheduler};
use ad_media_pipeline::worker::BatchWorker;

#[derive(Debug, Parser)]
#[command(author, version, about = "Run the ad media pipeline on a fixed interval")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Override scheduler.interval_minutes
    #[arg(long)]
    interval_minutes: Option<u64>,
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
    if let Some(minutes) = args.interval_minutes.filter(|m| *m > 0) {
        cfg.scheduler.interval_minutes = minutes;
    }
    cfg.ensure_dirs()?;

    let database_url = cfg.database_url();
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let worker = Arc::new(BatchWorker::from_config(pool, &cfg)?);
    let scheduler = Scheduler::new(worker, ScheduleSettings::from_config(&cfg));

    info!(database_url = %database_url, "starting ad media scheduler");
    let handle = scheduler.start();

    shutdown_signal().await;
    info!("shutdown signal received");
    handle.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(?err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::error!(?err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

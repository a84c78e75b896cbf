use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use serde_json::Value;
use std::path::PathBuf;
use tracing::{info, warn};

use ad_media_pipeline::config;
use ad_media_pipeline::db;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Seed pending ad media records from a JSON-lines file of raw ads"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// JSON-lines file; each line is one raw ad object
    #[arg(long)]
    input: PathBuf,

    /// Field holding the external ad id
    #[arg(long, default_value = "ad_archive_id")]
    id_field: String,
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

    let content = tokio::fs::read_to_string(&args.input)
        .await
        .with_context(|| format!("failed to read {}", args.input.display()))?;

    let (mut inserted, mut existing, mut skipped) = (0usize, 0usize, 0usize);
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let ad_id = match serde_json::from_str::<Value>(line) {
            Ok(value) => ad_id_of(&value, &args.id_field),
            Err(err) => {
                warn!(line = lineno + 1, %err, "skipping unparseable line");
                None
            }
        };
        let Some(ad_id) = ad_id else {
            skipped += 1;
            continue;
        };
        // Raw content is stored verbatim; extraction happens in the worker.
        if db::insert_ad(&pool, &ad_id, line, Utc::now()).await? {
            inserted += 1;
        } else {
            existing += 1;
        }
    }

    info!(inserted, existing, skipped, "import finished");
    Ok(())
}

fn ad_id_of(value: &Value, field: &str) -> Option<String> {
    match value.get(field)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

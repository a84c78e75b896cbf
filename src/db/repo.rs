use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::instrument;

use super::model::AdMediaUpdate;
use crate::config::SelectionOrder;
use crate::error::{PipelineError, Result};
use crate::model::{AdMediaRecord, MediaStatus};

pub type Pool = SqlitePool;

const RECORD_COLUMNS: &str = "id, ad_id, raw_content, status, retry_count, last_error, \
     local_image_url, local_video_url, downloaded_at, created_at, updated_at";

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let in_memory = normalized.starts_with("sqlite::memory");
    let options = SqliteConnectOptions::from_str(&normalized)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);
    // Every in-memory connection is its own database, so keep exactly one.
    let max_connections = if in_memory { 1 } else { 4 };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match path_part.strip_prefix("~/") {
        Some(rest) => match std::env::var("HOME") {
            Ok(home) => format!("{}/{}", home.trim_end_matches('/'), rest),
            Err(_) => path_part.to_string(),
        },
        None => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn record_from_row(row: &SqliteRow) -> Result<AdMediaRecord> {
    let status: String = row.try_get("status")?;
    let status = MediaStatus::parse_status(&status).ok_or_else(|| {
        sqlx::Error::Decode(format!("unknown ad_media status '{status}'").into())
    })?;
    Ok(AdMediaRecord {
        id: row.try_get("id")?,
        ad_id: row.try_get("ad_id")?,
        raw_content: row.try_get("raw_content")?,
        status,
        retry_count: row.try_get("retry_count")?,
        last_error: row.try_get("last_error")?,
        local_image_url: row.try_get("local_image_url")?,
        local_video_url: row.try_get("local_video_url")?,
        downloaded_at: row.try_get("downloaded_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Insert a fresh `pending` record. Returns false when `ad_id` already exists.
#[instrument(skip_all, fields(ad_id = %ad_id))]
pub async fn insert_ad(
    pool: &Pool,
    ad_id: &str,
    raw_content: &str,
    created_at: DateTime<Utc>,
) -> Result<bool> {
    let res = sqlx::query(
        "INSERT OR IGNORE INTO ad_media (ad_id, raw_content, status, retry_count, created_at, updated_at) \
         VALUES (?, ?, ?, 0, ?, ?)",
    )
    .bind(ad_id)
    .bind(raw_content)
    .bind(MediaStatus::Pending.as_str())
    .bind(created_at)
    .bind(created_at)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

#[instrument(skip_all, fields(ad_id = %ad_id))]
pub async fn get_ad(pool: &Pool, ad_id: &str) -> Result<Option<AdMediaRecord>> {
    let row = sqlx::query(&format!(
        "SELECT {RECORD_COLUMNS} FROM ad_media WHERE ad_id = ?"
    ))
    .bind(ad_id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(record_from_row).transpose()
}

/// Records that may be attempted now: `pending` or `failed`, with retries left.
#[instrument(skip_all)]
pub async fn list_eligible(
    pool: &Pool,
    order: SelectionOrder,
    max_retries: i64,
    limit: u32,
) -> Result<Vec<AdMediaRecord>> {
    let order_by = match order {
        SelectionOrder::OldestCreated => "created_at ASC, id ASC",
        SelectionOrder::FewestRetries => "retry_count ASC, updated_at ASC, id ASC",
    };
    let rows = sqlx::query(&format!(
        "SELECT {RECORD_COLUMNS} FROM ad_media \
         WHERE status IN (?, ?) AND retry_count < ? \
         ORDER BY {order_by} LIMIT ?"
    ))
    .bind(MediaStatus::Pending.as_str())
    .bind(MediaStatus::Failed.as_str())
    .bind(max_retries)
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;
    rows.iter().map(record_from_row).collect()
}

/// Apply a partial update. `updated_at` is stamped on every call.
#[instrument(skip_all, fields(ad_id = %ad_id))]
pub async fn update_ad(pool: &Pool, ad_id: &str, update: &AdMediaUpdate) -> Result<()> {
    let mut qb = QueryBuilder::<Sqlite>::new("UPDATE ad_media SET updated_at = ");
    qb.push_bind(Utc::now());
    if let Some(status) = update.status {
        qb.push(", status = ").push_bind(status.as_str());
    }
    if let Some(retry_count) = update.retry_count {
        qb.push(", retry_count = ").push_bind(retry_count);
    }
    if let Some(last_error) = &update.last_error {
        qb.push(", last_error = ").push_bind(last_error.clone());
    }
    if let Some(url) = &update.local_image_url {
        qb.push(", local_image_url = ").push_bind(url.clone());
    }
    if let Some(url) = &update.local_video_url {
        qb.push(", local_video_url = ").push_bind(url.clone());
    }
    if let Some(at) = update.downloaded_at {
        qb.push(", downloaded_at = ").push_bind(at);
    }
    qb.push(" WHERE ad_id = ").push_bind(ad_id.to_string());

    let res = qb.build().execute(pool).await?;
    if res.rows_affected() == 0 {
        return Err(PipelineError::RecordNotFound(ad_id.to_string()));
    }
    Ok(())
}

/// Best-effort claim: flips the row to `processing` before any network work.
/// Not a lock; two overlapping triggers can both pass this point.
pub async fn mark_processing(pool: &Pool, ad_id: &str) -> Result<()> {
    update_ad(pool, ad_id, &AdMediaUpdate::status(MediaStatus::Processing)).await
}

/// Reset `processing` rows last touched before `older_than` to `pending`.
#[instrument(skip_all)]
pub async fn reclaim_stale_processing(pool: &Pool, older_than: DateTime<Utc>) -> Result<u64> {
    let res = sqlx::query(
        "UPDATE ad_media SET status = ?, updated_at = ? WHERE status = ? AND updated_at < ?",
    )
    .bind(MediaStatus::Pending.as_str())
    .bind(Utc::now())
    .bind(MediaStatus::Processing.as_str())
    .bind(older_than)
    .execute(pool)
    .await?;
    Ok(res.rows_affected())
}

#[instrument(skip_all)]
pub async fn count_stale_processing(pool: &Pool, older_than: DateTime<Utc>) -> Result<i64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM ad_media WHERE status = ? AND updated_at < ?")
            .bind(MediaStatus::Processing.as_str())
            .bind(older_than)
            .fetch_one(pool)
            .await?;
    Ok(count)
}

#[instrument(skip_all)]
pub async fn status_counts(pool: &Pool) -> Result<Vec<(MediaStatus, i64)>> {
    let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM ad_media GROUP BY status")
        .fetch_all(pool)
        .await?;
    let mut counts = Vec::with_capacity(rows.len());
    for row in rows {
        let status: String = row.try_get("status")?;
        let n: i64 = row.try_get("n")?;
        if let Some(status) = MediaStatus::parse_status(&status) {
            counts.push((status, n));
        }
    }
    Ok(counts)
}

/// `(created_at, downloaded_at)` for every successful record.
#[instrument(skip_all)]
pub async fn success_durations(pool: &Pool) -> Result<Vec<(DateTime<Utc>, DateTime<Utc>)>> {
    let rows = sqlx::query(
        "SELECT created_at, downloaded_at FROM ad_media WHERE status = ? AND downloaded_at IS NOT NULL",
    )
    .bind(MediaStatus::Success.as_str())
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|row| -> Result<(DateTime<Utc>, DateTime<Utc>)> {
            Ok((row.try_get("created_at")?, row.try_get("downloaded_at")?))
        })
        .collect()
}

/// `(retry_count, records)` ascending by retry count.
#[instrument(skip_all)]
pub async fn retry_histogram(pool: &Pool) -> Result<Vec<(i64, i64)>> {
    let rows: Vec<(i64, i64)> = sqlx::query_as(
        "SELECT retry_count, COUNT(*) FROM ad_media GROUP BY retry_count ORDER BY retry_count ASC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

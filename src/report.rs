//! Read-only operational status of the ad media table.

use std::fmt;

use chrono::Utc;
use serde::Serialize;

use crate::db::{self, Pool};
use crate::error::Result;
use crate::model::MediaStatus;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusShare {
    pub status: MediaStatus,
    pub count: i64,
    pub percentage: f64,
}

/// Seconds from record creation to `downloaded_at` across successful records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuccessTimeStats {
    pub samples: usize,
    pub average_seconds: f64,
    pub min_seconds: i64,
    pub max_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryBucket {
    pub retry_count: i64,
    pub records: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub total: i64,
    pub statuses: Vec<StatusShare>,
    pub success_time: Option<SuccessTimeStats>,
    pub retry_histogram: Vec<RetryBucket>,
    pub stale_after_minutes: i64,
    /// Diagnostic only; nothing reclaims these unless stale reclaim is configured.
    pub stale_processing: i64,
}

pub async fn status_report(pool: &Pool, stale_after: chrono::Duration) -> Result<StatusReport> {
    let counts = db::status_counts(pool).await?;
    let total: i64 = counts.iter().map(|(_, n)| n).sum();
    let statuses = MediaStatus::ALL
        .iter()
        .map(|status| {
            let count = counts
                .iter()
                .find(|(s, _)| s == status)
                .map(|(_, n)| *n)
                .unwrap_or(0);
            StatusShare {
                status: *status,
                count,
                percentage: percentage(count, total),
            }
        })
        .collect();

    let durations: Vec<i64> = db::success_durations(pool)
        .await?
        .into_iter()
        .map(|(created, downloaded)| (downloaded - created).num_seconds().max(0))
        .collect();

    let retry_histogram = db::retry_histogram(pool)
        .await?
        .into_iter()
        .map(|(retry_count, records)| RetryBucket {
            retry_count,
            records,
        })
        .collect();

    let stale_processing = db::count_stale_processing(pool, Utc::now() - stale_after).await?;

    Ok(StatusReport {
        total,
        statuses,
        success_time: success_time_stats(&durations),
        retry_histogram,
        stale_after_minutes: stale_after.num_minutes(),
        stale_processing,
    })
}

fn percentage(count: i64, total: i64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (count as f64 * 10_000.0 / total as f64).round() / 100.0
}

fn success_time_stats(durations: &[i64]) -> Option<SuccessTimeStats> {
    let min_seconds = *durations.iter().min()?;
    let max_seconds = *durations.iter().max()?;
    let sum: i64 = durations.iter().sum();
    Some(SuccessTimeStats {
        samples: durations.len(),
        average_seconds: sum as f64 / durations.len() as f64,
        min_seconds,
        max_seconds,
    })
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Ad media records: {}", self.total)?;
        for share in &self.statuses {
            writeln!(
                f,
                "  {:<11} {:>8}  {:>6.2}%",
                share.status.as_str(),
                share.count,
                share.percentage
            )?;
        }
        match &self.success_time {
            Some(t) => writeln!(
                f,
                "Time to download ({} samples): avg {:.1}s, min {}s, max {}s",
                t.samples, t.average_seconds, t.min_seconds, t.max_seconds
            )?,
            None => writeln!(f, "Time to download: no successful records")?,
        }
        writeln!(f, "Retry histogram:")?;
        for bucket in &self.retry_histogram {
            writeln!(f, "  retries={:<3} {:>8}", bucket.retry_count, bucket.records)?;
        }
        write!(
            f,
            "Stuck in processing > {}m: {}",
            self.stale_after_minutes, self.stale_processing
        )
    }
}

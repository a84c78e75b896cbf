use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::config::{Config, SelectionOrder};
use crate::db::{self, Pool};
use crate::error::{PipelineError, Result};
use crate::model::{BatchSummary, SingleResult};
use crate::pipeline::{Pipeline, RecordOutcome};
use crate::probe::{HttpProber, Prober};
use crate::retry::RetryPolicy;
use crate::storage::uploader::UploadSettings;
use crate::storage::{MediaStorage, MediaUploader, StorageClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    pub order: SelectionOrder,
    /// Budget and pacing for batch runs.
    pub scheduled: RetryPolicy,
    /// Budget for operator-driven single-ad runs.
    pub manual: RetryPolicy,
}

/// Selects eligible records and drives them through the pipeline, one at a time.
pub struct BatchWorker {
    pool: Pool,
    pipeline: Pipeline,
    settings: WorkerSettings,
}

impl BatchWorker {
    pub fn new(pool: Pool, pipeline: Pipeline, settings: WorkerSettings) -> Self {
        Self {
            pool,
            pipeline,
            settings,
        }
    }

    /// Wire the HTTP prober and storage client described by `cfg`.
    pub fn from_config(pool: Pool, cfg: &Config) -> anyhow::Result<Self> {
        let prober: Arc<dyn Prober> =
            Arc::new(HttpProber::new(cfg.probe_timeout()).context("failed to build prober")?);
        let storage: Arc<dyn MediaStorage> = Arc::new(
            StorageClient::from_settings(&cfg.storage).context("failed to build storage client")?,
        );
        Ok(Self::with_services(pool, cfg, prober, storage))
    }

    pub fn with_services(
        pool: Pool,
        cfg: &Config,
        prober: Arc<dyn Prober>,
        storage: Arc<dyn MediaStorage>,
    ) -> Self {
        let uploader = MediaUploader::new(storage, UploadSettings::from(&cfg.storage));
        let pipeline = Pipeline::new(prober, uploader, cfg.retry.no_media_policy);
        let settings = WorkerSettings {
            order: cfg.scheduler.selection_order,
            scheduled: cfg.scheduled_retry_policy(),
            manual: cfg.manual_retry_policy(),
        };
        Self::new(pool, pipeline, settings)
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Process up to `batch_size` eligible records sequentially.
    pub async fn trigger_batch(&self, batch_size: u32) -> Result<BatchSummary> {
        self.run_batch(batch_size, &CancellationToken::new()).await
    }

    /// Like [`trigger_batch`](Self::trigger_batch), but stops between records
    /// once `cancel` fires. The record in flight always finishes.
    #[instrument(skip_all, fields(batch_size = batch_size))]
    pub async fn run_batch(
        &self,
        batch_size: u32,
        cancel: &CancellationToken,
    ) -> Result<BatchSummary> {
        let policy = self.settings.scheduled;
        let records =
            db::list_eligible(&self.pool, self.settings.order, policy.max_retries, batch_size)
                .await?;
        let mut summary = BatchSummary::default();
        if records.is_empty() {
            info!("no eligible ad media records");
            return Ok(summary);
        }
        info!(selected = records.len(), "starting ad media batch");

        let total = records.len();
        for (idx, record) in records.iter().enumerate() {
            let outcome = match self
                .pipeline
                .process_record(&self.pool, record, &policy, policy.max_retries)
                .await
            {
                Ok(outcome) => outcome,
                Err(PipelineError::RecordNotFound(ad_id)) => {
                    warn!(ad_id = %ad_id, "record vanished mid-batch; skipping");
                    continue;
                }
                Err(err) => {
                    error!(ad_id = %record.ad_id, %err, "persistence failure; aborting batch");
                    return Err(err);
                }
            };
            summary.processed += 1;
            let pause = match &outcome {
                RecordOutcome::Succeeded { .. } => {
                    summary.succeeded += 1;
                    policy.delay_after_success()
                }
                RecordOutcome::Failed { retry_count, .. } => {
                    summary.failed += 1;
                    policy.delay_after_failure(*retry_count)
                }
            };

            if idx + 1 < total && !pause_or_cancel(pause, cancel).await {
                warn!(processed = summary.processed, "batch cancelled between records");
                break;
            }
        }

        info!(
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "ad media batch finished"
        );
        Ok(summary)
    }

    /// Run the pipeline for one ad regardless of its current status. Failures
    /// count against the manual budget, and the row turns `failed` once it is
    /// past the scheduled one.
    #[instrument(skip_all, fields(ad_id = %ad_id))]
    pub async fn trigger_single(&self, ad_id: &str) -> Result<SingleResult> {
        let record = db::get_ad(&self.pool, ad_id)
            .await?
            .ok_or_else(|| PipelineError::RecordNotFound(ad_id.to_string()))?;
        info!(status = %record.status, "manual trigger");

        let outcome = self
            .pipeline
            .process_record(
                &self.pool,
                &record,
                &self.settings.manual,
                self.settings.scheduled.max_retries,
            )
            .await?;
        let stored = db::get_ad(&self.pool, ad_id)
            .await?
            .ok_or_else(|| PipelineError::RecordNotFound(ad_id.to_string()))?;

        Ok(match outcome {
            RecordOutcome::Succeeded { .. } => SingleResult {
                success: true,
                local_image_url: stored.local_image_url,
                local_video_url: stored.local_video_url,
                error: None,
            },
            RecordOutcome::Failed { error, .. } => SingleResult {
                success: false,
                local_image_url: stored.local_image_url,
                local_video_url: stored.local_video_url,
                error: Some(error),
            },
        })
    }

    /// Reset records stuck in `processing` for longer than `age` to `pending`.
    pub async fn reclaim_stale(&self, age: chrono::Duration) -> Result<u64> {
        let reclaimed = db::reclaim_stale_processing(&self.pool, Utc::now() - age).await?;
        if reclaimed > 0 {
            warn!(reclaimed, "reset stale processing records to pending");
        }
        Ok(reclaimed)
    }
}

/// Sleep for `pause`; false if `cancel` fired first.
async fn pause_or_cancel(pause: Duration, cancel: &CancellationToken) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    if pause.is_zero() {
        return true;
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(pause) => true,
    }
}

//! Periodic batch runs with explicit start/stop.
//!
//! [`Scheduler::start`] hands back a [`SchedulerHandle`] that owns the
//! cancellation token and the loop task; dropping the handle without calling
//! [`SchedulerHandle::stop`] leaves the loop running.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::error::Result;
use crate::model::{BatchSummary, SingleResult};
use crate::worker::BatchWorker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleSettings {
    pub interval: Duration,
    pub batch_size: u32,
    /// Reset `processing` rows older than this before each run; `None` disables it.
    pub reclaim_stale_after: Option<chrono::Duration>,
}

impl ScheduleSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            interval: cfg.scheduler_interval(),
            batch_size: cfg.scheduler.batch_size,
            reclaim_stale_after: cfg
                .scheduler
                .reclaim_stale_after_minutes
                .map(|m| chrono::Duration::minutes(m as i64)),
        }
    }
}

#[derive(Clone)]
pub struct Scheduler {
    worker: Arc<BatchWorker>,
    settings: ScheduleSettings,
}

pub struct SchedulerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Cancel the interval timer and wait for the loop to exit. A batch in
    /// progress stops after its current record.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            error!(?err, "scheduler task ended abnormally");
        }
        info!("scheduler stopped");
    }
}

impl Scheduler {
    pub fn new(worker: Arc<BatchWorker>, settings: ScheduleSettings) -> Self {
        Self { worker, settings }
    }

    /// Spawn the loop. The first batch runs immediately, then once per interval;
    /// a run that overruns the interval delays the next tick instead of overlapping.
    pub fn start(&self) -> SchedulerHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let this = self.clone();
        info!(
            interval_secs = self.settings.interval.as_secs(),
            batch_size = self.settings.batch_size,
            "scheduler started"
        );
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.settings.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = this.run_once(&token).await {
                            error!(%err, "scheduled batch failed");
                        }
                    }
                }
            }
        });
        SchedulerHandle { cancel, task }
    }

    /// One scheduled run: optional stale reclaim, then a batch.
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<BatchSummary> {
        if let Some(age) = self.settings.reclaim_stale_after {
            self.worker.reclaim_stale(age).await?;
        }
        self.worker.run_batch(self.settings.batch_size, cancel).await
    }

    /// Manual trigger for one ad; bypasses eligibility entirely.
    pub async fn trigger_single(&self, ad_id: &str) -> Result<SingleResult> {
        self.worker.trigger_single(ad_id).await
    }
}

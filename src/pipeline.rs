//! Per-ad acquisition: extract candidates, probe, upload, and record the
//! resulting state transition.
//!
//! Transitions:
//! - `pending | failed` -> `processing` before any network call (best effort,
//!   not atomic; overlapping triggers on one ad can both get here).
//! - `processing` -> `success` when the attempt produced media (or, under
//!   [`NoMediaPolicy::Succeed`], produced nothing without error). Clears
//!   `last_error`, resets `retry_count`, stamps `downloaded_at`.
//! - `processing` -> `pending | failed` when the attempt failed: `retry_count`
//!   grows by one, never past the policy budget, and the row becomes `failed`
//!   once it reaches either that budget or `terminal_at`.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::config::NoMediaPolicy;
use crate::db::{self, AdMediaUpdate, Pool};
use crate::error::Result;
use crate::extract::{self, Extraction};
use crate::model::{AdMediaRecord, MediaKind, MediaStatus, UploadedMedia};
use crate::probe::Prober;
use crate::retry::RetryPolicy;
use crate::storage::MediaUploader;

/// Why an attempt on one ad produced nothing usable.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("no media candidates found{}", diagnostics_suffix(.diagnostics))]
    NoCandidates { diagnostics: Vec<String> },
    #[error("no usable media: {last_error}")]
    NoUsableMedia {
        kinds: Vec<MediaKind>,
        last_error: String,
    },
}

fn diagnostics_suffix(diagnostics: &[String]) -> String {
    if diagnostics.is_empty() {
        String::new()
    } else {
        format!(" ({})", diagnostics.join("; "))
    }
}

/// One more failure, capped at the policy budget.
fn next_retry_count(current: i64, policy: &RetryPolicy) -> i64 {
    (current + 1).min(policy.max_retries.max(current))
}

/// Media obtained by one successful attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttemptOutcome {
    pub image: Option<UploadedMedia>,
    pub video: Option<UploadedMedia>,
}

enum KindResult {
    Skipped,
    Uploaded(UploadedMedia),
    Exhausted(String),
}

/// Terminal result of processing one record, after persistence.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Succeeded {
        local_image_url: Option<String>,
        local_video_url: Option<String>,
    },
    Failed {
        status: MediaStatus,
        retry_count: i64,
        error: String,
    },
}

impl RecordOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RecordOutcome::Succeeded { .. })
    }
}

#[derive(Clone)]
pub struct Pipeline {
    prober: Arc<dyn Prober>,
    uploader: MediaUploader,
    no_media_policy: NoMediaPolicy,
}

impl Pipeline {
    pub fn new(
        prober: Arc<dyn Prober>,
        uploader: MediaUploader,
        no_media_policy: NoMediaPolicy,
    ) -> Self {
        Self {
            prober,
            uploader,
            no_media_policy,
        }
    }

    /// Run one attempt for `record` and persist the transition. Only datastore
    /// failures are returned as errors.
    ///
    /// `terminal_at` is the retry count from which scheduled selection no longer
    /// picks the row up; a failure that reaches it is written as `failed` even
    /// when `policy` would allow more manual attempts.
    #[instrument(skip_all, fields(ad_id = %record.ad_id, retry_count = record.retry_count))]
    pub async fn process_record(
        &self,
        pool: &Pool,
        record: &AdMediaRecord,
        policy: &RetryPolicy,
        terminal_at: i64,
    ) -> Result<RecordOutcome> {
        db::mark_processing(pool, &record.ad_id).await?;

        match self.attempt(record).await {
            Ok(outcome) => {
                let local_image_url = outcome.image.map(|m| m.public_url);
                let local_video_url = outcome.video.map(|m| m.public_url);
                let update = AdMediaUpdate {
                    status: Some(MediaStatus::Success),
                    retry_count: Some(0),
                    last_error: Some(None),
                    local_image_url: local_image_url.clone().map(Some),
                    local_video_url: local_video_url.clone().map(Some),
                    downloaded_at: Some(Some(Utc::now())),
                };
                db::update_ad(pool, &record.ad_id, &update).await?;
                info!(
                    image = local_image_url.as_deref().unwrap_or("-"),
                    video = local_video_url.as_deref().unwrap_or("-"),
                    "ad media acquired"
                );
                Ok(RecordOutcome::Succeeded {
                    local_image_url,
                    local_video_url,
                })
            }
            Err(err) => {
                let retry_count = next_retry_count(record.retry_count, policy);
                let status = if policy.is_exhausted(retry_count) || retry_count >= terminal_at {
                    MediaStatus::Failed
                } else {
                    MediaStatus::Pending
                };
                let error = err.to_string();
                let update = AdMediaUpdate {
                    status: Some(status),
                    retry_count: Some(retry_count),
                    last_error: Some(Some(error.clone())),
                    ..Default::default()
                };
                db::update_ad(pool, &record.ad_id, &update).await?;
                warn!(%error, retry_count, status = %status, "ad media attempt failed");
                Ok(RecordOutcome::Failed {
                    status,
                    retry_count,
                    error,
                })
            }
        }
    }

    /// Extraction, probing and upload for one ad, without touching the datastore.
    pub async fn attempt(
        &self,
        record: &AdMediaRecord,
    ) -> std::result::Result<AttemptOutcome, AttemptError> {
        let Extraction {
            image_urls,
            video_urls,
            diagnostics,
        } = extract::extract(&record.raw_content);

        if image_urls.is_empty() && video_urls.is_empty() {
            return match self.no_media_policy {
                NoMediaPolicy::Succeed => Ok(AttemptOutcome::default()),
                NoMediaPolicy::Fail => Err(AttemptError::NoCandidates { diagnostics }),
            };
        }

        let image = self
            .acquire_kind(record, MediaKind::Image, &image_urls)
            .await;
        let video = self
            .acquire_kind(record, MediaKind::Video, &video_urls)
            .await;

        let mut outcome = AttemptOutcome::default();
        let mut exhausted = Vec::new();
        let mut last_error = None;
        for (kind, result) in [(MediaKind::Image, image), (MediaKind::Video, video)] {
            match result {
                KindResult::Skipped => {}
                KindResult::Uploaded(media) => match kind {
                    MediaKind::Image => outcome.image = Some(media),
                    MediaKind::Video => outcome.video = Some(media),
                },
                KindResult::Exhausted(err) => {
                    exhausted.push(kind);
                    last_error = Some(err);
                }
            }
        }

        if outcome.image.is_some() || outcome.video.is_some() {
            return Ok(outcome);
        }
        match self.no_media_policy {
            NoMediaPolicy::Succeed => Ok(outcome),
            NoMediaPolicy::Fail => Err(AttemptError::NoUsableMedia {
                kinds: exhausted,
                last_error: last_error.unwrap_or_else(|| "no candidate could be uploaded".into()),
            }),
        }
    }

    /// First-success-wins over `candidates` in extractor order.
    async fn acquire_kind(
        &self,
        record: &AdMediaRecord,
        kind: MediaKind,
        candidates: &[String],
    ) -> KindResult {
        if candidates.is_empty() {
            return KindResult::Skipped;
        }
        let mut last_error = String::new();
        for url in candidates {
            if !self.prober.is_accessible(url).await {
                warn!(kind = %kind, url = %url, "candidate not reachable");
                last_error = format!("{kind} candidate not reachable: {url}");
                continue;
            }
            match self
                .uploader
                .upload(url, &record.ad_id, kind, record.retry_count)
                .await
            {
                Ok(media) => return KindResult::Uploaded(media),
                Err(err) => {
                    warn!(kind = %kind, url = %url, %err, "candidate upload failed");
                    last_error = format!("{kind} upload failed for {url}: {err}");
                }
            }
        }
        KindResult::Exhausted(last_error)
    }
}

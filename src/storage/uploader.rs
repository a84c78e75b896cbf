use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use crate::config::StorageSettings;
use crate::model::{MediaKind, UploadedMedia};
use crate::storage::{MediaStorage, UploadError, UploadOptions};

/// Per-kind upload budgets and destinations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSettings {
    pub image_folder: String,
    pub video_folder: String,
    pub image_timeout: Duration,
    pub video_timeout: Duration,
    pub video_retry_timeout: Duration,
    pub video_retry_transformation: Option<String>,
}

impl From<&StorageSettings> for UploadSettings {
    fn from(s: &StorageSettings) -> Self {
        Self {
            image_folder: s.image_folder.clone(),
            video_folder: s.video_folder.clone(),
            image_timeout: Duration::from_secs(s.image_timeout_seconds),
            video_timeout: Duration::from_secs(s.video_timeout_seconds),
            video_retry_timeout: Duration::from_secs(s.video_retry_timeout_seconds),
            video_retry_transformation: s.video_retry_transformation.clone(),
        }
    }
}

/// Pushes probed candidate URLs to remote storage under per-ad keys.
#[derive(Clone)]
pub struct MediaUploader {
    storage: Arc<dyn MediaStorage>,
    settings: UploadSettings,
}

impl MediaUploader {
    pub fn new(storage: Arc<dyn MediaStorage>, settings: UploadSettings) -> Self {
        Self { storage, settings }
    }

    /// Upload options for `kind`. `retry_count` is the number of earlier
    /// failed attempts on the ad; videos get a shorter, transformed retry.
    pub fn options_for(
        &self,
        ad_id: &str,
        kind: MediaKind,
        retry_count: i64,
        now: DateTime<Utc>,
    ) -> UploadOptions {
        let destination_key = destination_key(ad_id, kind, now);
        match kind {
            MediaKind::Image => UploadOptions {
                folder: self.settings.image_folder.clone(),
                destination_key,
                resource_type: kind.into(),
                timeout: self.settings.image_timeout,
                transformation: None,
            },
            MediaKind::Video if retry_count == 0 => UploadOptions {
                folder: self.settings.video_folder.clone(),
                destination_key,
                resource_type: kind.into(),
                timeout: self.settings.video_timeout,
                transformation: None,
            },
            MediaKind::Video => UploadOptions {
                folder: self.settings.video_folder.clone(),
                destination_key,
                resource_type: kind.into(),
                timeout: self.settings.video_retry_timeout,
                transformation: self.settings.video_retry_transformation.clone(),
            },
        }
    }

    #[instrument(skip_all, fields(ad_id = %ad_id, kind = %kind))]
    pub async fn upload(
        &self,
        source_url: &str,
        ad_id: &str,
        kind: MediaKind,
        retry_count: i64,
    ) -> Result<UploadedMedia, UploadError> {
        let options = self.options_for(ad_id, kind, retry_count, Utc::now());
        let uploaded = self.storage.upload(source_url, &options).await?;
        info!(
            public_url = %uploaded.public_url,
            format = %uploaded.format,
            "media uploaded"
        );
        Ok(uploaded)
    }
}

/// `{adId}_{kind}_{unix_millis}` with characters outside `[A-Za-z0-9_-]` replaced,
/// so a retry never overwrites an earlier upload of the same ad.
pub fn destination_key(ad_id: &str, kind: MediaKind, now: DateTime<Utc>) -> String {
    let safe: String = ad_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}_{}_{}", safe, kind.as_str(), now.timestamp_millis())
}

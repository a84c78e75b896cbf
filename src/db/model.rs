//! Write-side shapes used by repositories.
//!
//! Keep these structs focused on what a query touches. State transition rules
//! live in `crate::pipeline`.

use chrono::{DateTime, Utc};

use crate::model::MediaStatus;

/// Partial update of an `ad_media` row. `None` leaves a column untouched;
/// `Some(None)` clears a nullable column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdMediaUpdate {
    pub status: Option<MediaStatus>,
    pub retry_count: Option<i64>,
    pub last_error: Option<Option<String>>,
    pub local_image_url: Option<Option<String>>,
    pub local_video_url: Option<Option<String>>,
    pub downloaded_at: Option<Option<DateTime<Utc>>>,
}

impl AdMediaUpdate {
    pub fn status(status: MediaStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

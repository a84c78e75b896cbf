use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum MediaStatus {
    Pending,
    Processing,
    Success,
    Failed,
}

impl MediaStatus {
    pub const ALL: [MediaStatus; 4] = [
        MediaStatus::Pending,
        MediaStatus::Processing,
        MediaStatus::Success,
        MediaStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaStatus::Pending => "pending",
            MediaStatus::Processing => "processing",
            MediaStatus::Success => "success",
            MediaStatus::Failed => "failed",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(MediaStatus::Pending),
            "processing" => Some(MediaStatus::Processing),
            "success" => Some(MediaStatus::Success),
            "failed" => Some(MediaStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for MediaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted per-ad media state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdMediaRecord {
    pub id: i64,
    pub ad_id: String,
    pub raw_content: String,
    pub status: MediaStatus,
    pub retry_count: i64,
    pub last_error: Option<String>,
    pub local_image_url: Option<String>,
    pub local_video_url: Option<String>,
    pub downloaded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of a successful upload to remote media storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedMedia {
    pub public_url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_seconds: Option<f64>,
    pub format: String,
    pub resource_type: String,
}

/// Counts returned by a batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Outcome of a single-ad manual trigger.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SingleResult {
    pub success: bool,
    pub local_image_url: Option<String>,
    pub local_video_url: Option<String>,
    pub error: Option<String>,
}

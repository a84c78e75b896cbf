//! Configuration loader and validator for the ad media pipeline.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::retry::{Backoff, RetryPolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub app: App,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub probe: ProbeSettings,
    pub storage: StorageSettings,
    #[serde(default)]
    pub report: ReportSettings,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    #[serde(default)]
    pub database_url: Option<String>,
}

/// Order in which eligible records are picked up.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SelectionOrder {
    /// Oldest `created_at` first.
    #[default]
    OldestCreated,
    /// Lowest `retry_count` first, then oldest `updated_at`.
    FewestRetries,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulerSettings {
    pub interval_minutes: u64,
    pub batch_size: u32,
    pub inter_record_delay_ms: u64,
    pub selection_order: SelectionOrder,
    /// When set, `processing` rows older than this are reset to `pending`
    /// before each scheduled batch.
    pub reclaim_stale_after_minutes: Option<u64>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            interval_minutes: 2,
            batch_size: 10,
            inter_record_delay_ms: 2000,
            selection_order: SelectionOrder::OldestCreated,
            reclaim_stale_after_minutes: None,
        }
    }
}

/// What an attempt that ends with no uploaded media counts as.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NoMediaPolicy {
    #[default]
    Fail,
    Succeed,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    #[default]
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: i64,
    pub manual_max_retries: i64,
    pub backoff: BackoffKind,
    pub max_backoff_seconds: u64,
    pub no_media_policy: NoMediaPolicy,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            manual_max_retries: 5,
            backoff: BackoffKind::Fixed,
            max_backoff_seconds: 60,
            no_media_policy: NoMediaPolicy::Fail,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProbeSettings {
    pub timeout_seconds: u64,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: 15,
        }
    }
}

/// Remote media storage account and upload budgets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageSettings {
    pub base_url: String,
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
    #[serde(default = "default_image_folder")]
    pub image_folder: String,
    #[serde(default = "default_video_folder")]
    pub video_folder: String,
    #[serde(default = "default_image_timeout")]
    pub image_timeout_seconds: u64,
    #[serde(default = "default_video_timeout")]
    pub video_timeout_seconds: u64,
    #[serde(default = "default_video_retry_timeout")]
    pub video_retry_timeout_seconds: u64,
    #[serde(default)]
    pub video_retry_transformation: Option<String>,
}

fn default_image_folder() -> String {
    "ads/images".into()
}

fn default_video_folder() -> String {
    "ads/videos".into()
}

fn default_image_timeout() -> u64 {
    60
}

fn default_video_timeout() -> u64 {
    300
}

fn default_video_retry_timeout() -> u64 {
    180
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReportSettings {
    pub stale_processing_minutes: u64,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            stale_processing_minutes: 30,
        }
    }
}

impl App {
    /// Expand a leading `~/` in `data_dir`.
    pub fn resolved_data_dir(&self) -> String {
        match self.data_dir.strip_prefix("~/") {
            Some(rest) => match std::env::var("HOME") {
                Ok(home) => format!("{}/{}", home.trim_end_matches('/'), rest),
                Err(_) => self.data_dir.clone(),
            },
            None => self.data_dir.clone(),
        }
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(self.app.resolved_data_dir())
    }

    /// `DATABASE_URL` wins over `app.database_url`, which wins over the data dir default.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .ok()
            .or_else(|| self.app.database_url.clone())
            .unwrap_or_else(|| format!("sqlite://{}/ad_media.db", self.app.resolved_data_dir()))
    }

    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.interval_minutes * 60)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe.timeout_seconds)
    }

    pub fn stale_processing_after(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.report.stale_processing_minutes as i64)
    }

    /// Policy used by scheduled batches.
    pub fn scheduled_retry_policy(&self) -> RetryPolicy {
        self.retry_policy(self.retry.max_retries)
    }

    /// Policy used by operator-driven single-ad triggers.
    pub fn manual_retry_policy(&self) -> RetryPolicy {
        self.retry_policy(self.retry.manual_max_retries)
    }

    fn retry_policy(&self, max_retries: i64) -> RetryPolicy {
        let base_delay = Duration::from_millis(self.scheduler.inter_record_delay_ms);
        let backoff = match self.retry.backoff {
            BackoffKind::Fixed => Backoff::Fixed,
            BackoffKind::Exponential => Backoff::Exponential {
                cap: Duration::from_secs(self.retry.max_backoff_seconds),
            },
        };
        RetryPolicy {
            base_delay,
            max_retries,
            backoff,
        }
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }

    let sched = &cfg.scheduler;
    if sched.interval_minutes == 0 {
        return Err(ConfigError::Invalid("scheduler.interval_minutes must be > 0"));
    }
    if sched.batch_size == 0 {
        return Err(ConfigError::Invalid("scheduler.batch_size must be > 0"));
    }
    if !(1000..=3000).contains(&sched.inter_record_delay_ms) {
        return Err(ConfigError::Invalid(
            "scheduler.inter_record_delay_ms must be between 1000 and 3000",
        ));
    }
    if sched.reclaim_stale_after_minutes == Some(0) {
        return Err(ConfigError::Invalid(
            "scheduler.reclaim_stale_after_minutes must be > 0 when set",
        ));
    }

    if cfg.retry.max_retries <= 0 {
        return Err(ConfigError::Invalid("retry.max_retries must be > 0"));
    }
    if cfg.retry.manual_max_retries < cfg.retry.max_retries {
        return Err(ConfigError::Invalid(
            "retry.manual_max_retries must be >= retry.max_retries",
        ));
    }

    if cfg.probe.timeout_seconds == 0 {
        return Err(ConfigError::Invalid("probe.timeout_seconds must be > 0"));
    }

    let st = &cfg.storage;
    if st.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("storage.base_url must be non-empty"));
    }
    if reqwest::Url::parse(&st.base_url).is_err() {
        return Err(ConfigError::Invalid("storage.base_url must be an absolute URL"));
    }
    if st.cloud_name.trim().is_empty() {
        return Err(ConfigError::Invalid("storage.cloud_name must be non-empty"));
    }
    if st.api_key.trim().is_empty() {
        return Err(ConfigError::Invalid("storage.api_key must be non-empty"));
    }
    if st.api_secret.trim().is_empty() {
        return Err(ConfigError::Invalid("storage.api_secret must be non-empty"));
    }
    if st.image_folder.trim().is_empty() || st.video_folder.trim().is_empty() {
        return Err(ConfigError::Invalid("storage folders must be non-empty"));
    }
    if st.image_timeout_seconds == 0
        || st.video_timeout_seconds == 0
        || st.video_retry_timeout_seconds == 0
    {
        return Err(ConfigError::Invalid("storage timeouts must be > 0"));
    }

    if cfg.report.stale_processing_minutes == 0 {
        return Err(ConfigError::Invalid("report.stale_processing_minutes must be > 0"));
    }

    Ok(())
}

/// Example configuration document.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

scheduler:
  interval_minutes: 2
  batch_size: 10
  inter_record_delay_ms: 2000
  selection_order: oldest_created

retry:
  max_retries: 3
  manual_max_retries: 5
  backoff: fixed
  max_backoff_seconds: 60
  no_media_policy: fail

probe:
  timeout_seconds: 15

storage:
  base_url: "https://api.cloudinary.com/"
  cloud_name: "YOUR_CLOUD_NAME"
  api_key: "YOUR_API_KEY"
  api_secret: "YOUR_API_SECRET"
  image_folder: "ads/images"
  video_folder: "ads/videos"
  image_timeout_seconds: 60
  video_timeout_seconds: 300
  video_retry_timeout_seconds: 180
  video_retry_transformation: "q_auto:low,f_mp4"

report:
  stale_processing_minutes: 30
"#
}

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use ad_media_pipeline::config::{self, Config, NoMediaPolicy, SelectionOrder};
use ad_media_pipeline::db::{self, Pool};
use ad_media_pipeline::model::UploadedMedia;
use ad_media_pipeline::pipeline::Pipeline;
use ad_media_pipeline::probe::Prober;
use ad_media_pipeline::retry::RetryPolicy;
use ad_media_pipeline::storage::uploader::UploadSettings;
use ad_media_pipeline::storage::{MediaStorage, MediaUploader, UploadError, UploadOptions};
use ad_media_pipeline::worker::{BatchWorker, WorkerSettings};

pub async fn setup_pool() -> Pool {
    let pool = db::init_pool("sqlite::memory:").await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    pool
}

pub fn example_config() -> Config {
    serde_yaml::from_str(config::example()).unwrap()
}

#[derive(Default)]
pub struct RecordingProber {
    reachable: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl RecordingProber {
    pub fn reachable(urls: &[&str]) -> Self {
        Self {
            reachable: urls.iter().map(|u| u.to_string()).collect(),
            ..Default::default()
        }
    }

    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl Prober for RecordingProber {
    async fn is_accessible(&self, url: &str) -> bool {
        self.calls.lock().await.push(url.to_string());
        self.reachable.contains(url)
    }
}

#[derive(Default)]
pub struct RecordingStorage {
    failing: HashSet<String>,
    calls: Mutex<Vec<(String, UploadOptions)>>,
}

impl RecordingStorage {
    pub fn failing(urls: &[&str]) -> Self {
        Self {
            failing: urls.iter().map(|u| u.to_string()).collect(),
            ..Default::default()
        }
    }

    pub async fn calls(&self) -> Vec<(String, UploadOptions)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl MediaStorage for RecordingStorage {
    async fn upload(
        &self,
        source_url: &str,
        options: &UploadOptions,
    ) -> Result<UploadedMedia, UploadError> {
        self.calls
            .lock()
            .await
            .push((source_url.to_string(), options.clone()));
        if self.failing.contains(source_url) {
            return Err(UploadError::Provider {
                status: 400,
                message: format!("cannot fetch {source_url}"),
            });
        }
        Ok(UploadedMedia {
            public_url: format!(
                "https://media.test/{}/{}",
                options.folder, options.destination_key
            ),
            width: Some(100),
            height: Some(100),
            duration_seconds: None,
            format: "jpg".into(),
            resource_type: options.resource_type.as_str().into(),
        })
    }
}

pub struct Harness {
    pub pool: Pool,
    pub prober: Arc<RecordingProber>,
    pub storage: Arc<RecordingStorage>,
    pub worker: Arc<BatchWorker>,
}

pub struct HarnessOptions {
    pub base_delay: Duration,
    pub max_retries: i64,
    pub manual_max_retries: i64,
    pub no_media_policy: NoMediaPolicy,
    pub order: SelectionOrder,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            base_delay: Duration::ZERO,
            max_retries: 3,
            manual_max_retries: 5,
            no_media_policy: NoMediaPolicy::Fail,
            order: SelectionOrder::OldestCreated,
        }
    }
}

pub async fn harness(prober: RecordingProber, storage: RecordingStorage) -> Harness {
    harness_with(prober, storage, HarnessOptions::default()).await
}

pub async fn harness_with(
    prober: RecordingProber,
    storage: RecordingStorage,
    opts: HarnessOptions,
) -> Harness {
    let pool = setup_pool().await;
    let cfg = example_config();
    let prober = Arc::new(prober);
    let storage = Arc::new(storage);
    let uploader = MediaUploader::new(storage.clone(), UploadSettings::from(&cfg.storage));
    let pipeline = Pipeline::new(prober.clone(), uploader, opts.no_media_policy);
    let settings = WorkerSettings {
        order: opts.order,
        scheduled: RetryPolicy::fixed(opts.base_delay, opts.max_retries),
        manual: RetryPolicy::fixed(opts.base_delay, opts.manual_max_retries),
    };
    let worker = Arc::new(BatchWorker::new(pool.clone(), pipeline, settings));
    Harness {
        pool,
        prober,
        storage,
        worker,
    }
}

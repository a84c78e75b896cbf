use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Url};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::StorageSettings;
use crate::model::{MediaKind, UploadedMedia};
use crate::storage::model::{ErrorResponse, UploadResponse};

pub mod model;
pub mod uploader;

pub use uploader::MediaUploader;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload timed out after {0:?}")]
    Timeout(Duration),
    #[error("upload transport error: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("storage rejected upload ({status}): {message}")]
    Provider { status: u16, message: String },
    #[error("invalid storage response: {0}")]
    InvalidResponse(String),
}

/// Remote resource class the storage service files an upload under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Image,
    Video,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Image => "image",
            ResourceType::Video => "video",
        }
    }
}

impl From<MediaKind> for ResourceType {
    fn from(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Image => ResourceType::Image,
            MediaKind::Video => ResourceType::Video,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOptions {
    pub folder: String,
    pub destination_key: String,
    pub resource_type: ResourceType,
    pub timeout: Duration,
    pub transformation: Option<String>,
}

/// Remote media storage that ingests a file by fetching it from a source URL.
#[async_trait]
pub trait MediaStorage: Send + Sync {
    async fn upload(
        &self,
        source_url: &str,
        options: &UploadOptions,
    ) -> Result<UploadedMedia, UploadError>;
}

/// HTTP client for a Cloudinary-style "upload from remote URL" API.
#[derive(Clone)]
pub struct StorageClient {
    http: Client,
    base_url: Url,
    cloud_name: String,
    api_key: String,
    api_secret: String,
}

impl fmt::Debug for StorageClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageClient")
            .field("base_url", &self.base_url)
            .field("cloud_name", &self.cloud_name)
            .finish_non_exhaustive()
    }
}

impl StorageClient {
    pub fn from_settings(settings: &StorageSettings) -> anyhow::Result<Self> {
        let base_url = Url::parse(&settings.base_url)?;
        let http = Client::builder()
            .user_agent("ad-media-pipeline/0.1")
            .build()?;
        Ok(Self {
            http,
            base_url,
            cloud_name: settings.cloud_name.clone(),
            api_key: settings.api_key.clone(),
            api_secret: settings.api_secret.clone(),
        })
    }

    /// Build the signed upload request. `timestamp` is unix seconds.
    pub fn build_upload_request(
        &self,
        source_url: &str,
        options: &UploadOptions,
        timestamp: i64,
    ) -> Result<reqwest::Request, UploadError> {
        let endpoint = self
            .base_url
            .join(&format!(
                "v1_1/{}/{}/upload",
                self.cloud_name,
                options.resource_type.as_str()
            ))
            .map_err(|e| UploadError::InvalidResponse(format!("invalid storage base URL: {e}")))?;

        let mut signed = BTreeMap::new();
        signed.insert("folder", options.folder.clone());
        signed.insert("public_id", options.destination_key.clone());
        signed.insert("timestamp", timestamp.to_string());
        if let Some(t) = options.transformation.as_deref().filter(|t| !t.is_empty()) {
            signed.insert("transformation", t.to_string());
        }
        let signature = sign_params(&signed, &self.api_secret);

        let mut form: Vec<(&str, String)> = signed.into_iter().collect();
        form.push(("file", source_url.to_string()));
        form.push(("api_key", self.api_key.clone()));
        form.push(("signature", signature));
        form.push(("signature_algorithm", "sha256".to_string()));

        self.http
            .post(endpoint)
            .timeout(options.timeout)
            .form(&form)
            .build()
            .map_err(UploadError::Transport)
    }
}

/// Hex SHA-256 over `k1=v1&k2=v2...` (keys sorted) followed by the secret.
pub fn sign_params(params: &BTreeMap<&str, String>, secret: &str) -> String {
    let joined = params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

#[async_trait]
impl MediaStorage for StorageClient {
    async fn upload(
        &self,
        source_url: &str,
        options: &UploadOptions,
    ) -> Result<UploadedMedia, UploadError> {
        let request = self.build_upload_request(source_url, options, Utc::now().timestamp())?;
        info!(
            url = %request.url(),
            public_id = %options.destination_key,
            timeout_secs = options.timeout.as_secs(),
            "uploading media"
        );

        let res = self.http.execute(request).await.map_err(|e| {
            if e.is_timeout() {
                UploadError::Timeout(options.timeout)
            } else {
                UploadError::Transport(e)
            }
        })?;

        let status = res.status();
        let body = res.text().await.map_err(|e| {
            if e.is_timeout() {
                UploadError::Timeout(options.timeout)
            } else {
                UploadError::Transport(e)
            }
        })?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            warn!(status = status.as_u16(), %message, "storage rejected upload");
            return Err(UploadError::Provider {
                status: status.as_u16(),
                message,
            });
        }

        let payload: UploadResponse = serde_json::from_str(&body)
            .map_err(|e| UploadError::InvalidResponse(e.to_string()))?;
        payload
            .into_uploaded()
            .ok_or_else(|| UploadError::InvalidResponse("response has no public URL".into()))
    }
}

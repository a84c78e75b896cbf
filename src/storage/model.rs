use serde::Deserialize;

use crate::model::UploadedMedia;

/// Successful upload response body.
#[derive(Deserialize, Debug)]
pub struct UploadResponse {
    pub secure_url: Option<String>,
    pub url: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration: Option<f64>,
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub resource_type: String,
}

impl UploadResponse {
    /// `None` when the provider returned no usable public URL.
    pub fn into_uploaded(self) -> Option<UploadedMedia> {
        let public_url = self.secure_url.or(self.url).filter(|u| !u.is_empty())?;
        Some(UploadedMedia {
            public_url,
            width: self.width,
            height: self.height,
            duration_seconds: self.duration,
            format: self.format,
            resource_type: self.resource_type,
        })
    }
}

#[derive(Deserialize, Debug)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Deserialize, Debug)]
pub struct ErrorBody {
    pub message: String,
}

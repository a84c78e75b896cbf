//! Candidate media URL discovery over raw ad JSON.
//!
//! Upstream ads arrive in several loosely related shapes. Each shape is handled
//! by one [`Rule`]; rules run in priority order over the same parsed tree and
//! only ever add candidates, so a missing or oddly typed field in one shape
//! never prevents the others from contributing.

use std::collections::HashSet;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("content is not a JSON object")]
    NotAnObject,
}

/// Ordered, deduplicated candidates for one ad.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub image_urls: Vec<String>,
    pub video_urls: Vec<String>,
    /// Non-fatal problems seen while reading the content.
    pub diagnostics: Vec<String>,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        self.image_urls.is_empty() && self.video_urls.is_empty()
    }
}

const IMAGE_FIELDS: &[&str] = &[
    "original_image_url",
    "resized_image_url",
    "watermarked_resized_image_url",
    "url",
    "src",
];

const VIDEO_FIELDS: &[&str] = &[
    "video_hd_url",
    "video_sd_url",
    "watermarked_video_hd_url",
    "watermarked_video_sd_url",
    "url",
    "src",
];

// Cards carry landing-page links in generic fields, so only media-specific names count.
const CARD_IMAGE_FIELDS: &[&str] = &[
    "original_image_url",
    "resized_image_url",
    "watermarked_resized_image_url",
    "video_preview_image_url",
];

const CARD_VIDEO_FIELDS: &[&str] = &[
    "video_hd_url",
    "video_sd_url",
    "watermarked_video_hd_url",
    "watermarked_video_sd_url",
];

const CREATIVE_PHOTO_POINTERS: &[&str] = &[
    "/creative/object_story_spec/photo_data/url",
    "/creative/object_story_spec/photo_data/image_url",
    "/creative/object_story_spec/link_data/picture",
    "/creative/object_story_spec/video_data/image_url",
    "/object_story_spec/photo_data/url",
    "/object_story_spec/photo_data/image_url",
    "/object_story_spec/link_data/picture",
    "/object_story_spec/video_data/image_url",
    "/creative/image_url",
    "/creative/thumbnail_url",
];

#[derive(Default)]
struct UrlList {
    urls: Vec<String>,
    seen: HashSet<String>,
}

impl UrlList {
    fn push(&mut self, raw: &str) {
        let url = raw.trim();
        if url.is_empty() || self.seen.contains(url) {
            return;
        }
        self.seen.insert(url.to_string());
        self.urls.push(url.to_string());
    }
}

#[derive(Default)]
struct Candidates {
    images: UrlList,
    videos: UrlList,
}

type Rule = fn(&Value, &mut Candidates);

/// Extraction rules in priority order.
const RULES: &[(&str, Rule)] = &[
    ("direct_fields", direct_fields),
    ("media_arrays", media_arrays),
    ("cards", cards),
    ("snapshot", snapshot),
    ("creative", creative_photo),
];

/// Parse raw ad content. A JSON string holding JSON is unwrapped once.
pub fn parse_content(raw: &str) -> Result<Value, ExtractionError> {
    let value: Value = serde_json::from_str(raw)?;
    let value = match value {
        Value::String(inner) => serde_json::from_str(&inner)?,
        other => other,
    };
    if !value.is_object() {
        return Err(ExtractionError::NotAnObject);
    }
    Ok(value)
}

/// Extract candidates from raw content. Never fails; problems end up in
/// [`Extraction::diagnostics`] with empty URL lists.
pub fn extract(raw: &str) -> Extraction {
    match parse_content(raw) {
        Ok(value) => extract_value(&value),
        Err(err) => {
            debug!(%err, "ad content could not be parsed");
            Extraction {
                diagnostics: vec![err.to_string()],
                ..Default::default()
            }
        }
    }
}

pub fn extract_value(value: &Value) -> Extraction {
    let mut found = Candidates::default();
    for (name, rule) in RULES {
        let before = (found.images.urls.len(), found.videos.urls.len());
        rule(value, &mut found);
        let added = (
            found.images.urls.len() - before.0,
            found.videos.urls.len() - before.1,
        );
        if added != (0, 0) {
            debug!(rule = name, images = added.0, videos = added.1, "extraction rule matched");
        }
    }
    Extraction {
        image_urls: found.images.urls,
        video_urls: found.videos.urls,
        diagnostics: Vec::new(),
    }
}

fn is_absolute_http_url(s: &str) -> bool {
    match reqwest::Url::parse(s.trim()) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.has_host(),
        Err(_) => false,
    }
}

fn first_field<'a>(item: &'a Value, fields: &[&str]) -> Option<&'a str> {
    fields
        .iter()
        .filter_map(|f| item.get(*f).and_then(Value::as_str))
        .find(|s| !s.trim().is_empty())
}

fn direct_fields(value: &Value, out: &mut Candidates) {
    for key in ["imageUrl", "image_url"] {
        if let Some(url) = value.get(key).and_then(Value::as_str) {
            if is_absolute_http_url(url) {
                out.images.push(url);
            }
        }
    }
    for key in ["videoUrl", "video_url"] {
        if let Some(url) = value.get(key).and_then(Value::as_str) {
            if is_absolute_http_url(url) {
                out.videos.push(url);
            }
        }
    }
}

fn media_arrays(value: &Value, out: &mut Candidates) {
    if let Some(items) = value.get("images").and_then(Value::as_array) {
        for item in items {
            match item {
                Value::String(url) => out.images.push(url),
                _ => {
                    if let Some(url) = first_field(item, IMAGE_FIELDS) {
                        out.images.push(url);
                    }
                }
            }
        }
    }
    if let Some(items) = value.get("videos").and_then(Value::as_array) {
        for item in items {
            match item {
                Value::String(url) => out.videos.push(url),
                _ => {
                    if let Some(url) = first_field(item, VIDEO_FIELDS) {
                        out.videos.push(url);
                    }
                    if let Some(preview) = item.get("video_preview_image_url").and_then(Value::as_str)
                    {
                        out.images.push(preview);
                    }
                }
            }
        }
    }
}

fn cards(value: &Value, out: &mut Candidates) {
    let Some(cards) = value.get("cards").and_then(Value::as_array) else {
        return;
    };
    for card in cards {
        if let Some(url) = first_field(card, CARD_IMAGE_FIELDS) {
            out.images.push(url);
        }
        if let Some(url) = first_field(card, CARD_VIDEO_FIELDS) {
            out.videos.push(url);
        }
    }
}

fn snapshot(value: &Value, out: &mut Candidates) {
    if let Some(inner) = value.get("snapshot").filter(|v| v.is_object()) {
        media_arrays(inner, out);
        cards(inner, out);
    }
}

fn creative_photo(value: &Value, out: &mut Candidates) {
    let photo = CREATIVE_PHOTO_POINTERS
        .iter()
        .filter_map(|p| value.pointer(p).and_then(Value::as_str))
        .find(|s| !s.trim().is_empty());
    if let Some(url) = photo {
        out.images.push(url);
    }
}

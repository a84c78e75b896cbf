//! Media acquisition pipeline for scraped ads: discover candidate image/video
//! URLs in raw ad JSON, probe them, upload the first usable one of each kind to
//! remote storage, and track per-ad status with bounded retries.

pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod model;
pub mod pipeline;
pub mod probe;
pub mod report;
pub mod retry;
pub mod scheduler;
pub mod storage;
pub mod worker;

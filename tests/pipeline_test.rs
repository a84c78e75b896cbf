mod common;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::json;

use ad_media_pipeline::config::{NoMediaPolicy, SelectionOrder};
use ad_media_pipeline::db::{self, AdMediaUpdate};
use ad_media_pipeline::error::PipelineError;
use ad_media_pipeline::model::{BatchSummary, MediaStatus};
use ad_media_pipeline::pipeline::Pipeline;
use ad_media_pipeline::probe::Prober;
use ad_media_pipeline::retry::RetryPolicy;
use ad_media_pipeline::storage::uploader::UploadSettings;
use ad_media_pipeline::storage::MediaUploader;
use ad_media_pipeline::worker::{BatchWorker, WorkerSettings};

use common::{
    example_config, harness, harness_with, setup_pool, HarnessOptions, RecordingProber,
    RecordingStorage,
};

async fn insert(pool: &db::Pool, ad_id: &str, content: serde_json::Value, age_minutes: i64) {
    db::insert_ad(
        pool,
        ad_id,
        &content.to_string(),
        Utc::now() - Duration::minutes(age_minutes),
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn reachable_candidates_end_in_success() {
    let h = harness(
        RecordingProber::reachable(&["https://x/a.jpg", "https://x/v.mp4"]),
        RecordingStorage::default(),
    )
    .await;
    insert(
        &h.pool,
        "ad-1",
        json!({
            "images": [{"original_image_url": "https://x/a.jpg"}],
            "videos": [{"video_hd_url": "https://x/v.mp4"}]
        }),
        1,
    )
    .await;

    let summary = h.worker.trigger_batch(10).await.unwrap();
    assert_eq!(
        summary,
        BatchSummary {
            processed: 1,
            succeeded: 1,
            failed: 0
        }
    );

    let rec = db::get_ad(&h.pool, "ad-1").await.unwrap().unwrap();
    assert_eq!(rec.status, MediaStatus::Success);
    assert_eq!(rec.retry_count, 0);
    assert!(rec.last_error.is_none());
    assert!(rec.downloaded_at.is_some());
    let image = rec.local_image_url.unwrap();
    let video = rec.local_video_url.unwrap();
    assert!(image.starts_with("https://media.test/ads/images/ad-1_image_"));
    assert!(video.starts_with("https://media.test/ads/videos/ad-1_video_"));
}

#[tokio::test]
async fn first_successful_upload_wins_per_kind() {
    let h = harness(
        RecordingProber::reachable(&["https://x/b.jpg", "https://x/c.jpg", "https://x/d.jpg"]),
        RecordingStorage::failing(&["https://x/b.jpg"]),
    )
    .await;
    insert(
        &h.pool,
        "ad-1",
        json!({"images": [
            "https://x/a.jpg",
            "https://x/b.jpg",
            "https://x/c.jpg",
            "https://x/d.jpg"
        ]}),
        1,
    )
    .await;

    h.worker.trigger_batch(10).await.unwrap();

    assert_eq!(
        h.prober.calls().await,
        vec!["https://x/a.jpg", "https://x/b.jpg", "https://x/c.jpg"]
    );
    let uploads: Vec<String> = h.storage.calls().await.into_iter().map(|c| c.0).collect();
    assert_eq!(uploads, vec!["https://x/b.jpg", "https://x/c.jpg"]);

    let rec = db::get_ad(&h.pool, "ad-1").await.unwrap().unwrap();
    assert_eq!(rec.status, MediaStatus::Success);
    assert!(rec.local_video_url.is_none());
}

#[tokio::test]
async fn unreachable_candidates_count_one_retry() {
    let h = harness(RecordingProber::default(), RecordingStorage::default()).await;
    insert(&h.pool, "ad-1", json!({"images": ["https://x/dead.jpg"]}), 1).await;

    let summary = h.worker.trigger_batch(10).await.unwrap();
    assert_eq!(summary.failed, 1);

    let rec = db::get_ad(&h.pool, "ad-1").await.unwrap().unwrap();
    assert_eq!(rec.status, MediaStatus::Pending);
    assert_eq!(rec.retry_count, 1);
    assert!(rec
        .last_error
        .as_deref()
        .unwrap()
        .contains("not reachable: https://x/dead.jpg"));
    assert!(h.storage.calls().await.is_empty());
}

#[tokio::test]
async fn exhausted_record_becomes_failed_and_ineligible() {
    let h = harness(RecordingProber::default(), RecordingStorage::default()).await;
    insert(&h.pool, "ad-1", json!({"images": ["https://x/dead.jpg"]}), 1).await;

    for expected in 1..=3 {
        let summary = h.worker.trigger_batch(10).await.unwrap();
        assert_eq!(summary.processed, 1);
        let rec = db::get_ad(&h.pool, "ad-1").await.unwrap().unwrap();
        assert_eq!(rec.retry_count, expected);
        let status = if expected < 3 {
            MediaStatus::Pending
        } else {
            MediaStatus::Failed
        };
        assert_eq!(rec.status, status);
    }

    let eligible = db::list_eligible(&h.pool, SelectionOrder::OldestCreated, 3, 10)
        .await
        .unwrap();
    assert!(eligible.is_empty());
    let summary = h.worker.trigger_batch(10).await.unwrap();
    assert_eq!(summary, BatchSummary::default());
}

#[tokio::test]
async fn empty_selection_is_a_no_op() {
    let h = harness(RecordingProber::default(), RecordingStorage::default()).await;
    assert_eq!(h.worker.trigger_batch(10).await.unwrap(), BatchSummary::default());

    insert(&h.pool, "done", json!({"images": ["https://x/a.jpg"]}), 1).await;
    db::update_ad(&h.pool, "done", &AdMediaUpdate::status(MediaStatus::Success))
        .await
        .unwrap();
    assert_eq!(h.worker.trigger_batch(10).await.unwrap(), BatchSummary::default());
    assert!(h.prober.calls().await.is_empty());
}

#[tokio::test]
async fn batch_continues_past_failed_records_in_creation_order() {
    let h = harness(
        RecordingProber::reachable(&["https://x/old.jpg", "https://x/new.jpg"]),
        RecordingStorage::default(),
    )
    .await;
    insert(&h.pool, "new", json!({"images": ["https://x/new.jpg"]}), 1).await;
    insert(&h.pool, "old", json!({"images": ["https://x/old.jpg"]}), 30).await;
    insert(&h.pool, "mid", json!({"images": ["https://x/dead.jpg"]}), 10).await;

    let summary = h.worker.trigger_batch(10).await.unwrap();
    assert_eq!(
        summary,
        BatchSummary {
            processed: 3,
            succeeded: 2,
            failed: 1
        }
    );
    assert_eq!(
        h.prober.calls().await,
        vec!["https://x/old.jpg", "https://x/dead.jpg", "https://x/new.jpg"]
    );
}

#[tokio::test]
async fn batch_size_bounds_selection() {
    let h = harness(
        RecordingProber::reachable(&["https://x/a.jpg"]),
        RecordingStorage::default(),
    )
    .await;
    for (i, id) in ["a", "b", "c"].iter().enumerate() {
        insert(&h.pool, id, json!({"images": ["https://x/a.jpg"]}), 10 - i as i64).await;
    }
    let summary = h.worker.trigger_batch(2).await.unwrap();
    assert_eq!(summary.processed, 2);
    let c = db::get_ad(&h.pool, "c").await.unwrap().unwrap();
    assert_eq!(c.status, MediaStatus::Pending);
}

#[tokio::test]
async fn kind_without_candidates_is_skipped() {
    let h = harness(
        RecordingProber::reachable(&["https://x/v.mp4"]),
        RecordingStorage::default(),
    )
    .await;
    insert(&h.pool, "ad-1", json!({"cards": [{"video_sd_url": "https://x/v.mp4"}]}), 1).await;

    h.worker.trigger_batch(10).await.unwrap();
    let rec = db::get_ad(&h.pool, "ad-1").await.unwrap().unwrap();
    assert_eq!(rec.status, MediaStatus::Success);
    assert!(rec.local_image_url.is_none());
    assert!(rec.local_video_url.is_some());
}

#[tokio::test]
async fn one_kind_failing_does_not_fail_the_ad() {
    let h = harness(
        RecordingProber::reachable(&["https://x/a.jpg"]),
        RecordingStorage::default(),
    )
    .await;
    insert(
        &h.pool,
        "ad-1",
        json!({"images": ["https://x/a.jpg"], "videos": ["https://x/dead.mp4"]}),
        1,
    )
    .await;

    h.worker.trigger_batch(10).await.unwrap();
    let rec = db::get_ad(&h.pool, "ad-1").await.unwrap().unwrap();
    assert_eq!(rec.status, MediaStatus::Success);
    assert!(rec.local_image_url.is_some());
    assert!(rec.local_video_url.is_none());
}

#[tokio::test]
async fn malformed_content_follows_no_media_policy() {
    let h = harness(RecordingProber::default(), RecordingStorage::default()).await;
    db::insert_ad(&h.pool, "ad-1", "{broken", Utc::now()).await.unwrap();
    h.worker.trigger_batch(10).await.unwrap();
    let rec = db::get_ad(&h.pool, "ad-1").await.unwrap().unwrap();
    assert_eq!(rec.status, MediaStatus::Pending);
    assert_eq!(rec.retry_count, 1);
    let err = rec.last_error.unwrap();
    assert!(err.contains("no media candidates found"));
    assert!(err.contains("invalid JSON"));

    let lenient = harness_with(
        RecordingProber::default(),
        RecordingStorage::default(),
        HarnessOptions {
            no_media_policy: NoMediaPolicy::Succeed,
            ..Default::default()
        },
    )
    .await;
    insert(&lenient.pool, "ad-2", json!({"title": "text only"}), 1).await;
    lenient.worker.trigger_batch(10).await.unwrap();
    let rec = db::get_ad(&lenient.pool, "ad-2").await.unwrap().unwrap();
    assert_eq!(rec.status, MediaStatus::Success);
    assert!(rec.local_image_url.is_none() && rec.local_video_url.is_none());
}

#[tokio::test]
async fn success_after_failures_resets_retry_state() {
    let h = harness(
        RecordingProber::reachable(&["https://x/a.jpg"]),
        RecordingStorage::default(),
    )
    .await;
    insert(&h.pool, "ad-1", json!({"images": ["https://x/a.jpg"]}), 1).await;
    db::update_ad(
        &h.pool,
        "ad-1",
        &AdMediaUpdate {
            status: Some(MediaStatus::Failed),
            retry_count: Some(2),
            last_error: Some(Some("earlier failure".into())),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    h.worker.trigger_batch(10).await.unwrap();
    let rec = db::get_ad(&h.pool, "ad-1").await.unwrap().unwrap();
    assert_eq!(rec.status, MediaStatus::Success);
    assert_eq!(rec.retry_count, 0);
    assert!(rec.last_error.is_none());
}

#[tokio::test]
async fn video_retry_uses_retry_upload_options() {
    let h = harness(
        RecordingProber::reachable(&["https://x/v.mp4"]),
        RecordingStorage::default(),
    )
    .await;
    insert(&h.pool, "ad-1", json!({"videos": ["https://x/v.mp4"]}), 1).await;
    db::update_ad(
        &h.pool,
        "ad-1",
        &AdMediaUpdate {
            retry_count: Some(1),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    h.worker.trigger_batch(10).await.unwrap();
    let calls = h.storage.calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1.timeout, std::time::Duration::from_secs(180));
    assert_eq!(calls[0].1.transformation.as_deref(), Some("q_auto:low,f_mp4"));
}

#[tokio::test]
async fn manual_trigger_reprocesses_successful_record() {
    let h = harness(
        RecordingProber::reachable(&["https://x/a.jpg"]),
        RecordingStorage::default(),
    )
    .await;
    insert(&h.pool, "ad-1", json!({"images": ["https://x/a.jpg"]}), 1).await;
    db::update_ad(
        &h.pool,
        "ad-1",
        &AdMediaUpdate {
            status: Some(MediaStatus::Success),
            local_image_url: Some(Some("https://old.example/a.jpg".into())),
            local_video_url: Some(Some("https://old.example/v.mp4".into())),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let result = h.worker.trigger_single("ad-1").await.unwrap();
    assert!(result.success);
    assert!(result.error.is_none());
    let image = result.local_image_url.unwrap();
    assert!(image.starts_with("https://media.test/ads/images/ad-1_image_"));
    // No video candidate this time, so the stored video URL is left alone.
    assert_eq!(
        result.local_video_url.as_deref(),
        Some("https://old.example/v.mp4")
    );
    assert_eq!(h.storage.calls().await.len(), 1);
}

#[tokio::test]
async fn manual_failure_past_scheduled_budget_is_terminal() {
    let h = harness(RecordingProber::default(), RecordingStorage::default()).await;
    insert(&h.pool, "ad-1", json!({"images": ["https://x/dead.jpg"]}), 1).await;
    db::update_ad(
        &h.pool,
        "ad-1",
        &AdMediaUpdate {
            status: Some(MediaStatus::Failed),
            retry_count: Some(3),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let result = h.worker.trigger_single("ad-1").await.unwrap();
    assert!(!result.success);
    assert!(result.error.unwrap().contains("not reachable"));
    let rec = db::get_ad(&h.pool, "ad-1").await.unwrap().unwrap();
    assert_eq!(rec.retry_count, 4);
    assert_eq!(rec.status, MediaStatus::Failed);

    let eligible = db::list_eligible(&h.pool, SelectionOrder::OldestCreated, 3, 10)
        .await
        .unwrap();
    assert!(eligible.is_empty());
    assert_eq!(h.worker.trigger_batch(10).await.unwrap(), BatchSummary::default());
}

#[tokio::test]
async fn repeated_manual_failures_stop_at_manual_budget() {
    let h = harness(RecordingProber::default(), RecordingStorage::default()).await;
    insert(&h.pool, "ad-1", json!({"images": ["https://x/dead.jpg"]}), 1).await;

    for _ in 0..7 {
        let result = h.worker.trigger_single("ad-1").await.unwrap();
        assert!(!result.success);
    }
    let rec = db::get_ad(&h.pool, "ad-1").await.unwrap().unwrap();
    assert_eq!(rec.retry_count, 5);
    assert_eq!(rec.status, MediaStatus::Failed);
    // Every run still attempted the candidate.
    assert_eq!(h.prober.calls().await.len(), 7);
}

#[tokio::test]
async fn manual_failure_within_scheduled_budget_stays_pending() {
    let h = harness(RecordingProber::default(), RecordingStorage::default()).await;
    insert(&h.pool, "ad-1", json!({"images": ["https://x/dead.jpg"]}), 1).await;

    h.worker.trigger_single("ad-1").await.unwrap();
    let rec = db::get_ad(&h.pool, "ad-1").await.unwrap().unwrap();
    assert_eq!(rec.retry_count, 1);
    assert_eq!(rec.status, MediaStatus::Pending);
}

#[tokio::test]
async fn manual_trigger_on_unknown_ad_is_not_found() {
    let h = harness(RecordingProber::default(), RecordingStorage::default()).await;
    let err = h.worker.trigger_single("ghost").await.unwrap_err();
    assert!(matches!(err, PipelineError::RecordNotFound(id) if id == "ghost"));
}

#[tokio::test]
async fn fewest_retries_order_prioritises_fresh_records() {
    let h = harness_with(
        RecordingProber::default(),
        RecordingStorage::default(),
        HarnessOptions {
            order: SelectionOrder::FewestRetries,
            ..Default::default()
        },
    )
    .await;
    insert(&h.pool, "retried", json!({"images": ["https://x/r.jpg"]}), 30).await;
    insert(&h.pool, "fresh", json!({"images": ["https://x/f.jpg"]}), 1).await;
    db::update_ad(
        &h.pool,
        "retried",
        &AdMediaUpdate {
            retry_count: Some(1),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    h.worker.trigger_batch(10).await.unwrap();
    assert_eq!(
        h.prober.calls().await,
        vec!["https://x/f.jpg", "https://x/r.jpg"]
    );
}

/// Deletes `ad_id` while its candidate is being checked, as an external
/// cleanup would.
struct DeletingProber {
    pool: db::Pool,
    ad_id: &'static str,
    url: &'static str,
}

#[async_trait]
impl Prober for DeletingProber {
    async fn is_accessible(&self, url: &str) -> bool {
        if url == self.url {
            sqlx::query("DELETE FROM ad_media WHERE ad_id = ?")
                .bind(self.ad_id)
                .execute(&self.pool)
                .await
                .unwrap();
            return false;
        }
        true
    }
}

#[tokio::test]
async fn record_removed_mid_batch_is_skipped() {
    let pool = setup_pool().await;
    insert(&pool, "gone", json!({"images": ["https://x/gone.jpg"]}), 10).await;
    insert(&pool, "kept", json!({"images": ["https://x/kept.jpg"]}), 1).await;

    let cfg = example_config();
    let prober = Arc::new(DeletingProber {
        pool: pool.clone(),
        ad_id: "gone",
        url: "https://x/gone.jpg",
    });
    let storage = Arc::new(RecordingStorage::default());
    let uploader = MediaUploader::new(storage.clone(), UploadSettings::from(&cfg.storage));
    let pipeline = Pipeline::new(prober, uploader, NoMediaPolicy::Fail);
    let settings = WorkerSettings {
        order: SelectionOrder::OldestCreated,
        scheduled: RetryPolicy::fixed(std::time::Duration::ZERO, 3),
        manual: RetryPolicy::fixed(std::time::Duration::ZERO, 5),
    };
    let worker = BatchWorker::new(pool.clone(), pipeline, settings);

    let summary = worker.trigger_batch(10).await.unwrap();
    assert_eq!(
        summary,
        BatchSummary {
            processed: 1,
            succeeded: 1,
            failed: 0
        }
    );
    assert!(db::get_ad(&pool, "gone").await.unwrap().is_none());
    let kept = db::get_ad(&pool, "kept").await.unwrap().unwrap();
    assert_eq!(kept.status, MediaStatus::Success);
}

//! Stage orchestration against the in-memory store and queue.

mod fixtures;
mod helpers;

use std::fs::File;
use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use fixtures::{pet_portrait, underexposed};
use helpers::{DigitizeMode, Fault, Harness};
use pet_patch_pipeline::db::{PipelineStore, StoreHandle};
use pet_patch_pipeline::jobs::producers::{enqueue_render, RenderRequest};
use pet_patch_pipeline::jobs::retry::RetryPolicy;
use pet_patch_pipeline::jobs::runner::process_next;
use pet_patch_pipeline::models::intake::PaidOrderRequest;
use pet_patch_pipeline::models::job::{JobKey, JobStatus, Stage};
use pet_patch_pipeline::models::order::OrderStatus;
use pet_patch_pipeline::models::payload::StagePayload;
use pet_patch_pipeline::models::render_config::PIPELINE_VERSION;
use pet_patch_pipeline::routes::orders::{order_jobs, order_paid};
use pet_patch_pipeline::services::queue::{EnqueueOutcome, JobsHandle, StageQueue};

fn render_request(asset_path: &str, hash: &str) -> RenderRequest {
    RenderRequest {
        order_id: "o1".into(),
        customization_id: "c1".into(),
        canonical_asset_path: asset_path.into(),
        canonical_hash: hash.into(),
        correlation_id: None,
    }
}

async fn job(h: &Harness, stage: Stage) -> pet_patch_pipeline::models::job::JobExecution {
    h.store
        .get_job_execution(&JobKey::new(stage, "o1", "c1"))
        .await
        .unwrap()
        .unwrap_or_else(|| panic!("no {stage} record"))
}

#[tokio::test]
async fn test_reenqueue_keeps_one_job_record() {
    let h = Harness::new(DigitizeMode::Valid);
    h.seed_order("o1", "c1").await;
    let (path, hash) = h.store_canonical(&pet_portrait(120));

    let first = enqueue_render(&h.state, render_request(&path, &hash)).await.unwrap();
    let second = enqueue_render(&h.state, render_request(&path, &hash)).await.unwrap();
    assert_eq!(first.outcome, Some(EnqueueOutcome::Queued));
    assert_eq!(second.outcome, Some(EnqueueOutcome::Duplicate));

    // Once the queue forgets the id a fresh enqueue updates the same record.
    h.queue.forget("o1:c1:render").await;
    let third = enqueue_render(&h.state, render_request(&path, &hash)).await.unwrap();
    assert_eq!(third.outcome, Some(EnqueueOutcome::Queued));

    let jobs = h.store.list_job_executions("o1").await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Queued);
    assert_eq!(jobs[0].correlation_id, third.correlation_id);
}

#[tokio::test]
async fn test_concurrent_enqueue_queues_once() {
    let h = Harness::new(DigitizeMode::Valid);
    h.seed_order("o1", "c1").await;
    let (path, hash) = h.store_canonical(&pet_portrait(120));

    let tasks = (0..8).map(|_| enqueue_render(&h.state, render_request(&path, &hash)));
    let results = futures::future::join_all(tasks).await;

    let queued = results
        .into_iter()
        .map(|r| tokio_test::assert_ok!(r))
        .filter(|e| e.outcome == Some(EnqueueOutcome::Queued))
        .count();
    assert_eq!(queued, 1);
    assert_eq!(h.queue.pending(Stage::Render).await.len(), 1);
    assert_eq!(h.store.list_job_executions("o1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_render_pass_enqueues_digitize_with_same_correlation_id() {
    let h = Harness::new(DigitizeMode::Valid);
    h.seed_order("o1", "c1").await;
    let (path, hash) = h.store_canonical(&pet_portrait(120));
    let enqueued = enqueue_render(&h.state, render_request(&path, &hash)).await.unwrap();

    assert!(process_next(&h.state, Stage::Render).await.unwrap());

    assert_eq!(h.store.get_order_status("o1").await.unwrap(), OrderStatus::Paid);
    let render = job(&h, Stage::Render).await;
    assert_eq!(render.status, JobStatus::Succeeded);
    assert_eq!(render.attempts, 1);

    let pending = h.queue.pending(Stage::Digitize).await;
    assert_eq!(pending.len(), 1);
    let StagePayload::Digitize(digitize) = &pending[0].payload else {
        panic!("expected a digitize payload");
    };
    assert_eq!(digitize.correlation_id, enqueued.correlation_id);
    assert_eq!(digitize.canonical_hash, hash);
    assert!(std::path::Path::new(&digitize.render_preview_path).exists());
    assert!(std::path::Path::new(&digitize.region_manifest_path).exists());

    let customization = h.store.customization("c1").await.unwrap();
    let recorded = customization.render.expect("render recorded");
    assert!(recorded.quality.passed());
    assert_eq!(recorded.palette.len(), 8);
    assert_eq!(recorded.render_config_hash, h.state.render_config.config_hash().unwrap());
    assert_eq!(recorded.pipeline_version, PIPELINE_VERSION);
}

#[tokio::test]
async fn test_render_quality_failure_needs_review() {
    let h = Harness::new(DigitizeMode::Valid);
    h.seed_order("o1", "c1").await;
    let (path, hash) = h.store_canonical(&underexposed(100));
    enqueue_render(&h.state, render_request(&path, &hash)).await.unwrap();

    assert!(process_next(&h.state, Stage::Render).await.unwrap());

    assert_eq!(h.store.get_order_status("o1").await.unwrap(), OrderStatus::NeedsReview);
    assert_eq!(job(&h, Stage::Render).await.status, JobStatus::Succeeded);
    assert!(h.queue.pending(Stage::Digitize).await.is_empty());
    let quality = h.store.customization("c1").await.unwrap().render.unwrap().quality;
    assert!(quality.reasons.contains(&"too_dark".to_string()));
}

#[tokio::test]
async fn test_render_error_fails_job_and_needs_review() {
    let h = Harness::new(DigitizeMode::Valid);
    h.seed_order("o1", "c1").await;
    let missing = h.dir.path().join("missing.png").display().to_string();
    enqueue_render(&h.state, render_request(&missing, "deadbeef")).await.unwrap();

    assert!(process_next(&h.state, Stage::Render).await.unwrap());

    let render = job(&h, Stage::Render).await;
    assert_eq!(render.status, JobStatus::Failed);
    assert!(render.attempts >= 1);
    assert!(!render.error_message().unwrap_or_default().is_empty());
    assert_eq!(h.store.get_order_status("o1").await.unwrap(), OrderStatus::NeedsReview);
    assert!(h.queue.pending(Stage::Digitize).await.is_empty());
    // Scheduled again under the retry policy.
    assert_eq!(h.queue.depth(Stage::Render).await.unwrap(), 1);
}

#[tokio::test]
async fn test_retry_reenters_running_until_attempts_exhausted() {
    let h = Harness::with_retry(DigitizeMode::Valid, RetryPolicy::new(2, Duration::ZERO));
    h.seed_order("o1", "c1").await;
    let missing = h.dir.path().join("missing.png").display().to_string();
    enqueue_render(&h.state, render_request(&missing, "deadbeef")).await.unwrap();

    assert!(process_next(&h.state, Stage::Render).await.unwrap());
    assert_eq!(job(&h, Stage::Render).await.attempts, 1);

    assert!(process_next(&h.state, Stage::Render).await.unwrap());
    let render = job(&h, Stage::Render).await;
    assert_eq!(render.status, JobStatus::Failed);
    assert_eq!(render.attempts, 2);

    assert_eq!(h.queue.depth(Stage::Render).await.unwrap(), 0);
    assert_eq!(h.queue.in_flight().await, 0);
    assert!(!process_next(&h.state, Stage::Render).await.unwrap());
}

#[tokio::test]
async fn test_full_pipeline_produces_pack() {
    let h = Harness::new(DigitizeMode::Valid);
    h.seed_order("o1", "c1").await;
    let (path, hash) = h.store_canonical(&pet_portrait(120));
    let enqueued = enqueue_render(&h.state, render_request(&path, &hash)).await.unwrap();

    assert!(process_next(&h.state, Stage::Render).await.unwrap());
    assert!(process_next(&h.state, Stage::Digitize).await.unwrap());
    assert_eq!(h.store.get_order_status("o1").await.unwrap(), OrderStatus::AssetsGenerated);
    let customization = h.store.customization("c1").await.unwrap();
    assert!(customization.dst_path.unwrap().ends_with(&format!("{hash}-c1.dst")));

    assert!(process_next(&h.state, Stage::ProductionPack).await.unwrap());
    assert_eq!(h.store.get_order_status("o1").await.unwrap(), OrderStatus::AssetsGenerated);

    let jobs = h.store.list_job_executions("o1").await.unwrap();
    assert_eq!(jobs.len(), 3);
    assert!(jobs.iter().all(|j| j.status == JobStatus::Succeeded));
    assert!(jobs.iter().all(|j| j.correlation_id == enqueued.correlation_id));

    let packs = h.store.production_packs("o1").await;
    assert_eq!(packs.len(), 1);
    assert_eq!(packs[0].version, "1.0.0");
    assert!(packs[0].zip_path.ends_with("o1-c1-production-pack.zip"));

    let archive = zip::ZipArchive::new(File::open(&packs[0].zip_path).unwrap()).unwrap();
    let mut names: Vec<&str> = archive.file_names().collect();
    names.sort_unstable();
    assert_eq!(
        names,
        vec![
            "digitize-stitch-direction-map.json",
            "embroidery.dst",
            "patch-render.png",
            "regions.json",
            "render-stitch-direction-map.png",
            "stitch-preview.svg",
        ]
    );
}

#[tokio::test]
async fn test_invalid_digitize_needs_review() {
    let h = Harness::new(DigitizeMode::Invalid);
    h.seed_order("o1", "c1").await;
    let (path, hash) = h.store_canonical(&pet_portrait(120));
    enqueue_render(&h.state, render_request(&path, &hash)).await.unwrap();

    assert!(process_next(&h.state, Stage::Render).await.unwrap());
    assert!(process_next(&h.state, Stage::Digitize).await.unwrap());

    assert_eq!(h.store.get_order_status("o1").await.unwrap(), OrderStatus::NeedsReview);
    assert_eq!(job(&h, Stage::Digitize).await.status, JobStatus::Succeeded);
    assert!(h.queue.pending(Stage::ProductionPack).await.is_empty());
    assert!(h.store.customization("c1").await.unwrap().dst_path.is_none());
}

#[tokio::test]
async fn test_digitizer_crash_is_retried() {
    let h = Harness::new(DigitizeMode::Crash);
    h.seed_order("o1", "c1").await;
    let (path, hash) = h.store_canonical(&pet_portrait(120));
    enqueue_render(&h.state, render_request(&path, &hash)).await.unwrap();

    assert!(process_next(&h.state, Stage::Render).await.unwrap());
    assert!(process_next(&h.state, Stage::Digitize).await.unwrap());
    let digitize = job(&h, Stage::Digitize).await;
    assert_eq!(digitize.status, JobStatus::Failed);
    assert!(digitize.error_message().unwrap().contains("segfault"));
    assert_eq!(h.store.get_order_status("o1").await.unwrap(), OrderStatus::NeedsReview);

    assert!(process_next(&h.state, Stage::Digitize).await.unwrap());
    assert_eq!(job(&h, Stage::Digitize).await.attempts, 2);
    assert_eq!(h.digitizer.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_reenqueue_repairs_record_lost_after_push() {
    let h = Harness::new(DigitizeMode::Valid);
    h.seed_order("o1", "c1").await;
    let (path, hash) = h.store_canonical(&pet_portrait(120));

    h.faults.fail_next(Fault::Upsert, 1);
    assert!(enqueue_render(&h.state, render_request(&path, &hash)).await.is_err());
    assert_eq!(h.queue.pending(Stage::Render).await.len(), 1);
    assert!(h.store.list_job_executions("o1").await.unwrap().is_empty());

    let retry = enqueue_render(&h.state, render_request(&path, &hash)).await.unwrap();
    assert_eq!(retry.outcome, Some(EnqueueOutcome::Duplicate));
    assert_eq!(job(&h, Stage::Render).await.status, JobStatus::Queued);
}

#[tokio::test]
async fn test_worker_recreates_missing_record() {
    let h = Harness::new(DigitizeMode::Valid);
    h.seed_order("o1", "c1").await;
    let (path, hash) = h.store_canonical(&pet_portrait(120));

    h.faults.fail_next(Fault::Upsert, 1);
    assert!(enqueue_render(&h.state, render_request(&path, &hash)).await.is_err());

    assert!(process_next(&h.state, Stage::Render).await.unwrap());
    let render = job(&h, Stage::Render).await;
    assert_eq!(render.status, JobStatus::Succeeded);
    assert_eq!(render.attempts, 1);
}

#[tokio::test]
async fn test_unrecorded_success_is_not_acked() {
    let h = Harness::new(DigitizeMode::Valid);
    h.seed_order("o1", "c1").await;
    let (path, hash) = h.store_canonical(&pet_portrait(120));
    enqueue_render(&h.state, render_request(&path, &hash)).await.unwrap();

    h.faults.fail_next(Fault::MarkSucceeded, 1);
    assert!(process_next(&h.state, Stage::Render).await.unwrap());

    // The attempt counts as failed and the job stays scheduled.
    assert_eq!(job(&h, Stage::Render).await.status, JobStatus::Failed);
    assert_eq!(h.queue.in_flight().await, 0);
    assert_eq!(h.queue.depth(Stage::Render).await.unwrap(), 1);

    assert!(process_next(&h.state, Stage::Render).await.unwrap());
    let render = job(&h, Stage::Render).await;
    assert_eq!(render.status, JobStatus::Succeeded);
    assert_eq!(render.attempts, 2);
    assert_eq!(h.queue.depth(Stage::Render).await.unwrap(), 0);
    assert_eq!(h.queue.pending(Stage::Digitize).await.len(), 1);
}

#[tokio::test]
async fn test_unrecorded_failure_is_scheduled_again() {
    let h = Harness::with_retry(DigitizeMode::Valid, RetryPolicy::new(1, Duration::ZERO));
    h.seed_order("o1", "c1").await;
    let missing = h.dir.path().join("missing.png").display().to_string();
    enqueue_render(&h.state, render_request(&missing, "deadbeef")).await.unwrap();

    // Out of attempts, but the failure never reached the store.
    h.faults.fail_next(Fault::MarkFailed, 1);
    assert!(process_next(&h.state, Stage::Render).await.is_err());
    assert_eq!(job(&h, Stage::Render).await.status, JobStatus::Running);
    assert_eq!(h.queue.in_flight().await, 0);
    assert_eq!(h.queue.depth(Stage::Render).await.unwrap(), 1);

    assert!(process_next(&h.state, Stage::Render).await.unwrap());
    assert_eq!(job(&h, Stage::Render).await.status, JobStatus::Failed);
    assert_eq!(h.queue.depth(Stage::Render).await.unwrap(), 0);
}

#[tokio::test]
async fn test_redelivery_after_success_is_dropped() {
    let h = Harness::new(DigitizeMode::Valid);
    h.seed_order("o1", "c1").await;
    let (path, hash) = h.store_canonical(&pet_portrait(120));
    enqueue_render(&h.state, render_request(&path, &hash)).await.unwrap();
    let delivered = h.queue.pending(Stage::Render).await.remove(0);

    assert!(process_next(&h.state, Stage::Render).await.unwrap());
    assert!(process_next(&h.state, Stage::Digitize).await.unwrap());
    assert_eq!(h.digitizer.calls.load(Ordering::SeqCst), 1);

    // At-least-once delivery: the render job arrives again after the
    // pipeline has moved on.
    let digitize_job = h
        .store
        .get_job_execution(&JobKey::new(Stage::Digitize, "o1", "c1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(digitize_job.status, JobStatus::Succeeded);
    h.queue.forget(&delivered.job_id).await;
    assert_eq!(h.queue.push(&delivered).await.unwrap(), EnqueueOutcome::Queued);

    assert!(process_next(&h.state, Stage::Render).await.unwrap());
    let render = job(&h, Stage::Render).await;
    assert_eq!(render.status, JobStatus::Succeeded);
    assert_eq!(render.attempts, 1);
    assert_eq!(h.queue.in_flight().await, 0);
    assert_eq!(h.queue.depth(Stage::Render).await.unwrap(), 0);
    assert_eq!(h.store.get_order_status("o1").await.unwrap(), OrderStatus::AssetsGenerated);
    assert_eq!(h.digitizer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_jobs_disabled_still_returns_correlation_id() {
    let mut h = Harness::new(DigitizeMode::Valid);
    h.state.jobs = JobsHandle::Disabled;
    h.seed_order("o1", "c1").await;

    let enqueued = enqueue_render(&h.state, render_request("/nowhere.png", "abc")).await.unwrap();
    assert!(enqueued.correlation_id.starts_with("ord-o1-cust-c1-"));
    assert_eq!(enqueued.outcome, None);
    assert!(h.store.list_job_executions("o1").await.unwrap().is_empty());
    assert!(!process_next(&h.state, Stage::Render).await.unwrap());
}

#[tokio::test]
async fn test_paid_route_enqueues_render() {
    let h = Harness::new(DigitizeMode::Valid);
    h.seed_order("o1", "c1").await;
    let (path, hash) = h.store_canonical(&pet_portrait(120));

    let request = PaidOrderRequest {
        customization_id: "c1".into(),
        canonical_asset_path: path,
        canonical_hash: hash,
        correlation_id: Some("corr-from-checkout".into()),
    };
    let (status, Json(body)) = order_paid(State(h.state.clone()), Path("o1".into()), Json(request))
        .await
        .unwrap();
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(body.queued);
    assert_eq!(body.correlation_id, "corr-from-checkout");

    let Json(listing) = order_jobs(State(h.state.clone()), Path("o1".into())).await.unwrap();
    assert_eq!(listing.status, OrderStatus::Paid);
    assert_eq!(listing.jobs.len(), 1);
    assert_eq!(listing.jobs[0].job_type, Stage::Render);
}

#[tokio::test]
async fn test_paid_route_rejects_unknown_order_and_bad_body() {
    let h = Harness::new(DigitizeMode::Valid);
    let request = |hash: &str| PaidOrderRequest {
        customization_id: "c1".into(),
        canonical_asset_path: "/a.png".into(),
        canonical_hash: hash.into(),
        correlation_id: None,
    };

    let err = order_paid(State(h.state.clone()), Path("ghost".into()), Json(request(&"a".repeat(64))))
        .await
        .unwrap_err();
    assert_eq!(err, StatusCode::NOT_FOUND);

    let err = order_paid(State(h.state.clone()), Path("ghost".into()), Json(request("short")))
        .await
        .unwrap_err();
    assert_eq!(err, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_jobs_route_needs_store() {
    let mut h = Harness::new(DigitizeMode::Valid);
    h.state.store = StoreHandle::Disabled;
    let err = order_jobs(State(h.state.clone()), Path("o1".into())).await.unwrap_err();
    assert_eq!(err, StatusCode::SERVICE_UNAVAILABLE);
}

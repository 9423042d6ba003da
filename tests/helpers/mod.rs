//! In-process pipeline harness: memory store and queue, fake digitizer,
//! temporary asset directory. The store is reached through [`FaultyStore`]
//! so tests can make individual writes fail.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::RgbImage;
use tempfile::TempDir;

use pet_patch_pipeline::app_state::AppState;
use pet_patch_pipeline::db::{MemoryStore, PipelineStore, StoreError, StoreHandle};
use pet_patch_pipeline::jobs::retry::{RetentionPolicy, RetryPolicy};
use pet_patch_pipeline::models::customization::RenderRecord;
use pet_patch_pipeline::models::job::{JobExecution, JobKey, NewJobExecution};
use pet_patch_pipeline::models::order::OrderStatus;
use pet_patch_pipeline::models::render_config::RenderConfig;
use pet_patch_pipeline::render::canonicalize;
use pet_patch_pipeline::services::digitizer::{DigitizeError, DigitizeReport, DigitizeRequest, Digitizer};
use pet_patch_pipeline::services::queue::{JobsHandle, MemoryQueue};

use crate::fixtures::png_bytes;

pub const MAX_DIMENSION: u32 = 96;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigitizeMode {
    Valid,
    Invalid,
    Crash,
}

/// Stands in for the external generator. Writes the files a real run would.
pub struct FakeDigitizer {
    mode: DigitizeMode,
    pub calls: AtomicUsize,
}

impl FakeDigitizer {
    pub fn new(mode: DigitizeMode) -> Self {
        Self {
            mode,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Digitizer for FakeDigitizer {
    async fn digitize(&self, request: &DigitizeRequest) -> Result<DigitizeReport, DigitizeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.mode == DigitizeMode::Crash {
            return Err(DigitizeError::Exit {
                code: 1,
                stderr: "segfault in stitch planner".into(),
            });
        }
        std::fs::write(&request.dst_path, b"#DST").map_err(DigitizeError::Spawn)?;
        std::fs::write(&request.preview_svg_path, b"<svg/>").map_err(DigitizeError::Spawn)?;
        std::fs::write(&request.direction_json_path, b"[]").map_err(DigitizeError::Spawn)?;
        Ok(DigitizeReport {
            valid: self.mode == DigitizeMode::Valid,
            stitch_count: 4200,
            jump_count: 12,
            trim_count: 8,
            color_changes: 6,
            debug_direction_png: None,
        })
    }
}

/// Which store write to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Upsert,
    MarkSucceeded,
    MarkFailed,
}

/// Delegates to a [`MemoryStore`], failing the next N calls of a chosen
/// write with a database error.
pub struct FaultyStore {
    inner: Arc<MemoryStore>,
    upsert: AtomicUsize,
    mark_succeeded: AtomicUsize,
    mark_failed: AtomicUsize,
}

impl FaultyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            upsert: AtomicUsize::new(0),
            mark_succeeded: AtomicUsize::new(0),
            mark_failed: AtomicUsize::new(0),
        }
    }

    pub fn fail_next(&self, fault: Fault, times: usize) {
        self.counter(fault).store(times, Ordering::SeqCst);
    }

    fn counter(&self, fault: Fault) -> &AtomicUsize {
        match fault {
            Fault::Upsert => &self.upsert,
            Fault::MarkSucceeded => &self.mark_succeeded,
            Fault::MarkFailed => &self.mark_failed,
        }
    }

    fn trip(&self, fault: Fault) -> Result<(), StoreError> {
        let tripped = self
            .counter(fault)
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl PipelineStore for FaultyStore {
    async fn upsert_job_execution(&self, new: &NewJobExecution) -> Result<(), StoreError> {
        self.trip(Fault::Upsert)?;
        self.inner.upsert_job_execution(new).await
    }

    async fn insert_job_execution_if_absent(&self, new: &NewJobExecution) -> Result<bool, StoreError> {
        self.inner.insert_job_execution_if_absent(new).await
    }

    async fn mark_job_running(&self, key: &JobKey, attempts: i32) -> Result<(), StoreError> {
        self.inner.mark_job_running(key, attempts).await
    }

    async fn mark_job_succeeded(&self, key: &JobKey) -> Result<(), StoreError> {
        self.trip(Fault::MarkSucceeded)?;
        self.inner.mark_job_succeeded(key).await
    }

    async fn mark_job_failed(&self, key: &JobKey, error_message: &str, attempts: i32) -> Result<(), StoreError> {
        self.trip(Fault::MarkFailed)?;
        self.inner.mark_job_failed(key, error_message, attempts).await
    }

    async fn get_job_execution(&self, key: &JobKey) -> Result<Option<JobExecution>, StoreError> {
        self.inner.get_job_execution(key).await
    }

    async fn list_job_executions(&self, order_id: &str) -> Result<Vec<JobExecution>, StoreError> {
        self.inner.list_job_executions(order_id).await
    }

    async fn set_order_status(&self, order_id: &str, status: OrderStatus) -> Result<(), StoreError> {
        self.inner.set_order_status(order_id, status).await
    }

    async fn get_order_status(&self, order_id: &str) -> Result<OrderStatus, StoreError> {
        self.inner.get_order_status(order_id).await
    }

    async fn record_render(&self, customization_id: &str, render: &RenderRecord) -> Result<(), StoreError> {
        self.inner.record_render(customization_id, render).await
    }

    async fn record_digitize(&self, customization_id: &str, dst_path: &str, preview_svg_path: &str) -> Result<(), StoreError> {
        self.inner.record_digitize(customization_id, dst_path, preview_svg_path).await
    }

    async fn record_production_pack(&self, order_id: &str, zip_path: &str, version: &str) -> Result<(), StoreError> {
        self.inner.record_production_pack(order_id, zip_path, version).await
    }

    async fn prune_job_executions(&self, retention: &RetentionPolicy, now: DateTime<Utc>) -> Result<u64, StoreError> {
        self.inner.prune_job_executions(retention, now).await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.inner.health_check().await
    }
}

pub struct Harness {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub faults: Arc<FaultyStore>,
    pub queue: Arc<MemoryQueue>,
    pub digitizer: Arc<FakeDigitizer>,
    pub dir: TempDir,
}

impl Harness {
    pub fn new(mode: DigitizeMode) -> Self {
        Self::with_retry(mode, RetryPolicy::new(4, Duration::ZERO))
    }

    pub fn with_retry(mode: DigitizeMode, retry: RetryPolicy) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let store = Arc::new(MemoryStore::new());
        let faults = Arc::new(FaultyStore::new(store.clone()));
        let queue = Arc::new(MemoryQueue::new());
        let digitizer = Arc::new(FakeDigitizer::new(mode));
        let config = RenderConfig {
            max_dimension: MAX_DIMENSION,
            ..RenderConfig::default()
        };
        let state = AppState::new(
            JobsHandle::Enabled(queue.clone()),
            StoreHandle::Enabled(faults.clone()),
            digitizer.clone(),
            config,
            dir.path().join("assets"),
            retry,
        );
        Self {
            state,
            store,
            faults,
            queue,
            digitizer,
            dir,
        }
    }

    pub async fn seed_order(&self, order_id: &str, customization_id: &str) {
        self.store.insert_order(order_id, OrderStatus::Paid).await;
        self.store.insert_customization(order_id, customization_id).await;
    }

    /// Canonicalize `img` and store it as an upload would be. Returns the
    /// asset path and canonical hash.
    pub fn store_canonical(&self, img: &RgbImage) -> (String, String) {
        let canonical = canonicalize(&png_bytes(img), MAX_DIMENSION).expect("canonicalize fixture");
        let path: PathBuf = self.dir.path().join(format!("{}.png", canonical.hash));
        std::fs::write(&path, &canonical.bytes).expect("write canonical");
        (path.display().to_string(), canonical.hash)
    }
}

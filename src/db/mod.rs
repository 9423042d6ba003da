use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::jobs::retry::RetentionPolicy;
use crate::models::customization::RenderRecord;
use crate::models::job::{JobExecution, JobKey, JobStatus, NewJobExecution};
use crate::models::order::OrderStatus;

pub mod memory;
pub mod queries;

pub use memory::MemoryStore;
pub use queries::PgStore;

/// Initialize PostgreSQL connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stored value could not be decoded: {0}")]
    Decode(String),

    #[error("order {0} not found")]
    OrderNotFound(String),

    #[error("customization {0} not found")]
    CustomizationNotFound(String),

    #[error("job execution {0} not found")]
    JobNotFound(String),

    #[error("job execution {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("persistence is disabled")]
    Disabled,
}

/// Order, customization and job-execution records shared by all workers.
///
/// Every write is keyed so concurrent re-delivery of the same job updates
/// one row in place.
#[async_trait]
pub trait PipelineStore: Send + Sync {
    /// Create or reset the record for `new.key` to `QUEUED`.
    async fn upsert_job_execution(&self, new: &NewJobExecution) -> Result<(), StoreError>;

    /// Create the `QUEUED` record for `new.key` unless one exists. Returns
    /// whether a record was created.
    async fn insert_job_execution_if_absent(&self, new: &NewJobExecution) -> Result<bool, StoreError>;

    /// The `mark_*` methods fail with [`StoreError::JobNotFound`] when no
    /// record exists and [`StoreError::InvalidTransition`] when the current
    /// status may not move to the new one.
    async fn mark_job_running(&self, key: &JobKey, attempts: i32) -> Result<(), StoreError>;

    async fn mark_job_succeeded(&self, key: &JobKey) -> Result<(), StoreError>;

    /// Persists the error as `{"message": error_message}`.
    async fn mark_job_failed(&self, key: &JobKey, error_message: &str, attempts: i32) -> Result<(), StoreError>;

    async fn get_job_execution(&self, key: &JobKey) -> Result<Option<JobExecution>, StoreError>;

    /// All records of an order, oldest first.
    async fn list_job_executions(&self, order_id: &str) -> Result<Vec<JobExecution>, StoreError>;

    async fn set_order_status(&self, order_id: &str, status: OrderStatus) -> Result<(), StoreError>;

    async fn get_order_status(&self, order_id: &str) -> Result<OrderStatus, StoreError>;

    async fn record_render(&self, customization_id: &str, render: &RenderRecord) -> Result<(), StoreError>;

    async fn record_digitize(&self, customization_id: &str, dst_path: &str, preview_svg_path: &str) -> Result<(), StoreError>;

    async fn record_production_pack(&self, order_id: &str, zip_path: &str, version: &str) -> Result<(), StoreError>;

    /// Delete terminal records outside `retention` as of `now`. Returns the
    /// number removed.
    async fn prune_job_executions(&self, retention: &RetentionPolicy, now: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

/// Persistence capability, resolved once at startup.
#[derive(Clone)]
pub enum StoreHandle {
    Enabled(Arc<dyn PipelineStore>),
    Disabled,
}

impl StoreHandle {
    pub fn enabled(&self) -> Option<&Arc<dyn PipelineStore>> {
        match self {
            StoreHandle::Enabled(store) => Some(store),
            StoreHandle::Disabled => None,
        }
    }

    /// The store, or [`StoreError::Disabled`] for callers that cannot proceed
    /// without one.
    pub fn require(&self) -> Result<&Arc<dyn PipelineStore>, StoreError> {
        self.enabled().ok_or(StoreError::Disabled)
    }
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreHandle::Enabled(_) => f.write_str("StoreHandle::Enabled"),
            StoreHandle::Disabled => f.write_str("StoreHandle::Disabled"),
        }
    }
}

/// Oldest `updated_at` still inside `max_age`.
pub(crate) fn age_cutoff(now: DateTime<Utc>, max_age: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(max_age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

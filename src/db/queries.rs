use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::db::{age_cutoff, PipelineStore, StoreError};
use crate::jobs::retry::{KeepPolicy, RetentionPolicy};
use crate::models::customization::RenderRecord;
use crate::models::job::{JobExecution, JobKey, JobStatus, NewJobExecution, Stage};
use crate::models::order::OrderStatus;

const JOB_COLUMNS: &str = "queue_job_id, job_type, status, attempts, order_id, customization_id, \
                           correlation_id, payload, error, created_at, updated_at";

/// Postgres-backed [`PipelineStore`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn job_from_row(r: &PgRow) -> Result<JobExecution, StoreError> {
    let job_type: String = r.try_get("job_type")?;
    let status: String = r.try_get("status")?;
    Ok(JobExecution {
        queue_job_id: r.try_get("queue_job_id")?,
        job_type: Stage::from_str(&job_type).map_err(|_| StoreError::Decode(format!("job_type {job_type}")))?,
        status: JobStatus::from_str(&status).map_err(|_| StoreError::Decode(format!("status {status}")))?,
        attempts: r.try_get("attempts")?,
        order_id: r.try_get("order_id")?,
        customization_id: r.try_get("customization_id")?,
        correlation_id: r.try_get("correlation_id")?,
        payload: r.try_get("payload")?,
        error: r.try_get("error")?,
        created_at: r.try_get("created_at")?,
        updated_at: r.try_get("updated_at")?,
    })
}

/// Apply a status change, guarded by the statuses allowed to move to
/// `status`. A miss is told apart by reading the current row.
async fn set_job_status(
    pool: &PgPool,
    key: &JobKey,
    status: JobStatus,
    attempts: Option<i32>,
    error: Option<serde_json::Value>,
) -> Result<(), StoreError> {
    let allowed: Vec<String> = JobStatus::allowed_from(status)
        .iter()
        .map(ToString::to_string)
        .collect();
    let result = sqlx::query(
        r#"
        UPDATE job_executions
        SET status = $1,
            attempts = COALESCE($2, attempts),
            error = CASE WHEN $1 = 'FAILED' THEN $3 ELSE error END,
            updated_at = NOW()
        WHERE queue_job_id = $4 AND job_type = $5 AND status = ANY($6)
        "#,
    )
    .bind(status.to_string())
    .bind(attempts)
    .bind(error)
    .bind(&key.queue_job_id)
    .bind(key.job_type.to_string())
    .bind(&allowed)
    .execute(pool)
    .await?;

    if result.rows_affected() > 0 {
        return Ok(());
    }

    let current: Option<String> =
        sqlx::query_scalar("SELECT status FROM job_executions WHERE queue_job_id = $1 AND job_type = $2")
            .bind(&key.queue_job_id)
            .bind(key.job_type.to_string())
            .fetch_optional(pool)
            .await?;
    match current {
        None => Err(StoreError::JobNotFound(key.queue_job_id.clone())),
        Some(from) => Err(StoreError::InvalidTransition {
            job_id: key.queue_job_id.clone(),
            from: JobStatus::from_str(&from).map_err(|_| StoreError::Decode(format!("status {from}")))?,
            to: status,
        }),
    }
}

async fn prune_status(
    pool: &PgPool,
    status: JobStatus,
    keep: &KeepPolicy,
    now: DateTime<Utc>,
) -> Result<u64, StoreError> {
    let result = sqlx::query(
        r#"
        DELETE FROM job_executions
        WHERE status = $1
          AND (updated_at < $2
               OR (queue_job_id, job_type) NOT IN (
                   SELECT queue_job_id, job_type
                   FROM job_executions
                   WHERE status = $1
                   ORDER BY updated_at DESC
                   LIMIT $3))
        "#,
    )
    .bind(status.to_string())
    .bind(age_cutoff(now, keep.max_age))
    .bind(keep.max_count as i64)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

#[async_trait]
impl PipelineStore for PgStore {
    async fn upsert_job_execution(&self, new: &NewJobExecution) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO job_executions
                (queue_job_id, job_type, status, attempts, order_id, customization_id, correlation_id, payload)
            VALUES ($1, $2, 'QUEUED', 0, $3, $4, $5, $6)
            ON CONFLICT (queue_job_id, job_type) DO UPDATE
            SET status = 'QUEUED',
                correlation_id = EXCLUDED.correlation_id,
                payload = EXCLUDED.payload,
                error = NULL,
                updated_at = NOW()
            "#,
        )
        .bind(&new.key.queue_job_id)
        .bind(new.key.job_type.to_string())
        .bind(&new.order_id)
        .bind(&new.customization_id)
        .bind(&new.correlation_id)
        .bind(&new.payload)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_job_execution_if_absent(&self, new: &NewJobExecution) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO job_executions
                (queue_job_id, job_type, status, attempts, order_id, customization_id, correlation_id, payload)
            VALUES ($1, $2, 'QUEUED', 0, $3, $4, $5, $6)
            ON CONFLICT (queue_job_id, job_type) DO NOTHING
            "#,
        )
        .bind(&new.key.queue_job_id)
        .bind(new.key.job_type.to_string())
        .bind(&new.order_id)
        .bind(&new.customization_id)
        .bind(&new.correlation_id)
        .bind(&new.payload)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_job_running(&self, key: &JobKey, attempts: i32) -> Result<(), StoreError> {
        set_job_status(&self.pool, key, JobStatus::Running, Some(attempts), None).await
    }

    async fn mark_job_succeeded(&self, key: &JobKey) -> Result<(), StoreError> {
        set_job_status(&self.pool, key, JobStatus::Succeeded, None, None).await
    }

    async fn mark_job_failed(&self, key: &JobKey, error_message: &str, attempts: i32) -> Result<(), StoreError> {
        let error = serde_json::json!({ "message": error_message });
        set_job_status(&self.pool, key, JobStatus::Failed, Some(attempts), Some(error)).await
    }

    async fn get_job_execution(&self, key: &JobKey) -> Result<Option<JobExecution>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM job_executions WHERE queue_job_id = $1 AND job_type = $2"
        ))
        .bind(&key.queue_job_id)
        .bind(key.job_type.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn list_job_executions(&self, order_id: &str) -> Result<Vec<JobExecution>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM job_executions WHERE order_id = $1 ORDER BY created_at ASC"
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }

    async fn set_order_status(&self, order_id: &str, status: OrderStatus) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE orders SET status = $1, updated_at = NOW() WHERE id = $2")
            .bind(status.to_string())
            .bind(order_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OrderNotFound(order_id.to_string()));
        }
        Ok(())
    }

    async fn get_order_status(&self, order_id: &str) -> Result<OrderStatus, StoreError> {
        let row = sqlx::query("SELECT status FROM orders WHERE id = $1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::OrderNotFound(order_id.to_string()))?;

        let status: String = row.try_get("status")?;
        OrderStatus::from_str(&status).map_err(|_| StoreError::Decode(format!("order status {status}")))
    }

    async fn record_render(&self, customization_id: &str, render: &RenderRecord) -> Result<(), StoreError> {
        let quality = serde_json::to_value(&render.quality).map_err(|e| StoreError::Decode(e.to_string()))?;
        let result = sqlx::query(
            r#"
            UPDATE customizations
            SET render_preview_path = $1,
                quality_report = $2,
                palette = $3,
                region_manifest_path = $4,
                render_config_hash = $5,
                pipeline_version = $6,
                updated_at = NOW()
            WHERE id = $7
            "#,
        )
        .bind(&render.preview_path)
        .bind(quality)
        .bind(serde_json::json!(render.palette))
        .bind(&render.region_manifest_path)
        .bind(&render.render_config_hash)
        .bind(&render.pipeline_version)
        .bind(customization_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::CustomizationNotFound(customization_id.to_string()));
        }
        Ok(())
    }

    async fn record_digitize(&self, customization_id: &str, dst_path: &str, preview_svg_path: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE customizations
            SET dst_path = $1, preview_svg_path = $2, updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(dst_path)
        .bind(preview_svg_path)
        .bind(customization_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::CustomizationNotFound(customization_id.to_string()));
        }
        Ok(())
    }

    async fn record_production_pack(&self, order_id: &str, zip_path: &str, version: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO production_packs (order_id, zip_path, version) VALUES ($1, $2, $3)")
            .bind(order_id)
            .bind(zip_path)
            .bind(version)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn prune_job_executions(&self, retention: &RetentionPolicy, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let succeeded = prune_status(&self.pool, JobStatus::Succeeded, &retention.succeeded, now).await?;
        let failed = prune_status(&self.pool, JobStatus::Failed, &retention.failed, now).await?;
        Ok(succeeded + failed)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

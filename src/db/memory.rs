use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::db::{age_cutoff, PipelineStore, StoreError};
use crate::jobs::retry::{KeepPolicy, RetentionPolicy};
use crate::models::customization::{Customization, ProductionPackRecord, RenderRecord};
use crate::models::job::{JobExecution, JobKey, JobStatus, NewJobExecution};
use crate::models::order::OrderStatus;

#[derive(Default)]
struct MemoryState {
    orders: HashMap<String, OrderStatus>,
    customizations: HashMap<String, Customization>,
    jobs: HashMap<JobKey, JobExecution>,
    packs: Vec<ProductionPackRecord>,
}

/// In-process [`PipelineStore`] for tests and database-less runs.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an order, as checkout would.
    pub async fn insert_order(&self, order_id: &str, status: OrderStatus) {
        self.state.write().await.orders.insert(order_id.to_string(), status);
    }

    pub async fn insert_customization(&self, order_id: &str, customization_id: &str) {
        self.state
            .write()
            .await
            .customizations
            .insert(customization_id.to_string(), Customization::new(customization_id, order_id));
    }

    pub async fn customization(&self, customization_id: &str) -> Option<Customization> {
        self.state.read().await.customizations.get(customization_id).cloned()
    }

    pub async fn production_packs(&self, order_id: &str) -> Vec<ProductionPackRecord> {
        self.state
            .read()
            .await
            .packs
            .iter()
            .filter(|p| p.order_id == order_id)
            .cloned()
            .collect()
    }

    /// Move the record for `key` to `next` and apply `update`, refusing
    /// transitions the job lifecycle does not allow.
    async fn transition_job(
        &self,
        key: &JobKey,
        next: JobStatus,
        update: impl FnOnce(&mut JobExecution) + Send,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let job = state
            .jobs
            .get_mut(key)
            .ok_or_else(|| StoreError::JobNotFound(key.queue_job_id.clone()))?;
        if !job.status.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                job_id: key.queue_job_id.clone(),
                from: job.status,
                to: next,
            });
        }
        job.status = next;
        update(job);
        job.updated_at = Utc::now();
        Ok(())
    }
}

fn new_record(new: &NewJobExecution, now: DateTime<Utc>) -> JobExecution {
    JobExecution {
        queue_job_id: new.key.queue_job_id.clone(),
        job_type: new.key.job_type,
        status: JobStatus::Queued,
        attempts: 0,
        order_id: new.order_id.clone(),
        customization_id: new.customization_id.clone(),
        correlation_id: new.correlation_id.clone(),
        payload: new.payload.clone(),
        error: None,
        created_at: now,
        updated_at: now,
    }
}

/// Keys of `status` records to drop under `keep`.
fn expired_keys(jobs: &HashMap<JobKey, JobExecution>, status: JobStatus, keep: &KeepPolicy, now: DateTime<Utc>) -> Vec<JobKey> {
    let mut terminal: Vec<&JobExecution> = jobs.values().filter(|j| j.status == status).collect();
    terminal.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    let cutoff = age_cutoff(now, keep.max_age);
    terminal
        .into_iter()
        .enumerate()
        .filter(|(rank, job)| *rank >= keep.max_count || job.updated_at < cutoff)
        .map(|(_, job)| job.key())
        .collect()
}

#[async_trait]
impl PipelineStore for MemoryStore {
    async fn upsert_job_execution(&self, new: &NewJobExecution) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut state = self.state.write().await;
        state
            .jobs
            .entry(new.key.clone())
            .and_modify(|job| {
                job.status = JobStatus::Queued;
                job.correlation_id = new.correlation_id.clone();
                job.payload = new.payload.clone();
                job.error = None;
                job.updated_at = now;
            })
            .or_insert_with(|| new_record(new, now));
        Ok(())
    }

    async fn insert_job_execution_if_absent(&self, new: &NewJobExecution) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        if state.jobs.contains_key(&new.key) {
            return Ok(false);
        }
        state.jobs.insert(new.key.clone(), new_record(new, Utc::now()));
        Ok(true)
    }

    async fn mark_job_running(&self, key: &JobKey, attempts: i32) -> Result<(), StoreError> {
        self.transition_job(key, JobStatus::Running, |job| job.attempts = attempts)
            .await
    }

    async fn mark_job_succeeded(&self, key: &JobKey) -> Result<(), StoreError> {
        self.transition_job(key, JobStatus::Succeeded, |_| {}).await
    }

    async fn mark_job_failed(&self, key: &JobKey, error_message: &str, attempts: i32) -> Result<(), StoreError> {
        let error = serde_json::json!({ "message": error_message });
        self.transition_job(key, JobStatus::Failed, move |job| {
            job.attempts = attempts;
            job.error = Some(error);
        })
        .await
    }

    async fn get_job_execution(&self, key: &JobKey) -> Result<Option<JobExecution>, StoreError> {
        Ok(self.state.read().await.jobs.get(key).cloned())
    }

    async fn list_job_executions(&self, order_id: &str) -> Result<Vec<JobExecution>, StoreError> {
        let state = self.state.read().await;
        let mut jobs: Vec<JobExecution> = state
            .jobs
            .values()
            .filter(|j| j.order_id == order_id)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.queue_job_id.cmp(&b.queue_job_id)));
        Ok(jobs)
    }

    async fn set_order_status(&self, order_id: &str, status: OrderStatus) -> Result<(), StoreError> {
        match self.state.write().await.orders.get_mut(order_id) {
            Some(current) => {
                *current = status;
                Ok(())
            }
            None => Err(StoreError::OrderNotFound(order_id.to_string())),
        }
    }

    async fn get_order_status(&self, order_id: &str) -> Result<OrderStatus, StoreError> {
        self.state
            .read()
            .await
            .orders
            .get(order_id)
            .copied()
            .ok_or_else(|| StoreError::OrderNotFound(order_id.to_string()))
    }

    async fn record_render(&self, customization_id: &str, render: &RenderRecord) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let customization = state
            .customizations
            .get_mut(customization_id)
            .ok_or_else(|| StoreError::CustomizationNotFound(customization_id.to_string()))?;
        customization.render = Some(render.clone());
        Ok(())
    }

    async fn record_digitize(&self, customization_id: &str, dst_path: &str, preview_svg_path: &str) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let customization = state
            .customizations
            .get_mut(customization_id)
            .ok_or_else(|| StoreError::CustomizationNotFound(customization_id.to_string()))?;
        customization.dst_path = Some(dst_path.to_string());
        customization.preview_svg_path = Some(preview_svg_path.to_string());
        Ok(())
    }

    async fn record_production_pack(&self, order_id: &str, zip_path: &str, version: &str) -> Result<(), StoreError> {
        self.state.write().await.packs.push(ProductionPackRecord {
            order_id: order_id.to_string(),
            zip_path: zip_path.to_string(),
            version: version.to_string(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn prune_job_executions(&self, retention: &RetentionPolicy, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.state.write().await;
        let mut expired = expired_keys(&state.jobs, JobStatus::Succeeded, &retention.succeeded, now);
        expired.extend(expired_keys(&state.jobs, JobStatus::Failed, &retention.failed, now));
        for key in &expired {
            state.jobs.remove(key);
        }
        Ok(expired.len() as u64)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tokio::time::sleep;

use crate::app_state::AppState;
use crate::db::StoreError;
use crate::jobs::stages::run_stage;
use crate::jobs::state_machine::after_failure;
use crate::jobs::StageError;
use crate::models::job::{JobKey, JobStatus, NewJobExecution, Stage};
use crate::services::queue::QueuedJob;

pub const POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Process the next job of `stage`.
/// Returns Ok(true) if a job was handled, Ok(false) if none was available.
///
/// A failing stage body is not an error here: it is recorded on the job and
/// the order, then retried or acked per the retry policy. A job is acked only
/// after its terminal status is stored. When the bookkeeping itself fails the
/// job is scheduled again and the store error is returned.
pub async fn process_next(state: &AppState, stage: Stage) -> Result<bool, StageError> {
    let Some(queue) = state.jobs.enabled() else {
        return Ok(false);
    };
    let job = match queue.pop(stage).await? {
        Some(j) => j,
        None => return Ok(false),
    };

    let attempt = job.attempt + 1;
    let key = JobKey::new(stage, job.payload.order_id(), job.payload.customization_id());
    tracing::info!(
        job_id = %job.job_id,
        stage = %stage,
        order_id = %job.payload.order_id(),
        customization_id = %job.payload.customization_id(),
        correlation_id = %job.payload.correlation_id(),
        attempt,
        "Stage started"
    );

    match start_attempt(state, &job, &key, attempt).await {
        Ok(()) => {}
        Err(StageError::Store(StoreError::InvalidTransition {
            from: JobStatus::Succeeded,
            ..
        })) => {
            queue.ack(&job).await?;
            tracing::info!(
                job_id = %job.job_id,
                stage = %stage,
                correlation_id = %job.payload.correlation_id(),
                "Job already succeeded, dropping redelivery"
            );
            return Ok(true);
        }
        Err(e) => {
            let delay = state.retry.delay(attempt);
            queue.retry_later(&job, delay).await?;
            tracing::warn!(
                job_id = %job.job_id,
                stage = %stage,
                error = %e,
                delay_ms = delay.as_millis() as u64,
                "Failed to mark job running, scheduled again"
            );
            return Err(e);
        }
    }

    let start = Instant::now();
    let result = match run_stage(state, &job.payload).await {
        Ok(outcome) => finish_attempt(state, &key).await.map(|()| outcome),
        Err(e) => Err(e),
    };
    metrics::histogram!("pipeline_stage_duration_seconds", "stage" => stage.to_string())
        .record(start.elapsed().as_secs_f64());

    match result {
        Ok(outcome) => {
            queue.ack(&job).await?;
            metrics::counter!("pipeline_jobs_succeeded_total", "stage" => stage.to_string()).increment(1);
            tracing::info!(
                job_id = %job.job_id,
                stage = %stage,
                order_id = %job.payload.order_id(),
                customization_id = %job.payload.customization_id(),
                correlation_id = %job.payload.correlation_id(),
                outcome = ?outcome,
                duration_ms = start.elapsed().as_millis() as u64,
                "Stage succeeded"
            );
        }
        Err(e) => handle_failure(state, &job, &key, attempt, e.to_string()).await?,
    }

    Ok(true)
}

/// Mark the record `RUNNING`, recreating it from the payload if it is
/// missing.
async fn start_attempt(state: &AppState, job: &QueuedJob, key: &JobKey, attempt: u32) -> Result<(), StageError> {
    let Some(store) = state.store.enabled() else {
        return Ok(());
    };
    match store.mark_job_running(key, attempt as i32).await {
        Err(StoreError::JobNotFound(_)) => {
            store
                .insert_job_execution_if_absent(&NewJobExecution::for_payload(&job.payload)?)
                .await?;
            tracing::warn!(job_id = %job.job_id, "Job record was missing, recreated from payload");
            store.mark_job_running(key, attempt as i32).await?;
            Ok(())
        }
        other => Ok(other?),
    }
}

/// Store the success. A failure here fails the attempt.
async fn finish_attempt(state: &AppState, key: &JobKey) -> Result<(), StageError> {
    if let Some(store) = state.store.enabled() {
        store.mark_job_succeeded(key).await?;
    }
    Ok(())
}

/// Mark the job failed and route the order to review. Both writes are
/// attempted; the first error is returned.
async fn record_failure(
    state: &AppState,
    job: &QueuedJob,
    key: &JobKey,
    attempt: u32,
    message: &str,
) -> Result<(), StoreError> {
    let Some(store) = state.store.enabled() else {
        return Ok(());
    };
    let marked = store.mark_job_failed(key, message, attempt as i32).await;
    let routed = store.set_order_status(job.payload.order_id(), after_failure()).await;
    marked.and(routed)
}

async fn handle_failure(
    state: &AppState,
    job: &QueuedJob,
    key: &JobKey,
    attempt: u32,
    message: String,
) -> Result<(), StageError> {
    let stage = job.stage();
    tracing::error!(
        job_id = %job.job_id,
        stage = %stage,
        order_id = %job.payload.order_id(),
        customization_id = %job.payload.customization_id(),
        correlation_id = %job.payload.correlation_id(),
        attempt,
        error = %message,
        "Stage failed"
    );
    metrics::counter!("pipeline_jobs_failed_total", "stage" => stage.to_string()).increment(1);

    let recorded = record_failure(state, job, key, attempt, &message).await;

    let Some(queue) = state.jobs.enabled() else {
        return Ok(recorded?);
    };
    let delay = state.retry.delay(attempt);
    match recorded {
        Ok(()) if !state.retry.should_retry(attempt) => {
            queue.ack(job).await?;
            tracing::warn!(
                job_id = %job.job_id,
                stage = %stage,
                attempts = attempt,
                "Stage failed after max attempts"
            );
            Ok(())
        }
        Ok(()) => {
            queue.retry_later(job, delay).await?;
            metrics::counter!("pipeline_jobs_retried_total", "stage" => stage.to_string()).increment(1);
            tracing::info!(
                job_id = %job.job_id,
                stage = %stage,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Stage scheduled for retry"
            );
            Ok(())
        }
        Err(e) => {
            // Never ack a job whose failure is not on record.
            queue.retry_later(job, delay).await?;
            metrics::counter!("pipeline_jobs_retried_total", "stage" => stage.to_string()).increment(1);
            tracing::error!(
                job_id = %job.job_id,
                stage = %stage,
                attempt,
                error = %e,
                "Failed to record stage failure, scheduled again"
            );
            Err(e.into())
        }
    }
}

/// Poll `stage` until the task is aborted.
pub async fn poll_loop(state: AppState, stage: Stage, worker: usize) {
    loop {
        match process_next(&state, stage).await {
            Ok(true) => {
                tracing::debug!(stage = %stage, worker, "Job processed, checking for next job");
            }
            Ok(false) => {
                tracing::trace!(stage = %stage, worker, "No jobs available, sleeping");
                if let Some(queue) = state.jobs.enabled() {
                    if let Ok(depth) = queue.depth(stage).await {
                        metrics::gauge!("pipeline_queue_depth", "stage" => stage.to_string()).set(depth as f64);
                    }
                }
                sleep(POLL_INTERVAL).await;
            }
            Err(e) => {
                tracing::error!(stage = %stage, worker, error = %e, "Error processing job, will retry");
                sleep(POLL_INTERVAL).await;
            }
        }
    }
}

/// Spawn `concurrency` pollers for `stage` onto `tasks`.
pub fn spawn_stage_workers(tasks: &mut JoinSet<()>, state: &AppState, stage: Stage, concurrency: usize) {
    for worker in 0..concurrency.max(1) {
        tasks.spawn(poll_loop(state.clone(), stage, worker));
    }
    tracing::info!(stage = %stage, queue = stage.queue_name(), concurrency, "Stage workers started");
}

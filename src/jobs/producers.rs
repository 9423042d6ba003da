use uuid::Uuid;

use crate::app_state::AppState;
use crate::jobs::StageError;
use crate::models::job::NewJobExecution;
use crate::models::payload::{DigitizeJobPayload, ProductionPackJobPayload, RenderJobPayload, StagePayload};
use crate::services::queue::{EnqueueOutcome, QueuedJob};

/// Identifier threading one customization through every stage.
pub fn new_correlation_id(order_id: &str, customization_id: &str) -> String {
    format!("ord-{}-cust-{}-{}", order_id, customization_id, Uuid::new_v4())
}

/// Intake for a paid customization whose canonical image is already stored.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub order_id: String,
    pub customization_id: String,
    pub canonical_asset_path: String,
    pub canonical_hash: String,
    /// Reused when the caller already has one; generated otherwise.
    pub correlation_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderEnqueued {
    pub correlation_id: String,
    /// `None` when jobs are disabled.
    pub outcome: Option<EnqueueOutcome>,
}

/// Enqueue the render stage. A correlation id is returned in every case,
/// including when jobs are disabled.
pub async fn enqueue_render(state: &AppState, request: RenderRequest) -> Result<RenderEnqueued, StageError> {
    let correlation_id = request
        .correlation_id
        .unwrap_or_else(|| new_correlation_id(&request.order_id, &request.customization_id));
    let payload = StagePayload::Render(RenderJobPayload {
        order_id: request.order_id,
        customization_id: request.customization_id,
        canonical_asset_path: request.canonical_asset_path,
        canonical_hash: request.canonical_hash,
        correlation_id: correlation_id.clone(),
    });
    let outcome = enqueue(state, payload).await?;
    Ok(RenderEnqueued {
        correlation_id,
        outcome,
    })
}

/// `None` when jobs are disabled.
pub async fn enqueue_digitize(
    state: &AppState,
    payload: DigitizeJobPayload,
) -> Result<Option<EnqueueOutcome>, StageError> {
    enqueue(state, StagePayload::Digitize(payload)).await
}

pub async fn enqueue_production_pack(
    state: &AppState,
    payload: ProductionPackJobPayload,
) -> Result<Option<EnqueueOutcome>, StageError> {
    enqueue(state, StagePayload::ProductionPack(payload)).await
}

/// Push onto the stage queue, then create or reset the job record.
///
/// A duplicate push leaves a live record untouched but still creates one
/// when it is missing, so a push whose record write failed is repaired by
/// the next enqueue of the same job.
async fn enqueue(state: &AppState, payload: StagePayload) -> Result<Option<EnqueueOutcome>, StageError> {
    let stage = payload.stage();
    let Some(queue) = state.jobs.enabled() else {
        tracing::warn!(
            stage = %stage,
            order_id = %payload.order_id(),
            customization_id = %payload.customization_id(),
            correlation_id = %payload.correlation_id(),
            "Jobs disabled, skipping enqueue"
        );
        return Ok(None);
    };

    let record = NewJobExecution::for_payload(&payload)?;
    let job = QueuedJob::new(payload);
    let outcome = queue.push(&job).await?;

    if outcome == EnqueueOutcome::Duplicate {
        let repaired = match state.store.enabled() {
            Some(store) => store.insert_job_execution_if_absent(&record).await?,
            None => false,
        };
        tracing::info!(
            job_id = %job.job_id,
            stage = %stage,
            correlation_id = %job.payload.correlation_id(),
            repaired,
            "Job already queued, skipping"
        );
        return Ok(Some(outcome));
    }

    if let Some(store) = state.store.enabled() {
        store.upsert_job_execution(&record).await?;
    }

    metrics::counter!("pipeline_jobs_enqueued_total", "stage" => stage.to_string()).increment(1);
    tracing::info!(
        job_id = %job.job_id,
        stage = %stage,
        order_id = %job.payload.order_id(),
        customization_id = %job.payload.customization_id(),
        correlation_id = %job.payload.correlation_id(),
        "Stage enqueued"
    );
    Ok(Some(outcome))
}

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::db::StoreError;
use crate::jobs::producers::{enqueue_render, RenderRequest};
use crate::models::intake::{OrderJobsResponse, PaidOrderRequest, PaidOrderResponse};
use crate::models::order::OrderStatus;
use crate::services::queue::EnqueueOutcome;

fn store_status(e: &StoreError) -> StatusCode {
    match e {
        StoreError::OrderNotFound(_) | StoreError::CustomizationNotFound(_) => StatusCode::NOT_FOUND,
        StoreError::Disabled => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// POST /api/v1/orders/{order_id}/paid: mark the order paid and start rendering.
pub async fn order_paid(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    Json(request): Json<PaidOrderRequest>,
) -> Result<(StatusCode, Json<PaidOrderResponse>), StatusCode> {
    if let Err(report) = request.validate() {
        tracing::info!(order_id = %order_id, errors = %report, "Rejected paid-order intake");
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }

    if let Some(store) = state.store.enabled() {
        store
            .set_order_status(&order_id, OrderStatus::Paid)
            .await
            .map_err(|e| {
                tracing::warn!(order_id = %order_id, error = %e, "Failed to mark order paid");
                store_status(&e)
            })?;
    }

    let enqueued = enqueue_render(
        &state,
        RenderRequest {
            order_id: order_id.clone(),
            customization_id: request.customization_id,
            canonical_asset_path: request.canonical_asset_path,
            canonical_hash: request.canonical_hash,
            correlation_id: request.correlation_id,
        },
    )
    .await
    .map_err(|e| {
        tracing::error!(order_id = %order_id, error = %e, "Failed to enqueue render");
        StatusCode::SERVICE_UNAVAILABLE
    })?;

    let queued = enqueued.outcome == Some(EnqueueOutcome::Queued);
    Ok((
        if queued { StatusCode::ACCEPTED } else { StatusCode::OK },
        Json(PaidOrderResponse {
            order_id,
            correlation_id: enqueued.correlation_id,
            queued,
        }),
    ))
}

/// GET /api/v1/orders/{order_id}/jobs: order status and its stage records.
pub async fn order_jobs(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<OrderJobsResponse>, StatusCode> {
    let store = state.store.require().map_err(|e| store_status(&e))?;
    let status = store.get_order_status(&order_id).await.map_err(|e| store_status(&e))?;
    let jobs = store.list_job_executions(&order_id).await.map_err(|e| {
        tracing::error!(order_id = %order_id, error = %e, "Failed to list job executions");
        store_status(&e)
    })?;

    Ok(Json(OrderJobsResponse {
        order_id,
        status,
        jobs,
    }))
}

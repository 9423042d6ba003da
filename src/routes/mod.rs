pub mod health;
pub mod metrics;
pub mod orders;

use axum::routing::{get, post};
use axum::Router;

use crate::app_state::AppState;

/// Control API routes, without the metrics endpoint or middleware.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/orders/{order_id}/paid", post(orders::order_paid))
        .route("/api/v1/orders/{order_id}/jobs", get(orders::order_jobs))
        .with_state(state)
}

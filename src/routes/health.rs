use std::future::Future;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Ok,
    Error,
    /// Turned off by configuration.
    Disabled,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub store: ComponentHealth,
    pub queue: ComponentHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentHealth {
    const DISABLED: Self = Self {
        status: ComponentStatus::Disabled,
        latency_ms: None,
        error: None,
    };

    async fn measure<F, E>(check: F) -> Self
    where
        F: Future<Output = Result<(), E>>,
        E: std::fmt::Display,
    {
        let start = Instant::now();
        match check.await {
            Ok(()) => Self {
                status: ComponentStatus::Ok,
                latency_ms: Some(start.elapsed().as_millis() as u64),
                error: None,
            },
            Err(e) => {
                tracing::warn!(error = %e, "Health check failed");
                Self {
                    status: ComponentStatus::Error,
                    latency_ms: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    fn is_healthy(&self) -> bool {
        self.status != ComponentStatus::Error
    }
}

/// GET /health: dependency status. Disabled capabilities count as healthy.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let store = match state.store.enabled() {
        Some(store) => ComponentHealth::measure(store.health_check()).await,
        None => ComponentHealth::DISABLED,
    };
    let queue = match state.jobs.enabled() {
        Some(queue) => ComponentHealth::measure(queue.health_check()).await,
        None => ComponentHealth::DISABLED,
    };

    let healthy = store.is_healthy() && queue.is_healthy();
    let (code, status) = if healthy {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        code,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION"),
            checks: HealthChecks { store, queue },
        }),
    )
}

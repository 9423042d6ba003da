use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;

/// Register descriptions for the pipeline metrics.
pub fn describe_pipeline_metrics() {
    metrics::describe_counter!("pipeline_jobs_enqueued_total", "Stage jobs pushed onto a queue");
    metrics::describe_counter!("pipeline_jobs_succeeded_total", "Stage attempts that completed");
    metrics::describe_counter!("pipeline_jobs_failed_total", "Stage attempts that raised an error");
    metrics::describe_counter!("pipeline_jobs_retried_total", "Failed stage attempts scheduled again");
    metrics::describe_histogram!(
        "pipeline_stage_duration_seconds",
        metrics::Unit::Seconds,
        "Wall time of one stage attempt"
    );
    metrics::describe_gauge!("pipeline_queue_depth", "Ready plus delayed jobs per stage queue");
}

/// GET /metrics: Prometheus text exposition.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

//! Process-wide tracing and metrics setup shared by the server and worker.

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::EnvFilter;

/// JSON log lines filtered by `RUST_LOG`, `info` when unset.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_current_span(false)
        .init();
}

/// Install the global Prometheus recorder and register metric descriptions.
pub fn install_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    crate::routes::metrics::describe_pipeline_metrics();
    Ok(handle)
}

/// Install the global recorder behind its own scrape listener, for processes
/// that do not serve the HTTP API. Must be called from within a Tokio runtime.
pub fn install_metrics_listener(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    crate::routes::metrics::describe_pipeline_metrics();
    Ok(())
}

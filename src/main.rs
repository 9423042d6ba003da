use std::sync::Arc;

use axum::routing::get;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use pet_patch_pipeline::{app_state::AppState, config::AppConfig, routes, telemetry};

const MAX_BODY_BYTES: usize = 1024 * 1024;

#[tokio::main]
async fn main() {
    telemetry::init_tracing();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");
    tracing::info!(
        bind_addr = %config.bind_addr,
        demo_mode = config.demo_mode,
        "Starting pet-patch-pipeline control server"
    );

    let prometheus = Arc::new(telemetry::install_metrics().expect("Failed to install Prometheus recorder"));

    // The server owns schema migrations; workers only connect.
    let state = AppState::from_config(&config, true)
        .await
        .expect("Failed to initialize application state");

    let app = routes::api_router(state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus),
        )
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind control server address");
    tracing::info!(bind_addr = %config.bind_addr, "Control server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received, draining connections");
        })
        .await
        .expect("Control server error");
}

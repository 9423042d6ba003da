use pet_patch_pipeline::{
    app_state::AppState,
    config::AppConfig,
    db::PipelineStore,
    jobs::{retry::RetentionPolicy, runner},
    models::job::Stage,
    telemetry,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

const PRUNE_INTERVAL: Duration = Duration::from_secs(15 * 60);

#[tokio::main]
async fn main() {
    telemetry::init_tracing();

    tracing::info!("Starting pipeline worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    let metrics_addr: SocketAddr = config
        .worker_metrics_addr
        .parse()
        .expect("Invalid WORKER_METRICS_ADDR");
    telemetry::install_metrics_listener(metrics_addr).expect("Failed to install metrics exporter");
    tracing::info!(%metrics_addr, "Serving worker metrics");

    let state = AppState::from_config(&config, false)
        .await
        .expect("Failed to initialize application state");

    if state.jobs.enabled().is_none() {
        tracing::warn!("Jobs are disabled, worker has nothing to do");
        return;
    }

    let mut tasks = JoinSet::new();
    for stage in Stage::ALL {
        let concurrency = match stage {
            Stage::Render => config.render_worker_concurrency,
            Stage::Digitize => config.digitize_worker_concurrency,
            Stage::ProductionPack => config.production_pack_worker_concurrency,
        };
        runner::spawn_stage_workers(&mut tasks, &state, stage, concurrency);
    }
    if let Some(store) = state.store.enabled() {
        tasks.spawn(prune_loop(store.clone()));
    }

    tracing::info!("Worker ready, processing stage queues");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received, stopping workers");
        }
        Some(result) = tasks.join_next() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Worker task exited unexpectedly");
            }
        }
    }
    tasks.shutdown().await;
}

/// Periodically drop terminal job records outside the retention policy.
async fn prune_loop(store: Arc<dyn PipelineStore>) {
    let retention = RetentionPolicy::default();
    let mut interval = tokio::time::interval(PRUNE_INTERVAL);
    loop {
        interval.tick().await;
        match store.prune_job_executions(&retention, chrono::Utc::now()).await {
            Ok(0) => tracing::trace!("No job records to prune"),
            Ok(removed) => tracing::info!(removed, "Pruned terminal job records"),
            Err(e) => tracing::warn!(error = %e, "Failed to prune job records"),
        }
    }
}

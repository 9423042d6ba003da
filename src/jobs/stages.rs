//! Stage bodies. Each one does its work, persists its results, applies the
//! order transition and enqueues the next stage when the pipeline continues.

use std::path::{Path, PathBuf};

use crate::app_state::AppState;
use crate::jobs::producers::{enqueue_digitize, enqueue_production_pack};
use crate::jobs::state_machine::{after_digitize, after_render, StageOutcome};
use crate::jobs::StageError;
use crate::models::customization::RenderRecord;
use crate::models::render_config::PIPELINE_VERSION;
use crate::models::order::OrderStatus;
use crate::models::payload::{
    DigitizeJobPayload, PackFile, ProductionPackJobPayload, RenderJobPayload, StagePayload,
};
use crate::render::process_pet_portrait;
use crate::services::digitizer::{DigitizeReport, DigitizeRequest};
use crate::services::production_pack::{pack_file_name, write_production_pack, PACK_VERSION};

pub async fn run_stage(state: &AppState, payload: &StagePayload) -> Result<StageOutcome, StageError> {
    match payload {
        StagePayload::Render(p) => render(state, p).await,
        StagePayload::Digitize(p) => digitize(state, p).await,
        StagePayload::ProductionPack(p) => production_pack(state, p).await,
    }
}

async fn set_order_status(state: &AppState, order_id: &str, status: OrderStatus) -> Result<(), StageError> {
    if let Some(store) = state.store.enabled() {
        store.set_order_status(order_id, status).await?;
    }
    Ok(())
}

fn path_string(path: &Path) -> String {
    path.display().to_string()
}

pub async fn render(state: &AppState, payload: &RenderJobPayload) -> Result<StageOutcome, StageError> {
    let canonical = tokio::fs::read(&payload.canonical_asset_path).await?;
    let prefix = format!("{}-{}", payload.canonical_hash, payload.customization_id);

    let config = state.render_config.clone();
    let out_dir = state.asset_dir.clone();
    let hash = payload.canonical_hash.clone();
    let debug_prefix = prefix.clone();
    let output = tokio::task::spawn_blocking(move || {
        process_pet_portrait(&canonical, &hash, &config, &out_dir, &debug_prefix)
    })
    .await??;

    let preview_path = state.asset_dir.join(format!("{prefix}-render.png"));
    tokio::fs::write(&preview_path, &output.preview_png).await?;

    if let Some(store) = state.store.enabled() {
        store
            .record_render(
                &payload.customization_id,
                &RenderRecord {
                    preview_path: path_string(&preview_path),
                    quality: output.quality.clone(),
                    palette: output.palette.clone(),
                    region_manifest_path: path_string(&output.debug.region_manifest_path),
                    render_config_hash: output.cache_key.config_hash.clone(),
                    pipeline_version: PIPELINE_VERSION.to_string(),
                },
            )
            .await?;
    }

    let outcome = after_render(&output.quality);
    set_order_status(state, &payload.order_id, outcome.order_status()).await?;

    tracing::info!(
        order_id = %payload.order_id,
        customization_id = %payload.customization_id,
        correlation_id = %payload.correlation_id,
        quality = ?output.quality.status,
        score = output.quality.score,
        reasons = ?output.quality.reasons,
        regions = output.regions.len(),
        "Render complete"
    );

    if outcome.next_stage().is_some() {
        enqueue_digitize(
            state,
            DigitizeJobPayload {
                order_id: payload.order_id.clone(),
                customization_id: payload.customization_id.clone(),
                canonical_hash: payload.canonical_hash.clone(),
                render_preview_path: path_string(&preview_path),
                region_manifest_path: path_string(&output.debug.region_manifest_path),
                stitch_direction_map_path: path_string(&output.debug.stitch_direction_map_path),
                correlation_id: payload.correlation_id.clone(),
            },
        )
        .await?;
    }

    Ok(outcome)
}

/// Files bundled for the embroidery floor after a valid digitize.
pub fn pack_files(payload: &DigitizeJobPayload, request: &DigitizeRequest, report: &DigitizeReport) -> Vec<PackFile> {
    let file = |path: &str, name: &str| PackFile {
        path: path.to_string(),
        name: name.to_string(),
    };
    let mut files = vec![
        file(&payload.render_preview_path, "patch-render.png"),
        file(&payload.region_manifest_path, "regions.json"),
        file(&payload.stitch_direction_map_path, "render-stitch-direction-map.png"),
        file(&path_string(&request.direction_json_path), "digitize-stitch-direction-map.json"),
    ];
    if let Some(png) = &report.debug_direction_png {
        files.push(file(png, "digitize-stitch-direction-map.png"));
    }
    files.push(file(&path_string(&request.dst_path), "embroidery.dst"));
    files.push(file(&path_string(&request.preview_svg_path), "stitch-preview.svg"));
    files
}

pub async fn digitize(state: &AppState, payload: &DigitizeJobPayload) -> Result<StageOutcome, StageError> {
    tokio::fs::create_dir_all(&state.asset_dir).await?;
    let request = DigitizeRequest::new(
        &state.asset_dir,
        Path::new(&payload.region_manifest_path),
        &payload.canonical_hash,
        &payload.customization_id,
    );
    let report = state.digitizer.digitize(&request).await?;
    let outcome = after_digitize(&report);

    tracing::info!(
        order_id = %payload.order_id,
        customization_id = %payload.customization_id,
        correlation_id = %payload.correlation_id,
        valid = report.valid,
        stitch_count = report.stitch_count,
        jump_count = report.jump_count,
        trim_count = report.trim_count,
        color_changes = report.color_changes,
        "Digitize complete"
    );

    if outcome == StageOutcome::DigitizeValid {
        if let Some(store) = state.store.enabled() {
            store
                .record_digitize(
                    &payload.customization_id,
                    &path_string(&request.dst_path),
                    &path_string(&request.preview_svg_path),
                )
                .await?;
        }
    }
    set_order_status(state, &payload.order_id, outcome.order_status()).await?;

    if outcome.next_stage().is_some() {
        enqueue_production_pack(
            state,
            ProductionPackJobPayload {
                order_id: payload.order_id.clone(),
                customization_id: payload.customization_id.clone(),
                files: pack_files(payload, &request, &report),
                correlation_id: payload.correlation_id.clone(),
            },
        )
        .await?;
    }

    Ok(outcome)
}

pub async fn production_pack(
    state: &AppState,
    payload: &ProductionPackJobPayload,
) -> Result<StageOutcome, StageError> {
    let zip_path: PathBuf = state
        .asset_dir
        .join(pack_file_name(&payload.order_id, &payload.customization_id));
    let files = payload.files.clone();
    let target = zip_path.clone();
    tokio::task::spawn_blocking(move || write_production_pack(&target, &files)).await??;

    if let Some(store) = state.store.enabled() {
        store
            .record_production_pack(&payload.order_id, &path_string(&zip_path), PACK_VERSION)
            .await?;
    }
    let outcome = StageOutcome::PackCompleted;
    set_order_status(state, &payload.order_id, outcome.order_status()).await?;

    tracing::info!(
        order_id = %payload.order_id,
        customization_id = %payload.customization_id,
        correlation_id = %payload.correlation_id,
        path = %zip_path.display(),
        entries = payload.files.len(),
        "Production pack complete"
    );
    Ok(outcome)
}

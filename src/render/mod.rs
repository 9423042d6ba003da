//! Render engine: canonical photo in, embroidery-ready palette, region
//! manifest, quality report and debug artifacts out.
//!
//! Steps:
//!
//! 1. Segment the full canonical image and derive its contour
//! 2. Crop to the padded foreground box and cover-resize to a square
//! 3. Quality gate on the crop
//! 4. Re-segment the crop and quantize it to the pet palette
//! 5. Classify regions and synthesize stitch directions
//! 6. Write the debug maps, the region manifest and the direction field
//!
//! Everything up to step 6 is pure and deterministic.

pub mod canonical;
pub mod crop;
pub mod palette;
pub mod preview;
pub mod quality;
pub mod regions;
pub mod segment;
pub mod stitch;

use std::path::{Path, PathBuf};

use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};

use crate::models::quality::QualityReport;
use crate::models::render_config::{RenderCacheKey, RenderConfig};

pub use canonical::{canonical_hash, canonicalize, CanonicalImage};
pub use regions::{Region, RegionManifest, RegionType};

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("input image data is empty")]
    EmptyInput,

    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("image encoding failed: {0}")]
    Encode(#[from] image::ImageError),

    #[error("artifact I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize render metadata: {0}")]
    Manifest(#[from] serde_json::Error),
}

/// Paths of the debug artifacts written for one render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderDebugOutputs {
    pub segmentation_mask_path: PathBuf,
    pub contour_path: PathBuf,
    pub palette_map_path: PathBuf,
    pub region_classification_path: PathBuf,
    pub stitch_direction_map_path: PathBuf,
    pub region_manifest_path: PathBuf,
    pub stitch_directions_path: PathBuf,
}

impl RenderDebugOutputs {
    pub fn for_prefix(out_dir: &Path, prefix: &str) -> Self {
        let path = |suffix: &str| out_dir.join(format!("{prefix}-{suffix}"));
        Self {
            segmentation_mask_path: path("segmentation-mask.png"),
            contour_path: path("contour.png"),
            palette_map_path: path("palette-map.png"),
            region_classification_path: path("region-classification.png"),
            stitch_direction_map_path: path("stitch-direction-map.png"),
            region_manifest_path: path("regions.json"),
            stitch_directions_path: path("stitch-directions.json"),
        }
    }
}

/// In-memory result of the pure part of the pipeline.
#[derive(Debug, Clone)]
pub struct RenderArtifacts {
    pub mask: GrayImage,
    pub contour: GrayImage,
    pub crop: RgbImage,
    pub crop_mask: GrayImage,
    pub palette_map: RgbImage,
    pub classification_map: RgbImage,
    pub direction_map: RgbImage,
    pub manifest: RegionManifest,
    pub directions: Vec<stitch::StitchDirection>,
    pub palette: Vec<String>,
    pub quality: QualityReport,
    pub preview: RgbImage,
}

/// Result of [`process_pet_portrait`].
#[derive(Debug, Clone)]
pub struct RenderOutput {
    /// SHA-256 of the encoded crop.
    pub crop_hash: String,
    pub cache_key: RenderCacheKey,
    pub preview_png: Vec<u8>,
    pub quality: QualityReport,
    pub palette: Vec<String>,
    pub regions: Vec<Region>,
    pub directions: Vec<stitch::StitchDirection>,
    pub debug: RenderDebugOutputs,
}

/// Run steps 1-5 on decoded canonical pixels.
pub fn render_artifacts(canonical: &RgbImage, config: &RenderConfig) -> RenderArtifacts {
    let mask = segment::detect_foreground(canonical);
    let contour = segment::contour(&mask);
    let bbox = crop::bbox_from_mask(&mask);
    let crop = crop::crop_square(canonical, bbox, config.max_dimension);

    let quality = quality::quality_gate(&crop, config);

    let crop_mask = segment::detect_foreground(&crop);
    let indexed = palette::quantize(&crop, &crop_mask, config.pet_palette_colors);
    let palette_map = preview::palette_map(&indexed);
    let regions = regions::classify_regions(&indexed);
    let classification_map = preview::classification_map(&indexed, &regions);
    let direction_map = stitch::direction_map(&regions, crop.width(), crop.height());
    let directions = stitch::direction_field(&regions);
    let preview = preview::compose_preview(&palette_map);

    RenderArtifacts {
        mask: mask.to_gray_image(),
        contour,
        crop_mask: crop_mask.to_gray_image(),
        manifest: RegionManifest {
            width: crop.width(),
            height: crop.height(),
            regions,
        },
        crop,
        palette_map,
        classification_map,
        direction_map,
        directions,
        palette: indexed.palette_hex(),
        quality,
        preview,
    }
}

/// Full render of a canonical PNG: compute everything, write the debug
/// artifacts under `out_dir` named `{prefix}-…`, return the preview bytes.
pub fn process_pet_portrait(
    canonical_png: &[u8],
    source_hash: &str,
    config: &RenderConfig,
    out_dir: &Path,
    prefix: &str,
) -> Result<RenderOutput, RenderError> {
    let pixels = canonical::decode_rgb(canonical_png)?;
    let artifacts = render_artifacts(&pixels, config);

    std::fs::create_dir_all(out_dir)?;
    let debug = RenderDebugOutputs::for_prefix(out_dir, prefix);
    artifacts.crop_mask.save(&debug.segmentation_mask_path)?;
    artifacts.contour.save(&debug.contour_path)?;
    artifacts.palette_map.save(&debug.palette_map_path)?;
    artifacts.classification_map.save(&debug.region_classification_path)?;
    artifacts.direction_map.save(&debug.stitch_direction_map_path)?;
    std::fs::write(
        &debug.region_manifest_path,
        serde_json::to_vec_pretty(&artifacts.manifest)?,
    )?;
    std::fs::write(
        &debug.stitch_directions_path,
        serde_json::to_vec_pretty(&artifacts.directions)?,
    )?;

    let crop_png = canonical::encode_rgb_png(&artifacts.crop)?;
    Ok(RenderOutput {
        crop_hash: canonical_hash(&crop_png),
        cache_key: RenderCacheKey::new(source_hash, config)?,
        preview_png: canonical::encode_rgb_png(&artifacts.preview)?,
        quality: artifacts.quality,
        palette: artifacts.palette,
        directions: artifacts.directions,
        regions: artifacts.manifest.regions,
        debug,
    })
}

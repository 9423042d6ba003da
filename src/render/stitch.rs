//! Stitch-direction synthesis.
//!
//! Each region gets a unit vector from its angle hint; the direction map
//! draws short strokes along that vector on an 8 px grid inside the
//! region's bounding box.

use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use super::regions::Region;

const GRID_STEP: usize = 8;
const STROKE_LENGTH: usize = 6;
const MAP_BACKGROUND: Rgb<u8> = Rgb([238, 238, 238]);
const STROKE_COLOR: Rgb<u8> = Rgb([41, 37, 36]);

/// Guidance vector for one region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StitchDirection {
    pub region_id: String,
    pub angle_deg: u32,
    pub dx: f64,
    pub dy: f64,
}

pub fn unit_vector(angle_deg: u32) -> (f64, f64) {
    let rad = (angle_deg as f64).to_radians();
    (rad.cos(), rad.sin())
}

pub fn direction_field(regions: &[Region]) -> Vec<StitchDirection> {
    regions
        .iter()
        .map(|r| {
            let (dx, dy) = unit_vector(r.angle_deg);
            StitchDirection {
                region_id: r.id.clone(),
                angle_deg: r.angle_deg,
                dx,
                dy,
            }
        })
        .collect()
}

/// Render the direction field as an RGB image.
pub fn direction_map(regions: &[Region], width: u32, height: u32) -> RgbImage {
    let mut out = RgbImage::from_pixel(width, height, MAP_BACKGROUND);
    if width == 0 || height == 0 {
        return out;
    }
    let max_x = (width - 1) as f64;
    let max_y = (height - 1) as f64;
    for region in regions {
        let (x0, y0, x1, y1) = region.bounds();
        let (vx, vy) = unit_vector(region.angle_deg);
        for y in (y0..=y1).step_by(GRID_STEP) {
            for x in (x0..=x1).step_by(GRID_STEP) {
                for t in 0..STROKE_LENGTH {
                    let px = (x as f64 + vx * t as f64).round().clamp(0.0, max_x) as u32;
                    let py = (y as f64 + vy * t as f64).round().clamp(0.0, max_y) as u32;
                    out.put_pixel(px, py, STROKE_COLOR);
                }
            }
        }
    }
    out
}

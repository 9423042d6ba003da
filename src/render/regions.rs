//! Region classification over the indexed image.

use serde::{Deserialize, Serialize};
use strum::Display;

use super::palette::{rgb_to_hex, IndexedImage};

/// Palette indices with fewer pixels than this are treated as noise.
pub const MIN_REGION_PIXELS: usize = 200;
/// Area ratio above which a region is a fill.
pub const FILL_AREA_RATIO: f64 = 0.12;
/// Area ratio above which a non-fill region is an outline.
pub const OUTLINE_AREA_RATIO: f64 = 0.03;
/// Angle step per palette index, in degrees.
const ANGLE_STEP_DEG: u32 = 27;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RegionType {
    Fill,
    Outline,
    Feature,
}

impl RegionType {
    pub fn from_area_ratio(ratio: f64) -> Self {
        if ratio > FILL_AREA_RATIO {
            RegionType::Fill
        } else if ratio > OUTLINE_AREA_RATIO {
            RegionType::Outline
        } else {
            RegionType::Feature
        }
    }
}

/// One entry of the region manifest handed to the digitizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    pub id: String,
    pub palette_index: u8,
    pub color_hex: String,
    pub region_type: RegionType,
    pub angle_deg: u32,
    pub pixel_count: usize,
    /// Bounding polygon, clockwise from the top-left corner.
    pub points: Vec<[u32; 2]>,
}

impl Region {
    /// Inclusive bounding box as `(x_min, y_min, x_max, y_max)`.
    pub fn bounds(&self) -> (u32, u32, u32, u32) {
        (self.points[0][0], self.points[0][1], self.points[2][0], self.points[2][1])
    }
}

/// Serialized manifest file: `{width, height, regions}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionManifest {
    pub width: u32,
    pub height: u32,
    pub regions: Vec<Region>,
}

/// Stitch angle hint for a palette index. Content-independent; the
/// digitizer treats it as advisory.
pub fn stitch_angle(palette_index: usize) -> u32 {
    (palette_index as u32 * ANGLE_STEP_DEG) % 180
}

#[derive(Clone, Copy)]
struct Accumulator {
    count: usize,
    x_min: u32,
    y_min: u32,
    x_max: u32,
    y_max: u32,
}

/// One region per palette index with at least [`MIN_REGION_PIXELS`] pixels,
/// in palette order.
pub fn classify_regions(indexed: &IndexedImage) -> Vec<Region> {
    let (w, h) = (indexed.width, indexed.height);
    let total = (w as usize * h as usize).max(1);
    let mut acc = vec![
        Accumulator {
            count: 0,
            x_min: w,
            y_min: h,
            x_max: 0,
            y_max: 0,
        };
        indexed.palette.len()
    ];

    for y in 0..h {
        for x in 0..w {
            let Some(a) = acc.get_mut(indexed.index_at(x, y) as usize) else {
                continue;
            };
            a.count += 1;
            a.x_min = a.x_min.min(x);
            a.y_min = a.y_min.min(y);
            a.x_max = a.x_max.max(x);
            a.y_max = a.y_max.max(y);
        }
    }

    acc.iter()
        .enumerate()
        .filter(|(_, a)| a.count >= MIN_REGION_PIXELS)
        .map(|(k, a)| Region {
            id: format!("region-{k}"),
            palette_index: k as u8,
            color_hex: rgb_to_hex(indexed.palette[k]),
            region_type: RegionType::from_area_ratio(a.count as f64 / total as f64),
            angle_deg: stitch_angle(k),
            pixel_count: a.count,
            points: vec![
                [a.x_min, a.y_min],
                [a.x_max, a.y_min],
                [a.x_max, a.y_max],
                [a.x_min, a.y_max],
            ],
        })
        .collect()
}

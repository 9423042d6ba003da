//! Debug maps and the customer-facing patch preview.

use image::{Rgb, RgbImage};

use super::palette::IndexedImage;
use super::regions::{Region, RegionType};

/// Palette map colour for indices outside the palette.
const PALETTE_FALLBACK: Rgb<u8> = Rgb([250, 245, 235]);
const FILL_COLOR: Rgb<u8> = Rgb([156, 107, 74]);
const OUTLINE_COLOR: Rgb<u8> = Rgb([63, 63, 70]);
const FEATURE_COLOR: Rgb<u8> = Rgb([17, 94, 89]);
const FRAME_COLOR: Rgb<u8> = Rgb([59, 47, 47]);

/// Preview geometry is authored on a 1024 px canvas and scaled.
const DESIGN_CANVAS: f64 = 1024.0;
const FRAME_RADIUS: f64 = 392.0;
const FRAME_STROKE: f64 = 18.0;
const THREAD_SPACING: i64 = 8;
const THREAD_ALPHA: f64 = 0.08;

/// Each pixel painted with its palette colour.
pub fn palette_map(indexed: &IndexedImage) -> RgbImage {
    RgbImage::from_fn(indexed.width, indexed.height, |x, y| {
        indexed
            .palette
            .get(indexed.index_at(x, y) as usize)
            .copied()
            .unwrap_or(PALETTE_FALLBACK)
    })
}

fn class_color(region_type: RegionType) -> Rgb<u8> {
    match region_type {
        RegionType::Fill => FILL_COLOR,
        RegionType::Outline => OUTLINE_COLOR,
        RegionType::Feature => FEATURE_COLOR,
    }
}

/// Each pixel painted by the type of its region. Pixels whose palette index
/// was discarded as noise paint as fill.
pub fn classification_map(indexed: &IndexedImage, regions: &[Region]) -> RgbImage {
    let mut by_index = vec![RegionType::Fill; indexed.palette.len().max(256)];
    for region in regions {
        by_index[region.palette_index as usize] = region.region_type;
    }
    RgbImage::from_fn(indexed.width, indexed.height, |x, y| {
        class_color(by_index[indexed.index_at(x, y) as usize])
    })
}

/// Palette map overlaid with a diagonal thread texture and a diamond frame.
pub fn compose_preview(palette_map: &RgbImage) -> RgbImage {
    let (w, h) = palette_map.dimensions();
    let scale = w.min(h) as f64 / DESIGN_CANVAS;
    let center_x = w as f64 / 2.0;
    let center_y = h as f64 / 2.0;
    let radius = FRAME_RADIUS * scale;
    let half_stroke = FRAME_STROKE * scale / 2.0 * std::f64::consts::SQRT_2;

    let mut out = palette_map.clone();
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        // Stripes run along x + y = const, one every THREAD_SPACING px.
        let phase = (x as i64 + y as i64 + h as i64).rem_euclid(THREAD_SPACING);
        if phase <= 1 || phase >= THREAD_SPACING - 1 {
            for c in pixel.0.iter_mut() {
                *c = (*c as f64 * (1.0 - THREAD_ALPHA) + 255.0 * THREAD_ALPHA).round() as u8;
            }
        }

        let l1 = (x as f64 + 0.5 - center_x).abs() + (y as f64 + 0.5 - center_y).abs();
        if (l1 - radius).abs() <= half_stroke {
            *pixel = FRAME_COLOR;
        }
    }
    out
}

//! Bounding-box crop around the detected foreground.

use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::{Deserialize, Serialize};

use super::segment::Mask;

const PAD_X_RATIO: f64 = 0.12;
const PAD_Y_RATIO: f64 = 0.18;
/// The empty-mask fallback spans `[0.2, 0.8)` of each axis.
const FALLBACK_MARGIN: f64 = 0.2;

/// Crop rectangle; `x1`/`y1` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl BoundingBox {
    pub fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }

    /// The centered box covering the middle 60% of the image.
    pub fn centered_fallback(width: u32, height: u32) -> Self {
        Self {
            x0: (width as f64 * FALLBACK_MARGIN).floor() as u32,
            y0: (height as f64 * FALLBACK_MARGIN).floor() as u32,
            x1: (width as f64 * (1.0 - FALLBACK_MARGIN)).floor() as u32,
            y1: (height as f64 * (1.0 - FALLBACK_MARGIN)).floor() as u32,
        }
    }
}

/// Smallest box enclosing the foreground, padded 12% horizontally and 18%
/// vertically and clamped to the image. An empty mask yields
/// [`BoundingBox::centered_fallback`].
pub fn bbox_from_mask(mask: &Mask) -> BoundingBox {
    let (w, h) = (mask.width(), mask.height());
    let mut found = false;
    let (mut x0, mut y0, mut x1, mut y1) = (w, h, 0, 0);
    for y in 0..h {
        for x in 0..w {
            if mask.is_foreground(x, y) {
                found = true;
                x0 = x0.min(x);
                y0 = y0.min(y);
                x1 = x1.max(x);
                y1 = y1.max(y);
            }
        }
    }
    if !found {
        return BoundingBox::centered_fallback(w, h);
    }

    let pad_x = ((x1 - x0) as f64 * PAD_X_RATIO).floor() as i64;
    let pad_y = ((y1 - y0) as f64 * PAD_Y_RATIO).floor() as i64;
    let max_x = w.saturating_sub(1) as i64;
    let max_y = h.saturating_sub(1) as i64;
    BoundingBox {
        x0: (x0 as i64 - pad_x).clamp(0, max_x) as u32,
        y0: (y0 as i64 - pad_y).clamp(0, max_y) as u32,
        x1: (x1 as i64 + pad_x).clamp(1.min(max_x), max_x) as u32,
        y1: (y1 as i64 + pad_y).clamp(1.min(max_y), max_y) as u32,
    }
}

/// Extract `bbox` and cover-resize it to a `size`×`size` square.
///
/// Degenerate boxes (zero width or height) fall back to the whole image.
pub fn crop_square(img: &RgbImage, bbox: BoundingBox, size: u32) -> RgbImage {
    let region = if bbox.width() == 0 || bbox.height() == 0 {
        img.clone()
    } else {
        imageops::crop_imm(img, bbox.x0, bbox.y0, bbox.width(), bbox.height()).to_image()
    };
    image::DynamicImage::ImageRgb8(region)
        .resize_to_fill(size, size, FilterType::Lanczos3)
        .to_rgb8()
}

//! Foreground ("pet") segmentation.
//!
//! Scores every interior pixel against a background colour estimated from
//! the four corners, thresholds the score, then closes the mask with one
//! 3×3 dilation followed by one 3×3 erosion.

use image::{GrayImage, RgbImage};

/// Weight of the colour distance from the background estimate.
const COLOR_WEIGHT: f64 = 0.55;
/// Weight of the 4-neighbour luminance gradient.
const EDGE_WEIGHT: f64 = 0.35;
/// Weight of the saturation (max - min channel).
const SATURATION_WEIGHT: f64 = 0.10;
/// Scores strictly above this are foreground.
const SCORE_CUTOFF: f64 = 45.0;

pub const FOREGROUND: u8 = 255;
pub const BACKGROUND: u8 = 0;

/// Binary per-pixel foreground indicator, row-major, 0 or 255.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Mask {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![BACKGROUND; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn is_foreground(&self, x: u32, y: u32) -> bool {
        self.data[(y * self.width + x) as usize] != BACKGROUND
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, foreground: bool) {
        self.data[(y * self.width + x) as usize] = if foreground { FOREGROUND } else { BACKGROUND };
    }

    pub fn foreground_count(&self) -> usize {
        self.data.iter().filter(|&&v| v != BACKGROUND).count()
    }

    pub fn is_empty(&self) -> bool {
        self.foreground_count() == 0
    }

    pub fn to_gray_image(&self) -> GrayImage {
        GrayImage::from_raw(self.width, self.height, self.data.clone())
            .unwrap_or_else(|| GrayImage::new(self.width, self.height))
    }
}

/// ITU-R BT.601 luma.
#[inline]
pub fn luminance(r: f64, g: f64, b: f64) -> f64 {
    0.299 * r + 0.587 * g + 0.114 * b
}

#[inline]
fn pixel_luminance(img: &RgbImage, x: u32, y: u32) -> f64 {
    let p = img.get_pixel(x, y).0;
    luminance(p[0] as f64, p[1] as f64, p[2] as f64)
}

/// Mean colour of the four corner pixels.
pub fn background_estimate(img: &RgbImage) -> [f64; 3] {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return [0.0; 3];
    }
    let corners = [(0, 0), (w - 1, 0), (0, h - 1), (w - 1, h - 1)];
    let mut sum = [0.0; 3];
    for (x, y) in corners {
        let p = img.get_pixel(x, y).0;
        for c in 0..3 {
            sum[c] += p[c] as f64;
        }
    }
    sum.map(|s| s / corners.len() as f64)
}

/// Detect the foreground mask. Border pixels are always background.
#[must_use = "returns the foreground mask"]
pub fn detect_foreground(img: &RgbImage) -> Mask {
    let (w, h) = img.dimensions();
    let mut mask = Mask::new(w, h);
    if w < 3 || h < 3 {
        return mask;
    }

    let bg = background_estimate(img);
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let p = img.get_pixel(x, y).0;
            let (r, g, b) = (p[0] as f64, p[1] as f64, p[2] as f64);
            let color_dist = ((r - bg[0]).powi(2) + (g - bg[1]).powi(2) + (b - bg[2]).powi(2)).sqrt();

            let edge = (pixel_luminance(img, x + 1, y) - pixel_luminance(img, x - 1, y)).abs()
                + (pixel_luminance(img, x, y + 1) - pixel_luminance(img, x, y - 1)).abs();

            let max = p.iter().copied().max().unwrap_or(0);
            let min = p.iter().copied().min().unwrap_or(0);
            let saturation = (max - min) as f64;

            let score = color_dist * COLOR_WEIGHT + edge * EDGE_WEIGHT + saturation * SATURATION_WEIGHT;
            mask.set(x, y, score > SCORE_CUTOFF);
        }
    }

    close(&mask)
}

/// Morphological closing: dilate then erode, 3×3 square, interior only.
///
/// Dilation must run first. Swapping the order turns this into an opening.
#[must_use = "returns the closed mask"]
pub fn close(mask: &Mask) -> Mask {
    erode(&dilate(mask))
}

fn dilate(mask: &Mask) -> Mask {
    apply_3x3(mask, |hits| hits > 0)
}

fn erode(mask: &Mask) -> Mask {
    apply_3x3(mask, |hits| hits == 9)
}

fn apply_3x3(mask: &Mask, keep: impl Fn(u32) -> bool) -> Mask {
    let (w, h) = (mask.width, mask.height);
    let mut out = Mask::new(w, h);
    if w < 3 || h < 3 {
        return out;
    }
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let mut hits = 0;
            for ny in y - 1..=y + 1 {
                for nx in x - 1..=x + 1 {
                    if mask.is_foreground(nx, ny) {
                        hits += 1;
                    }
                }
            }
            out.set(x, y, keep(hits));
        }
    }
    out
}

/// Contour map: foreground pixels with at least one background 4-neighbour
/// become white, everything else black.
#[must_use = "returns the contour image"]
pub fn contour(mask: &Mask) -> GrayImage {
    let (w, h) = (mask.width, mask.height);
    let mut out = GrayImage::new(w, h);
    if w < 3 || h < 3 {
        return out;
    }
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            if !mask.is_foreground(x, y) {
                continue;
            }
            let interior = mask.is_foreground(x, y - 1)
                && mask.is_foreground(x, y + 1)
                && mask.is_foreground(x - 1, y)
                && mask.is_foreground(x + 1, y);
            if !interior {
                out.put_pixel(x, y, image::Luma([FOREGROUND]));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn disc_image(size: u32, radius: f64) -> RgbImage {
        let c = size as f64 / 2.0;
        RgbImage::from_fn(size, size, |x, y| {
            let d = ((x as f64 - c).powi(2) + (y as f64 - c).powi(2)).sqrt();
            if d < radius {
                Rgb([120, 70, 30])
            } else {
                Rgb([235, 235, 235])
            }
        })
    }

    #[test]
    fn test_uniform_image_has_empty_mask() {
        let img = RgbImage::from_pixel(64, 64, Rgb([90, 140, 200]));
        let mask = detect_foreground(&img);
        assert!(mask.is_empty());
    }

    #[test]
    fn test_disc_is_detected() {
        let img = disc_image(64, 16.0);
        let mask = detect_foreground(&img);
        assert!(mask.is_foreground(32, 32));
        assert!(!mask.is_foreground(2, 2));
        let count = mask.foreground_count();
        let disc_area = std::f64::consts::PI * 16.0 * 16.0;
        assert!((count as f64) > disc_area * 0.8, "count {count}");
    }

    #[test]
    fn test_closing_fills_single_pixel_hole() {
        let mut mask = Mask::new(9, 9);
        for y in 2..7 {
            for x in 2..7 {
                mask.set(x, y, true);
            }
        }
        mask.set(4, 4, false);
        let closed = close(&mask);
        assert!(closed.is_foreground(4, 4));
    }

    #[test]
    fn test_closing_differs_from_opening_on_thin_line() {
        // A one-pixel line survives closing but would vanish under opening.
        let mut mask = Mask::new(11, 11);
        for x in 2..9 {
            mask.set(x, 5, true);
        }
        let closed = close(&mask);
        assert!(closed.is_foreground(5, 5));
        let opened = dilate(&erode(&mask));
        assert!(!opened.is_foreground(5, 5));
    }

    #[test]
    fn test_tiny_images_are_background() {
        let img = RgbImage::from_pixel(2, 2, Rgb([0, 0, 0]));
        assert!(detect_foreground(&img).is_empty());
    }

    #[test]
    fn test_contour_is_boundary_only() {
        let mut mask = Mask::new(10, 10);
        for y in 2..8 {
            for x in 2..8 {
                mask.set(x, y, true);
            }
        }
        let edges = contour(&mask);
        assert_eq!(edges.get_pixel(2, 4).0[0], FOREGROUND);
        assert_eq!(edges.get_pixel(4, 4).0[0], 0);
        assert_eq!(edges.get_pixel(0, 0).0[0], 0);
    }

    #[test]
    fn test_segmentation_is_deterministic() {
        let img = disc_image(48, 12.0);
        assert_eq!(detect_foreground(&img), detect_foreground(&img));
    }
}

//! Palette quantization of the masked foreground.
//!
//! Bounded k-means: a fixed number of assignment/update rounds with no
//! convergence test, so the output depends only on pixels and `k`.

use image::{Rgb, RgbImage};

use super::segment::{luminance, Mask};

/// Number of assignment/update rounds.
pub const KMEANS_ITERATIONS: usize = 7;
/// Seed colour used when there are fewer samples than palette slots.
pub const NEUTRAL_SEED: Rgb<u8> = Rgb([120, 90, 70]);
/// Percentile picked as the bright anchor, so one specular pixel does not
/// claim the slot.
const BRIGHT_ANCHOR_PERCENTILE: f64 = 0.9;

/// Per-pixel palette indices plus the palette itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedImage {
    pub width: u32,
    pub height: u32,
    /// Row-major palette index per pixel. Background pixels are 0.
    pub indices: Vec<u8>,
    pub palette: Vec<Rgb<u8>>,
}

impl IndexedImage {
    #[inline]
    pub fn index_at(&self, x: u32, y: u32) -> u8 {
        self.indices[(y * self.width + x) as usize]
    }

    pub fn palette_hex(&self) -> Vec<String> {
        self.palette.iter().map(|c| rgb_to_hex(*c)).collect()
    }
}

pub fn rgb_to_hex(c: Rgb<u8>) -> String {
    format!("#{:02x}{:02x}{:02x}", c.0[0], c.0[1], c.0[2])
}

#[inline]
fn sq_distance(a: [f64; 3], b: [f64; 3]) -> f64 {
    (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)
}

fn nearest(color: [f64; 3], centroids: &[[f64; 3]]) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (k, c) in centroids.iter().enumerate() {
        let d = sq_distance(color, *c);
        if d < best_dist {
            best_dist = d;
            best = k;
        }
    }
    best
}

fn to_f64(p: &Rgb<u8>) -> [f64; 3] {
    [p.0[0] as f64, p.0[1] as f64, p.0[2] as f64]
}

/// Every other pixel in both axes that lies inside the mask.
fn sample_foreground(img: &RgbImage, mask: &Mask) -> Vec<[f64; 3]> {
    let (w, h) = img.dimensions();
    let mut samples = Vec::new();
    for y in (0..h).step_by(2) {
        for x in (0..w).step_by(2) {
            if mask.is_foreground(x, y) {
                samples.push(to_f64(img.get_pixel(x, y)));
            }
        }
    }
    samples
}

/// Darkest and bright-anchor samples first, then samples in scan order,
/// padded with [`NEUTRAL_SEED`].
fn seed_centroids(samples: &[[f64; 3]], k: usize) -> Vec<[f64; 3]> {
    let mut seeds = Vec::with_capacity(k.max(2));
    if !samples.is_empty() {
        let mut by_lum = samples.to_vec();
        // Stable sort keeps scan order among equal luminances.
        by_lum.sort_by(|a, b| luminance(a[0], a[1], a[2]).total_cmp(&luminance(b[0], b[1], b[2])));
        seeds.push(by_lum[0]);
        let bright = ((by_lum.len() as f64) * BRIGHT_ANCHOR_PERCENTILE).floor() as usize;
        seeds.push(by_lum[bright.min(by_lum.len() - 1)]);
    }
    for s in samples {
        if seeds.len() >= k {
            break;
        }
        seeds.push(*s);
    }
    while seeds.len() < k {
        seeds.push(to_f64(&NEUTRAL_SEED));
    }
    seeds.truncate(k);
    seeds
}

/// Quantize the masked pixels of `img` to at most `k` colours.
///
/// Palette index 0 is the darkest anchor and also where every background
/// pixel lands.
#[must_use = "returns the indexed image"]
pub fn quantize(img: &RgbImage, mask: &Mask, k: usize) -> IndexedImage {
    let k = k.clamp(1, u8::MAX as usize + 1);
    let samples = sample_foreground(img, mask);
    let mut centroids = seed_centroids(&samples, k);

    for _ in 0..KMEANS_ITERATIONS {
        let mut sums = vec![[0.0f64; 4]; centroids.len()];
        for s in &samples {
            let best = nearest(*s, &centroids);
            sums[best][0] += s[0];
            sums[best][1] += s[1];
            sums[best][2] += s[2];
            sums[best][3] += 1.0;
        }
        for (centroid, sum) in centroids.iter_mut().zip(&sums) {
            if sum[3] == 0.0 {
                continue;
            }
            *centroid = [
                (sum[0] / sum[3]).round(),
                (sum[1] / sum[3]).round(),
                (sum[2] / sum[3]).round(),
            ];
        }
    }

    let (w, h) = img.dimensions();
    let mut indices = vec![0u8; w as usize * h as usize];
    for y in 0..h {
        for x in 0..w {
            if !mask.is_foreground(x, y) {
                continue;
            }
            indices[(y * w + x) as usize] = nearest(to_f64(img.get_pixel(x, y)), &centroids) as u8;
        }
    }

    let palette = centroids
        .iter()
        .map(|c| Rgb([c[0].clamp(0.0, 255.0) as u8, c[1].clamp(0.0, 255.0) as u8, c[2].clamp(0.0, 255.0) as u8]))
        .collect();

    IndexedImage {
        width: w,
        height: h,
        indices,
        palette,
    }
}

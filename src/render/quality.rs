//! Quality gate: the pass/fail decision that lets a render continue to
//! digitizing without human review.

use std::collections::BTreeMap;

use image::RgbImage;

use crate::models::quality::{QualityReport, QualityStatus};
use crate::models::render_config::RenderConfig;

pub const REASON_TOO_DARK: &str = "too_dark";
pub const REASON_OVEREXPOSED: &str = "overexposed";
const PENALTY_PER_REASON: u32 = 25;

/// Per-channel mean intensity, averaged across the three channels.
pub fn mean_brightness(img: &RgbImage) -> f64 {
    let pixels = img.width() as u64 * img.height() as u64;
    if pixels == 0 {
        return 0.0;
    }
    let mut sums = [0u64; 3];
    for p in img.pixels() {
        for c in 0..3 {
            sums[c] += p.0[c] as u64;
        }
    }
    sums.iter().map(|&s| s as f64 / pixels as f64).sum::<f64>() / 3.0
}

pub fn quality_gate(img: &RgbImage, config: &RenderConfig) -> QualityReport {
    let brightness = mean_brightness(img);
    let mut reasons = Vec::new();
    if brightness < config.min_brightness {
        reasons.push(REASON_TOO_DARK.to_string());
    }
    if brightness > config.max_brightness {
        reasons.push(REASON_OVEREXPOSED.to_string());
    }

    let score = 100u32.saturating_sub(PENALTY_PER_REASON * reasons.len() as u32) as u8;
    let status = if reasons.is_empty() {
        QualityStatus::Pass
    } else {
        QualityStatus::Fail
    };

    let mut metrics = BTreeMap::new();
    metrics.insert("brightness".to_string(), brightness);

    QualityReport {
        status,
        score,
        reasons,
        metrics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_dark_image_fails() {
        let img = RgbImage::from_pixel(16, 16, Rgb([10, 12, 8]));
        let report = quality_gate(&img, &RenderConfig::default());
        assert_eq!(report.status, QualityStatus::Fail);
        assert_eq!(report.reasons, vec![REASON_TOO_DARK]);
        assert_eq!(report.score, 75);
        assert!((report.metrics["brightness"] - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_overexposed_image_fails() {
        let img = RgbImage::from_pixel(16, 16, Rgb([250, 250, 250]));
        let report = quality_gate(&img, &RenderConfig::default());
        assert!(!report.passed());
        assert_eq!(report.reasons, vec![REASON_OVEREXPOSED]);
    }

    #[test]
    fn test_midtone_image_passes() {
        let img = RgbImage::from_pixel(16, 16, Rgb([120, 100, 90]));
        let report = quality_gate(&img, &RenderConfig::default());
        assert_eq!(report.status, QualityStatus::Pass);
        assert!(report.reasons.is_empty());
        assert_eq!(report.score, 100);
    }

    #[test]
    fn test_brightness_averages_channels() {
        let img = RgbImage::from_fn(2, 1, |x, _| if x == 0 { Rgb([0, 0, 0]) } else { Rgb([255, 255, 0]) });
        assert!((mean_brightness(&img) - 85.0).abs() < 1e-9);
    }
}

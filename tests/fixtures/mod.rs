//! Synthetic portraits for pipeline tests

use std::io::Cursor;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

/// Dark brown head with a tan ring on a pale grey backdrop. Mid brightness,
/// so it passes the quality gate.
pub fn pet_portrait(size: u32) -> RgbImage {
    let c = size as f64 / 2.0;
    RgbImage::from_fn(size, size, |x, y| {
        let d = ((x as f64 - c).powi(2) + (y as f64 - c).powi(2)).sqrt();
        if d < size as f64 * 0.2 {
            Rgb([40, 30, 25])
        } else if d < size as f64 * 0.32 {
            Rgb([150, 100, 60])
        } else {
            Rgb([200, 205, 210])
        }
    })
}

/// Near-black frame that fails the quality gate as too dark.
pub fn underexposed(size: u32) -> RgbImage {
    RgbImage::from_pixel(size, size, Rgb([12, 10, 9]))
}

/// Encode as PNG, the way an upload would arrive.
pub fn png_bytes(img: &RgbImage) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img.clone())
        .write_to(&mut buf, ImageFormat::Png)
        .expect("encode fixture png");
    buf.into_inner()
}

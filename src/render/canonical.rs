//! Canonicalization: arbitrary upload bytes in, normalized PNG out.
//!
//! The canonical PNG is the root of every downstream hash, so the output
//! must be byte-identical for identical input.

use std::io::Cursor;

use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageDecoder, ImageEncoder, ImageReader, RgbImage};
use sha2::{Digest, Sha256};

use super::RenderError;

/// Normalized, hash-identified form of an uploaded photo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalImage {
    /// Encoded PNG bytes.
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// SHA-256 hex digest of `bytes`.
    pub hash: String,
}

/// SHA-256 hex digest of raw bytes.
pub fn canonical_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Decode, apply EXIF orientation, fit inside `max_dimension`² and encode as
/// 8-bit RGB PNG.
///
/// # Errors
///
/// Returns [`RenderError::EmptyInput`] for empty input and
/// [`RenderError::UnsupportedFormat`] when the bytes cannot be decoded.
pub fn canonicalize(bytes: &[u8], max_dimension: u32) -> Result<CanonicalImage, RenderError> {
    if bytes.is_empty() {
        return Err(RenderError::EmptyInput);
    }

    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| RenderError::UnsupportedFormat(e.to_string()))?
        .into_decoder()
        .map_err(|e| RenderError::UnsupportedFormat(e.to_string()))?;
    let orientation = decoder
        .orientation()
        .map_err(|e| RenderError::UnsupportedFormat(e.to_string()))?;
    let mut img = DynamicImage::from_decoder(decoder)
        .map_err(|e| RenderError::UnsupportedFormat(e.to_string()))?;
    img.apply_orientation(orientation);

    let resized = img.resize(max_dimension, max_dimension, FilterType::Lanczos3);
    let rgb = resized.to_rgb8();
    let png = encode_rgb_png(&rgb)?;

    Ok(CanonicalImage {
        hash: canonical_hash(&png),
        width: rgb.width(),
        height: rgb.height(),
        bytes: png,
    })
}

/// Decode a canonical PNG back to RGB pixels.
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, RenderError> {
    if bytes.is_empty() {
        return Err(RenderError::EmptyInput);
    }
    let img = image::load_from_memory(bytes)
        .map_err(|e| RenderError::UnsupportedFormat(e.to_string()))?;
    Ok(img.to_rgb8())
}

pub(crate) fn encode_rgb_png(img: &RgbImage) -> Result<Vec<u8>, RenderError> {
    let mut buf = Vec::new();
    PngEncoder::new(&mut buf).write_image(
        img.as_raw(),
        img.width(),
        img.height(),
        image::ExtendedColorType::Rgb8,
    )?;
    Ok(buf)
}

//! Production pack: the zip bundle handed to the embroidery floor.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::models::payload::PackFile;

/// Version recorded alongside every pack.
pub const PACK_VERSION: &str = "1.0.0";

#[derive(Debug, thiserror::Error)]
pub enum PackError {
    #[error("pack input missing: {0}")]
    MissingFile(PathBuf),

    #[error("pack I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("zip write failed: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// Archive name for one customization.
pub fn pack_file_name(order_id: &str, customization_id: &str) -> String {
    format!("{order_id}-{customization_id}-production-pack.zip")
}

/// Write `files` into a deflated zip at `zip_path`, each under its pack name.
///
/// Every input is checked before the archive is created so a missing file
/// never leaves a partial zip behind.
pub fn write_production_pack(zip_path: &Path, files: &[PackFile]) -> Result<(), PackError> {
    for file in files {
        if !Path::new(&file.path).is_file() {
            return Err(PackError::MissingFile(PathBuf::from(&file.path)));
        }
    }
    if let Some(parent) = zip_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = ZipWriter::new(File::create(zip_path)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for file in files {
        writer.start_file(file.name.as_str(), options)?;
        writer.write_all(&std::fs::read(&file.path)?)?;
    }
    writer.finish()?;

    tracing::debug!(path = %zip_path.display(), entries = files.len(), "Production pack written");
    Ok(())
}

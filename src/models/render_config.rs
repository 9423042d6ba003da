use garde::Validate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Version stamped on render outputs; bump when the engine's output changes.
pub const PIPELINE_VERSION: &str = "1.2.0";

/// Embroidery stitch parameters, in millimetres.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct StitchConfig {
    #[garde(range(min = 0.1, max = 5.0))]
    pub fill_density_mm: f64,
    #[garde(range(min = 0.1, max = 5.0))]
    pub satin_density_mm: f64,
    #[garde(range(min = 0.0, max = 2.0))]
    pub pull_compensation_mm: f64,
    #[garde(range(min = 0.5, max = 12.0))]
    pub max_stitch_length_mm: f64,
    #[garde(range(min = 0.5, max = 20.0))]
    pub max_jump_length_mm: f64,
    #[garde(range(min = 0.5, max = 20.0))]
    pub trim_jump_threshold_mm: f64,
}

impl Default for StitchConfig {
    fn default() -> Self {
        Self {
            fill_density_mm: 0.4,
            satin_density_mm: 0.38,
            pull_compensation_mm: 0.25,
            max_stitch_length_mm: 4.0,
            max_jump_length_mm: 6.0,
            trim_jump_threshold_mm: 4.5,
        }
    }
}

/// Versioned render configuration. Together with the canonical image hash,
/// its [`RenderConfig::config_hash`] partitions the render cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderConfig {
    /// Longest edge of canonical images and side of the square render crop.
    #[garde(range(min = 16, max = 4096))]
    pub max_dimension: u32,
    #[garde(range(min = 1, max = 10))]
    pub palette_max_colors: usize,
    /// Colours allotted to the pet artwork; the rest of the needles are
    /// reserved for the patch frame.
    #[garde(range(min = 1, max = 10))]
    pub pet_palette_colors: usize,
    #[garde(range(min = 0.0, max = 255.0))]
    pub min_brightness: f64,
    #[garde(range(min = 0.0, max = 255.0))]
    pub max_brightness: f64,
    #[garde(dive)]
    pub stitch: StitchConfig,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            max_dimension: 1024,
            palette_max_colors: 10,
            pet_palette_colors: 8,
            min_brightness: 35.0,
            max_brightness: 235.0,
            stitch: StitchConfig::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RenderConfigError {
    #[error("Invalid render config: {0}")]
    Invalid(String),

    #[error("Failed to read render config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse render config: {0}")]
    Parse(#[from] serde_json::Error),
}

impl RenderConfig {
    /// Load a config from a JSON file. Missing keys take their defaults.
    pub fn from_json_file(path: &std::path::Path) -> Result<Self, RenderConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: RenderConfig = serde_json::from_str(&raw)?;
        config.validated()
    }

    /// Run field validation plus the cross-field checks garde cannot express.
    pub fn validated(self) -> Result<Self, RenderConfigError> {
        self.validate()
            .map_err(|report| RenderConfigError::Invalid(report.to_string()))?;
        if self.min_brightness >= self.max_brightness {
            return Err(RenderConfigError::Invalid(format!(
                "min_brightness ({}) must be below max_brightness ({})",
                self.min_brightness, self.max_brightness
            )));
        }
        if self.pet_palette_colors > self.palette_max_colors {
            return Err(RenderConfigError::Invalid(format!(
                "pet_palette_colors ({}) exceeds palette_max_colors ({})",
                self.pet_palette_colors, self.palette_max_colors
            )));
        }
        Ok(self)
    }

    /// SHA-256 hex digest of the config and [`PIPELINE_VERSION`], serialized
    /// with object keys in sorted order.
    pub fn config_hash(&self) -> Result<String, serde_json::Error> {
        let versioned = serde_json::json!({
            "config": serde_json::to_value(self)?,
            "pipelineVersion": PIPELINE_VERSION,
        });
        let canonical = serde_json::to_vec(&versioned)?;
        Ok(format!("{:x}", Sha256::digest(&canonical)))
    }
}

/// Identity of one render computation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RenderCacheKey {
    pub canonical_hash: String,
    pub config_hash: String,
}

impl RenderCacheKey {
    pub fn new(canonical_hash: &str, config: &RenderConfig) -> Result<Self, serde_json::Error> {
        Ok(Self {
            canonical_hash: canonical_hash.to_string(),
            config_hash: config.config_hash()?,
        })
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::quality::QualityReport;

/// Render results persisted on the customization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RenderRecord {
    pub preview_path: String,
    pub quality: QualityReport,
    pub palette: Vec<String>,
    pub region_manifest_path: String,
    pub render_config_hash: String,
    /// Engine version that produced the artifacts.
    pub pipeline_version: String,
}

/// One pet portrait on an order and the artifacts generated for it so far.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Customization {
    pub id: String,
    pub order_id: String,
    pub render: Option<RenderRecord>,
    pub dst_path: Option<String>,
    pub preview_svg_path: Option<String>,
}

impl Customization {
    pub fn new(id: &str, order_id: &str) -> Self {
        Self {
            id: id.to_string(),
            order_id: order_id.to_string(),
            render: None,
            dst_path: None,
            preview_svg_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProductionPackRecord {
    pub order_id: String,
    pub zip_path: String,
    pub version: String,
    pub created_at: DateTime<Utc>,
}

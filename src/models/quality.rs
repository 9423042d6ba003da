use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum QualityStatus {
    Pass,
    Fail,
}

/// Outcome of the quality gate for one rendered crop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityReport {
    pub status: QualityStatus,
    /// 0-100, lowered by 25 per failure reason.
    pub score: u8,
    pub reasons: Vec<String>,
    pub metrics: BTreeMap<String, f64>,
}

impl QualityReport {
    pub fn passed(&self) -> bool {
        self.status == QualityStatus::Pass
    }
}

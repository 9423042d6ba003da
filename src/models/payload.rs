use serde::{Deserialize, Serialize};

use crate::models::job::Stage;

/// Input to the render stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RenderJobPayload {
    pub order_id: String,
    pub customization_id: String,
    pub canonical_asset_path: String,
    pub canonical_hash: String,
    pub correlation_id: String,
}

/// Input to the digitize stage, produced by a passing render.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DigitizeJobPayload {
    pub order_id: String,
    pub customization_id: String,
    pub canonical_hash: String,
    pub render_preview_path: String,
    pub region_manifest_path: String,
    pub stitch_direction_map_path: String,
    pub correlation_id: String,
}

/// A file to place into the production pack under `name`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackFile {
    pub path: String,
    pub name: String,
}

/// Input to the production-pack stage, produced by a valid digitize.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProductionPackJobPayload {
    pub order_id: String,
    pub customization_id: String,
    pub files: Vec<PackFile>,
    pub correlation_id: String,
}

/// Payload of any stage, tagged by stage on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "stage", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StagePayload {
    Render(RenderJobPayload),
    Digitize(DigitizeJobPayload),
    ProductionPack(ProductionPackJobPayload),
}

impl StagePayload {
    pub fn stage(&self) -> Stage {
        match self {
            StagePayload::Render(_) => Stage::Render,
            StagePayload::Digitize(_) => Stage::Digitize,
            StagePayload::ProductionPack(_) => Stage::ProductionPack,
        }
    }

    pub fn order_id(&self) -> &str {
        match self {
            StagePayload::Render(p) => &p.order_id,
            StagePayload::Digitize(p) => &p.order_id,
            StagePayload::ProductionPack(p) => &p.order_id,
        }
    }

    pub fn customization_id(&self) -> &str {
        match self {
            StagePayload::Render(p) => &p.customization_id,
            StagePayload::Digitize(p) => &p.customization_id,
            StagePayload::ProductionPack(p) => &p.customization_id,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            StagePayload::Render(p) => &p.correlation_id,
            StagePayload::Digitize(p) => &p.correlation_id,
            StagePayload::ProductionPack(p) => &p.correlation_id,
        }
    }

    pub fn queue_job_id(&self) -> String {
        self.stage().queue_job_id(self.order_id(), self.customization_id())
    }

    /// The stage-specific payload as plain JSON, as stored on the job record.
    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            StagePayload::Render(p) => serde_json::to_value(p),
            StagePayload::Digitize(p) => serde_json::to_value(p),
            StagePayload::ProductionPack(p) => serde_json::to_value(p),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_payload_uses_camel_case() {
        let payload = RenderJobPayload {
            order_id: "o1".into(),
            customization_id: "c1".into(),
            canonical_asset_path: "/tmp/a.png".into(),
            canonical_hash: "abc".into(),
            correlation_id: "corr".into(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["canonicalAssetPath"], "/tmp/a.png");
        assert_eq!(json["correlationId"], "corr");
    }

    #[test]
    fn test_stage_payload_accessors() {
        let payload = StagePayload::ProductionPack(ProductionPackJobPayload {
            order_id: "o9".into(),
            customization_id: "c9".into(),
            files: vec![],
            correlation_id: "corr-9".into(),
        });
        assert_eq!(payload.stage(), Stage::ProductionPack);
        assert_eq!(payload.queue_job_id(), "o9:c9:pack");
        assert_eq!(payload.to_json().unwrap()["orderId"], "o9");

        let wire = serde_json::to_value(&payload).unwrap();
        assert_eq!(wire["stage"], "PRODUCTION_PACK");
    }
}

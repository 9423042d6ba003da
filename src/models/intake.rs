use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::models::job::JobExecution;
use crate::models::order::OrderStatus;

/// Payment-confirmed intake for one customization of an order.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PaidOrderRequest {
    #[garde(length(min = 1, max = 200))]
    pub customization_id: String,

    #[garde(length(min = 1, max = 1024))]
    pub canonical_asset_path: String,

    /// SHA-256 hex of the canonical image.
    #[garde(length(min = 64, max = 64), pattern(r"^[0-9a-f]+$"))]
    pub canonical_hash: String,

    #[garde(length(min = 1, max = 200))]
    pub correlation_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaidOrderResponse {
    pub order_id: String,
    pub correlation_id: String,
    /// False when jobs are disabled or the render is already queued.
    pub queued: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderJobsResponse {
    pub order_id: String,
    pub status: OrderStatus,
    pub jobs: Vec<JobExecution>,
}

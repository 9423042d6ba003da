use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lifecycle status of a customer order.
///
/// The pipeline only ever writes `Paid`, `AssetsGenerated` and `NeedsReview`;
/// the remaining states belong to fulfilment and customer service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Paid,
    AssetsGenerated,
    NeedsReview,
    InProduction,
    Qc,
    ReadyToShip,
    Shipped,
    Delivered,
    Cancelled,
    Refunded,
    IssueCustomer,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_status_wire_names() {
        assert_eq!(OrderStatus::NeedsReview.to_string(), "NEEDS_REVIEW");
        assert_eq!(OrderStatus::from_str("ASSETS_GENERATED").unwrap(), OrderStatus::AssetsGenerated);
        assert_eq!(OrderStatus::from_str("ISSUE_CUSTOMER").unwrap(), OrderStatus::IssueCustomer);
        assert_eq!(serde_json::to_string(&OrderStatus::ReadyToShip).unwrap(), "\"READY_TO_SHIP\"");
    }

    #[test]
    fn test_unknown_status_rejected() {
        assert!(OrderStatus::from_str("LOST").is_err());
    }
}

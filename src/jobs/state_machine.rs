//! Order transitions applied when a stage finishes.

use crate::models::job::Stage;
use crate::models::order::OrderStatus;
use crate::models::quality::QualityReport;
use crate::services::digitizer::DigitizeReport;

/// Result of a stage body that ran to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    RenderPassed,
    /// Quality gate failed; needs a human before digitizing.
    RenderRejected,
    DigitizeValid,
    /// The digitizer produced output it considers unusable.
    DigitizeInvalid,
    PackCompleted,
}

impl StageOutcome {
    /// Status the owning order moves to.
    pub fn order_status(self) -> OrderStatus {
        match self {
            StageOutcome::RenderPassed => OrderStatus::Paid,
            StageOutcome::RenderRejected | StageOutcome::DigitizeInvalid => OrderStatus::NeedsReview,
            StageOutcome::DigitizeValid | StageOutcome::PackCompleted => OrderStatus::AssetsGenerated,
        }
    }

    /// Stage enqueued next, if the pipeline continues.
    pub fn next_stage(self) -> Option<Stage> {
        match self {
            StageOutcome::RenderPassed => Some(Stage::Digitize),
            StageOutcome::DigitizeValid => Some(Stage::ProductionPack),
            _ => None,
        }
    }
}

pub fn after_render(quality: &QualityReport) -> StageOutcome {
    if quality.passed() {
        StageOutcome::RenderPassed
    } else {
        StageOutcome::RenderRejected
    }
}

pub fn after_digitize(report: &DigitizeReport) -> StageOutcome {
    if report.valid {
        StageOutcome::DigitizeValid
    } else {
        StageOutcome::DigitizeInvalid
    }
}

/// Any failed attempt sends the order to review, whether or not it retries.
pub fn after_failure() -> OrderStatus {
    OrderStatus::NeedsReview
}

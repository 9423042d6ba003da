//! Job orchestration: render → digitize → production pack.
//!
//! Producers enqueue stage payloads; runners pop them, execute the stage body
//! and apply the resulting order transition. Failures are recorded on the job
//! and the order before the retry policy decides whether to redeliver.

pub mod producers;
pub mod retry;
pub mod runner;
pub mod stages;
pub mod state_machine;

use crate::db::StoreError;
use crate::render::RenderError;
use crate::services::digitizer::DigitizeError;
use crate::services::production_pack::PackError;
use crate::services::queue::QueueError;

/// Anything that can fail a stage attempt.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("render failed: {0}")]
    Render(#[from] RenderError),

    #[error("digitize failed: {0}")]
    Digitize(#[from] DigitizeError),

    #[error("production pack failed: {0}")]
    Pack(#[from] PackError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("failed to encode job payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("stage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("stage task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
}

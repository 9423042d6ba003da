use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::models::payload::StagePayload;

/// Status of one stage execution in the job pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Succeeded,
        JobStatus::Failed,
    ];

    /// Whether a record in `self` may move to `next`.
    ///
    /// A failed attempt re-enters at `Running` when the queue retries it, and
    /// a re-delivered in-flight job may mark `Running` again. Re-enqueueing
    /// resets any state back to `Queued`. Nothing leaves `Succeeded` except a
    /// re-enqueue.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (_, Queued) | (Queued, Running) | (Failed, Running) | (Running, Running)
                | (Running, Succeeded) | (Running, Failed)
        )
    }

    /// Every status a record may be in when it moves to `next`.
    pub fn allowed_from(next: JobStatus) -> Vec<JobStatus> {
        Self::ALL
            .into_iter()
            .filter(|from| from.can_transition_to(next))
            .collect()
    }
}

/// Pipeline stage. Doubles as the persisted job type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Render,
    Digitize,
    ProductionPack,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Render, Stage::Digitize, Stage::ProductionPack];

    /// Name of the durable queue draining this stage.
    pub fn queue_name(self) -> &'static str {
        match self {
            Stage::Render => "render-pipeline",
            Stage::Digitize => "digitize-pipeline",
            Stage::ProductionPack => "production-pack-pipeline",
        }
    }

    fn job_suffix(self) -> &'static str {
        match self {
            Stage::Render => "render",
            Stage::Digitize => "digitize",
            Stage::ProductionPack => "pack",
        }
    }

    /// Deterministic queue job id: one logical job per (order, customization, stage).
    pub fn queue_job_id(self, order_id: &str, customization_id: &str) -> String {
        format!("{}:{}:{}", order_id, customization_id, self.job_suffix())
    }
}

/// Composite identity of a job execution record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub queue_job_id: String,
    pub job_type: Stage,
}

impl JobKey {
    pub fn new(stage: Stage, order_id: &str, customization_id: &str) -> Self {
        Self {
            queue_job_id: stage.queue_job_id(order_id, customization_id),
            job_type: stage,
        }
    }
}

/// Persistent record of one stage execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecution {
    pub queue_job_id: String,
    pub job_type: Stage,
    pub status: JobStatus,
    pub attempts: i32,
    pub order_id: String,
    pub customization_id: String,
    pub correlation_id: String,
    pub payload: serde_json::Value,
    pub error: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobExecution {
    pub fn key(&self) -> JobKey {
        JobKey {
            queue_job_id: self.queue_job_id.clone(),
            job_type: self.job_type,
        }
    }

    /// Error message recorded by the last failed attempt, if any.
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref()?.get("message")?.as_str()
    }
}

/// Values written when a job is (re-)enqueued.
#[derive(Debug, Clone)]
pub struct NewJobExecution {
    pub key: JobKey,
    pub order_id: String,
    pub customization_id: String,
    pub correlation_id: String,
    pub payload: serde_json::Value,
}

impl NewJobExecution {
    pub fn for_payload(payload: &StagePayload) -> Result<Self, serde_json::Error> {
        Ok(Self {
            key: JobKey::new(payload.stage(), payload.order_id(), payload.customization_id()),
            order_id: payload.order_id().to_string(),
            customization_id: payload.customization_id().to_string(),
            correlation_id: payload.correlation_id().to_string(),
            payload: payload.to_json()?,
        })
    }
}

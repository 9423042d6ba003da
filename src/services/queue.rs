use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::models::job::Stage;
use crate::models::payload::StagePayload;

const KEY_PREFIX: &str = "pet_patch";

/// Job envelope serialized into the stage queues.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedJob {
    /// `{orderId}:{customizationId}:{render|digitize|pack}`.
    pub job_id: String,
    /// Attempts already made; 0 on first delivery.
    pub attempt: u32,
    pub payload: StagePayload,
}

impl QueuedJob {
    pub fn new(payload: StagePayload) -> Self {
        Self {
            job_id: payload.queue_job_id(),
            attempt: 0,
            payload,
        }
    }

    pub fn stage(&self) -> Stage {
        self.payload.stage()
    }

    /// The envelope redelivered after this attempt failed.
    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// A job with the same id is still retained; nothing was added.
    Duplicate,
}

/// Durable per-stage work queue with at-least-once delivery.
///
/// `push` is idempotent on `job_id` for as long as the id is retained.
/// Popped jobs stay in a processing list until `ack` or `retry_later`. A job
/// left there past the visibility timeout (its worker died or hung) is
/// reclaimed by a later `pop` and redelivered as its next attempt.
#[async_trait]
pub trait StageQueue: Send + Sync {
    async fn push(&self, job: &QueuedJob) -> Result<EnqueueOutcome, QueueError>;

    async fn pop(&self, stage: Stage) -> Result<Option<QueuedJob>, QueueError>;

    /// Remove a finished job from the processing list.
    async fn ack(&self, job: &QueuedJob) -> Result<(), QueueError>;

    /// Move a popped job back to the queue, runnable after `delay`.
    async fn retry_later(&self, job: &QueuedJob, delay: Duration) -> Result<(), QueueError>;

    async fn depth(&self, stage: Stage) -> Result<u64, QueueError>;

    async fn health_check(&self) -> Result<(), QueueError>;
}

/// Job-queue capability, resolved once at startup.
#[derive(Clone)]
pub enum JobsHandle {
    Enabled(Arc<dyn StageQueue>),
    Disabled,
}

impl JobsHandle {
    pub fn enabled(&self) -> Option<&Arc<dyn StageQueue>> {
        match self {
            JobsHandle::Enabled(queue) => Some(queue),
            JobsHandle::Disabled => None,
        }
    }
}

impl std::fmt::Debug for JobsHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobsHandle::Enabled(_) => f.write_str("JobsHandle::Enabled"),
            JobsHandle::Disabled => f.write_str("JobsHandle::Disabled"),
        }
    }
}

fn queue_key(stage: Stage) -> String {
    format!("{}:{}:jobs", KEY_PREFIX, stage.queue_name())
}

fn processing_key(stage: Stage) -> String {
    format!("{}:{}:processing", KEY_PREFIX, stage.queue_name())
}

fn delayed_key(stage: Stage) -> String {
    format!("{}:{}:delayed", KEY_PREFIX, stage.queue_name())
}

fn lease_key(stage: Stage) -> String {
    format!("{}:{}:leases", KEY_PREFIX, stage.queue_name())
}

fn dedup_key(job_id: &str) -> String {
    format!("{}:job:{}", KEY_PREFIX, job_id)
}

fn epoch_ms_after(delay: Duration) -> i64 {
    chrono::Utc::now().timestamp_millis() + delay.as_millis() as i64
}

/// Redis-backed stage queue.
///
/// Ready jobs live in a list, in-flight jobs in a processing list, retries in
/// a sorted set scored by their ready-at time in epoch milliseconds. Each
/// in-flight job also holds a lease in a sorted set scored by its deadline.
/// A `SET NX EX` marker per job id provides enqueue deduplication.
pub struct RedisQueue {
    client: redis::Client,
    retention: Duration,
    visibility_timeout: Duration,
}

impl RedisQueue {
    pub fn new(redis_url: &str, retention: Duration, visibility_timeout: Duration) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self {
            client,
            retention,
            visibility_timeout,
        })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)
    }

    /// Move delayed jobs whose time has come onto the ready list.
    async fn promote_due(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        stage: Stage,
    ) -> Result<(), QueueError> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let due: Vec<String> = conn
            .zrangebyscore_limit(delayed_key(stage), "-inf", now_ms, 0, 64)
            .await
            .map_err(QueueError::Redis)?;
        for payload in due {
            // Only the caller that removes the entry gets to requeue it.
            let removed: i64 = conn
                .zrem(delayed_key(stage), &payload)
                .await
                .map_err(QueueError::Redis)?;
            if removed == 1 {
                conn.lpush::<_, _, ()>(queue_key(stage), &payload)
                    .await
                    .map_err(QueueError::Redis)?;
            }
        }
        Ok(())
    }

    /// Requeue in-flight jobs whose lease expired. Returns how many were
    /// reclaimed.
    async fn reclaim_stalled(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        stage: Stage,
    ) -> Result<u64, QueueError> {
        // A worker that died between pop and lease left an entry without one.
        let in_flight: Vec<String> = conn
            .lrange(processing_key(stage), 0, -1)
            .await
            .map_err(QueueError::Redis)?;
        if !in_flight.is_empty() {
            let deadline = epoch_ms_after(self.visibility_timeout);
            let mut pipe = redis::pipe();
            for payload in &in_flight {
                pipe.cmd("ZADD")
                    .arg(lease_key(stage))
                    .arg("NX")
                    .arg(deadline)
                    .arg(payload)
                    .ignore();
            }
            pipe.query_async::<()>(conn).await.map_err(QueueError::Redis)?;
        }

        let now_ms = chrono::Utc::now().timestamp_millis();
        let expired: Vec<String> = conn
            .zrangebyscore_limit(lease_key(stage), "-inf", now_ms, 0, 64)
            .await
            .map_err(QueueError::Redis)?;
        let mut reclaimed = 0;
        for payload in expired {
            conn.zrem::<_, _, ()>(lease_key(stage), &payload)
                .await
                .map_err(QueueError::Redis)?;
            // Only the caller that removes the entry gets to requeue it.
            let removed: i64 = conn
                .lrem(processing_key(stage), 1, &payload)
                .await
                .map_err(QueueError::Redis)?;
            if removed != 1 {
                continue;
            }
            let job: QueuedJob = serde_json::from_str(&payload).map_err(QueueError::Serialize)?;
            let next = serde_json::to_string(&job.next_attempt()).map_err(QueueError::Serialize)?;
            conn.rpush::<_, _, ()>(queue_key(stage), &next)
                .await
                .map_err(QueueError::Redis)?;
            tracing::warn!(job_id = %job.job_id, stage = %stage, attempt = job.attempt, "Reclaimed stalled job");
            reclaimed += 1;
        }
        Ok(reclaimed)
    }
}

#[async_trait]
impl StageQueue for RedisQueue {
    async fn push(&self, job: &QueuedJob) -> Result<EnqueueOutcome, QueueError> {
        let mut conn = self.connection().await?;
        let fresh: Option<String> = redis::cmd("SET")
            .arg(dedup_key(&job.job_id))
            .arg(job.stage().to_string())
            .arg("NX")
            .arg("EX")
            .arg(self.retention.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        if fresh.is_none() {
            return Ok(EnqueueOutcome::Duplicate);
        }

        let payload = serde_json::to_string(job).map_err(QueueError::Serialize)?;
        conn.lpush::<_, _, ()>(queue_key(job.stage()), &payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(EnqueueOutcome::Queued)
    }

    async fn pop(&self, stage: Stage) -> Result<Option<QueuedJob>, QueueError> {
        let mut conn = self.connection().await?;
        self.promote_due(&mut conn, stage).await?;
        self.reclaim_stalled(&mut conn, stage).await?;

        let result: Option<String> = conn
            .rpoplpush(queue_key(stage), processing_key(stage))
            .await
            .map_err(QueueError::Redis)?;
        let Some(payload) = result else {
            return Ok(None);
        };
        conn.zadd::<_, _, _, ()>(lease_key(stage), &payload, epoch_ms_after(self.visibility_timeout))
            .await
            .map_err(QueueError::Redis)?;

        let job: QueuedJob = serde_json::from_str(&payload).map_err(QueueError::Serialize)?;
        Ok(Some(job))
    }

    async fn ack(&self, job: &QueuedJob) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(job).map_err(QueueError::Serialize)?;
        redis::pipe()
            .atomic()
            .lrem(processing_key(job.stage()), 1, &payload)
            .ignore()
            .zrem(lease_key(job.stage()), &payload)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn retry_later(&self, job: &QueuedJob, delay: Duration) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let in_flight = serde_json::to_string(job).map_err(QueueError::Serialize)?;
        let next = serde_json::to_string(&job.next_attempt()).map_err(QueueError::Serialize)?;
        redis::pipe()
            .atomic()
            .zadd(delayed_key(job.stage()), &next, epoch_ms_after(delay))
            .ignore()
            .lrem(processing_key(job.stage()), 1, &in_flight)
            .ignore()
            .zrem(lease_key(job.stage()), &in_flight)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn depth(&self, stage: Stage) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let ready: u64 = conn.llen(queue_key(stage)).await.map_err(QueueError::Redis)?;
        let delayed: u64 = conn.zcard(delayed_key(stage)).await.map_err(QueueError::Redis)?;
        Ok(ready + delayed)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}

const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(900);

struct InFlight {
    deadline: tokio::time::Instant,
    job: QueuedJob,
}

#[derive(Default)]
struct MemoryQueueState {
    ready: HashMap<Stage, VecDeque<QueuedJob>>,
    delayed: Vec<(tokio::time::Instant, QueuedJob)>,
    processing: Vec<InFlight>,
    retained: HashSet<String>,
}

impl MemoryQueueState {
    fn settle(&mut self, job: &QueuedJob) {
        if let Some(pos) = self.processing.iter().position(|p| &p.job == job) {
            self.processing.remove(pos);
        }
    }
}

/// In-process stage queue for tests and single-process deployments.
///
/// Deduplication ids are retained until [`MemoryQueue::forget`] is called.
pub struct MemoryQueue {
    state: Mutex<MemoryQueueState>,
    visibility_timeout: Duration,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::with_visibility_timeout(DEFAULT_VISIBILITY_TIMEOUT)
    }
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_visibility_timeout(visibility_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(MemoryQueueState::default()),
            visibility_timeout,
        }
    }

    /// Drop the retained id so the same job may be enqueued again.
    pub async fn forget(&self, job_id: &str) {
        self.state.lock().await.retained.remove(job_id);
    }

    /// Snapshot of the ready jobs of a stage, oldest first.
    pub async fn pending(&self, stage: Stage) -> Vec<QueuedJob> {
        let state = self.state.lock().await;
        state
            .ready
            .get(&stage)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.processing.len()
    }
}

#[async_trait]
impl StageQueue for MemoryQueue {
    async fn push(&self, job: &QueuedJob) -> Result<EnqueueOutcome, QueueError> {
        let mut state = self.state.lock().await;
        if !state.retained.insert(job.job_id.clone()) {
            return Ok(EnqueueOutcome::Duplicate);
        }
        state.ready.entry(job.stage()).or_default().push_back(job.clone());
        Ok(EnqueueOutcome::Queued)
    }

    async fn pop(&self, stage: Stage) -> Result<Option<QueuedJob>, QueueError> {
        let mut state = self.state.lock().await;
        let now = tokio::time::Instant::now();

        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut state.delayed)
            .into_iter()
            .partition(|(at, job)| *at <= now && job.stage() == stage);
        state.delayed = waiting;
        for (_, job) in due {
            state.ready.entry(stage).or_default().push_back(job);
        }

        let (stalled, live): (Vec<_>, Vec<_>) = std::mem::take(&mut state.processing)
            .into_iter()
            .partition(|p| p.deadline <= now && p.job.stage() == stage);
        state.processing = live;
        for p in stalled {
            tracing::warn!(job_id = %p.job.job_id, stage = %stage, "Reclaimed stalled job");
            state.ready.entry(stage).or_default().push_front(p.job.next_attempt());
        }

        let next = state.ready.get_mut(&stage).and_then(|q| q.pop_front());
        if let Some(job) = &next {
            state.processing.push(InFlight {
                deadline: now + self.visibility_timeout,
                job: job.clone(),
            });
        }
        Ok(next)
    }

    async fn ack(&self, job: &QueuedJob) -> Result<(), QueueError> {
        self.state.lock().await.settle(job);
        Ok(())
    }

    async fn retry_later(&self, job: &QueuedJob, delay: Duration) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state.settle(job);
        state
            .delayed
            .push((tokio::time::Instant::now() + delay, job.next_attempt()));
        Ok(())
    }

    async fn depth(&self, stage: Stage) -> Result<u64, QueueError> {
        let state = self.state.lock().await;
        let ready = state.ready.get(&stage).map_or(0, |q| q.len());
        let delayed = state.delayed.iter().filter(|(_, j)| j.stage() == stage).count();
        Ok((ready + delayed) as u64)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

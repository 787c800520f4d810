#![deny(clippy::print_stdout, clippy::print_stderr)]

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

mod in_memory;
#[cfg(feature = "postgres-store")]
mod postgres;

pub use crate::in_memory::InMemoryJobQueue;
#[cfg(feature = "postgres-store")]
pub use crate::postgres::PostgresJobQueue;

pub type JobId = String;

pub type JobQueueResult<T> = Result<T, JobQueueError>;

#[derive(Debug, Error)]
pub enum JobQueueError {
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("job {0} is not claimable (wrong status or not yet scheduled)")]
    NotClaimable(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Receitas (10) > despesas (20) > baixas (30); lower numbers drain first.
pub mod priority {
    pub const RECEITA: i32 = 10;
    pub const DESPESA: i32 = 20;
    pub const BAIXA: i32 = 30;
}

/// Exponential backoff schedule in seconds: 30s, 120s, 480s, then `dead`.
/// Expressed as data so the worker loop never special-cases attempt numbers.
pub const BACKOFF_SCHEDULE_SECONDS: &[i64] = &[30, 120, 480];
pub const STUCK_PROCESSING_AFTER_MINUTES: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Dead,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub group_id: Option<String>,
    pub seller: Option<String>,
    pub priority: Option<i32>,
}

impl JobFilter {
    #[must_use]
    pub fn matches(&self, job: &CaJob) -> bool {
        if let Some(status) = self.status
            && job.status != status
        {
            return false;
        }
        if let Some(group_id) = &self.group_id
            && job.group_id != *group_id
        {
            return false;
        }
        if let Some(seller) = &self.seller
            && job.seller != *seller
        {
            return false;
        }
        if let Some(priority) = self.priority
            && job.priority != priority
        {
            return false;
        }
        true
    }
}

/// Everything needed to write one CA job row; `idempotency_key` is the
/// deduplication key (spec invariant 2: at most one job per key ever exists).
#[derive(Debug, Clone, PartialEq)]
pub struct EnqueueJobRequest {
    pub idempotency_key: String,
    pub seller: String,
    pub group_id: String,
    pub kind: String,
    pub endpoint: String,
    pub method: String,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub scheduled_for: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaJob {
    pub id: JobId,
    pub idempotency_key: String,
    pub seller: String,
    pub group_id: String,
    pub kind: String,
    pub endpoint: String,
    pub method: String,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub status: JobStatus,
    pub attempts: u32,
    pub scheduled_for: DateTime<Utc>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub response_status: Option<u16>,
    pub response_body: Option<String>,
    pub protocol: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CaJob {
    fn new(request: EnqueueJobRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            idempotency_key: request.idempotency_key,
            seller: request.seller,
            group_id: request.group_id,
            kind: request.kind,
            endpoint: request.endpoint,
            method: request.method,
            payload: request.payload,
            priority: request.priority,
            status: JobStatus::Pending,
            attempts: 0,
            scheduled_for: request.scheduled_for,
            next_retry_at: None,
            claimed_at: None,
            response_status: None,
            response_body: None,
            protocol: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, JobStatus::Pending | JobStatus::Failed) && self.scheduled_for <= now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStatus {
    AllCompleted,
    HasDead,
    Pending,
}

/// Outcome the worker passes back after attempting HTTP execution; maps
/// directly onto the status code each branch is keyed on.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    Success { protocol: String },
    Unauthorized,
    RetryableFailure { status: Option<u16>, body: Option<String> },
    NonRetryableFailure { status: Option<u16>, body: Option<String> },
}

/// Next backoff duration for a job that has just failed its `attempts`-th
/// time, or `None` once the schedule is exhausted (the job goes `dead`).
#[must_use]
pub fn backoff_for_attempt(attempts: u32) -> Option<Duration> {
    BACKOFF_SCHEDULE_SECONDS
        .get(usize::try_from(attempts.saturating_sub(1)).unwrap_or(usize::MAX))
        .map(|seconds| Duration::seconds(*seconds))
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Idempotent on `idempotency_key`: a conflicting enqueue returns the
    /// existing row unmodified.
    async fn enqueue(&self, request: EnqueueJobRequest) -> JobQueueResult<CaJob>;
    async fn get(&self, id: &JobId) -> JobQueueResult<CaJob>;
    async fn list(&self, filter: JobFilter) -> JobQueueResult<Vec<CaJob>>;

    /// Atomically claims the highest-priority ready job (`pending`/`failed`,
    /// `scheduled_for <= now`), ordered by `(priority, created_at)`.
    async fn claim_next(&self, now: DateTime<Utc>) -> JobQueueResult<Option<CaJob>>;

    /// Startup recovery: any row stuck in `processing` longer than
    /// [`STUCK_PROCESSING_AFTER_MINUTES`] is reset to `failed`.
    async fn reset_stuck_processing(&self, now: DateTime<Utc>) -> JobQueueResult<usize>;

    async fn apply_outcome(
        &self,
        id: &JobId,
        outcome: ExecutionOutcome,
        now: DateTime<Utc>,
    ) -> JobQueueResult<CaJob>;

    async fn group_status(&self, group_id: &str) -> JobQueueResult<GroupStatus>;

    /// Resets `attempts` and `status` to `pending` for one dead job.
    async fn retry_dead(&self, id: &JobId) -> JobQueueResult<CaJob>;
    /// Bulk variant of [`JobQueue::retry_dead`] over a filter.
    async fn retry_dead_bulk(&self, filter: JobFilter) -> JobQueueResult<Vec<CaJob>>;
}

#[derive(Debug, Clone, Default)]
pub struct JobStatusCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub dead: usize,
}

#[must_use]
pub fn tally_statuses(jobs: &[CaJob]) -> JobStatusCounts {
    let mut counts = JobStatusCounts::default();
    for job in jobs {
        match job.status {
            JobStatus::Pending => counts.pending += 1,
            JobStatus::Processing => counts.processing += 1,
            JobStatus::Completed => counts.completed += 1,
            JobStatus::Failed => counts.failed += 1,
            JobStatus::Dead => counts.dead += 1,
        }
    }
    counts
}

#[must_use]
pub fn group_status_from(jobs: &[CaJob]) -> GroupStatus {
    if jobs.iter().any(|job| job.status == JobStatus::Dead) {
        return GroupStatus::HasDead;
    }
    if !jobs.is_empty() && jobs.iter().all(|job| job.status == JobStatus::Completed) {
        return GroupStatus::AllCompleted;
    }
    GroupStatus::Pending
}

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;

use crate::CaJob;
use crate::EnqueueJobRequest;
use crate::ExecutionOutcome;
use crate::GroupStatus;
use crate::JobFilter;
use crate::JobId;
use crate::JobQueue;
use crate::JobQueueError;
use crate::JobQueueResult;

/// Postgres-backed persistence stub, gated behind the `postgres-store`
/// feature the same way `codex-policy`'s durable store is stubbed: the
/// claim-next-ready ordering [`JobQueue::claim_next`] requires is drafted in
/// schema form below but not yet wired to a live connection, so every call
/// reports [`JobQueueError::Storage`] rather than silently behaving like the
/// in-memory reference implementation.
///
/// # Schema Draft
/// ```sql
/// CREATE TABLE ca_jobs (
///     id UUID PRIMARY KEY,
///     idempotency_key TEXT NOT NULL UNIQUE,
///     seller TEXT NOT NULL,
///     group_id TEXT NOT NULL,
///     kind TEXT NOT NULL,
///     endpoint TEXT NOT NULL,
///     method TEXT NOT NULL,
///     payload JSONB NOT NULL,
///     priority INT NOT NULL,
///     status TEXT NOT NULL,
///     attempts INT NOT NULL DEFAULT 0,
///     scheduled_for TIMESTAMPTZ NOT NULL,
///     next_retry_at TIMESTAMPTZ,
///     claimed_at TIMESTAMPTZ,
///     response_status INT,
///     response_body TEXT,
///     protocol TEXT,
///     created_at TIMESTAMPTZ NOT NULL,
///     updated_at TIMESTAMPTZ NOT NULL
/// );
/// ```
///
/// TODO: wire `sqlx::PgPool` and a `SELECT ... FOR UPDATE SKIP LOCKED` claim
/// query ordered by `(priority, created_at)` matching [`InMemoryJobQueue`]'s
/// selection rule.
pub struct PostgresJobQueue {
    connection_string: String,
}

impl PostgresJobQueue {
    #[must_use]
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self { connection_string: connection_string.into() }
    }
}

#[async_trait]
impl JobQueue for PostgresJobQueue {
    async fn enqueue(&self, request: EnqueueJobRequest) -> JobQueueResult<CaJob> {
        let _ = (&self.connection_string, request);
        Err(JobQueueError::Storage("postgres store persistence not yet implemented".into()))
    }

    async fn get(&self, id: &JobId) -> JobQueueResult<CaJob> {
        let _ = (&self.connection_string, id);
        Err(JobQueueError::Storage("postgres store persistence not yet implemented".into()))
    }

    async fn list(&self, filter: JobFilter) -> JobQueueResult<Vec<CaJob>> {
        let _ = (&self.connection_string, filter);
        Err(JobQueueError::Storage("postgres store persistence not yet implemented".into()))
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> JobQueueResult<Option<CaJob>> {
        let _ = (&self.connection_string, now);
        Err(JobQueueError::Storage("postgres store persistence not yet implemented".into()))
    }

    async fn reset_stuck_processing(&self, now: DateTime<Utc>) -> JobQueueResult<usize> {
        let _ = (&self.connection_string, now);
        Err(JobQueueError::Storage("postgres store persistence not yet implemented".into()))
    }

    async fn apply_outcome(&self, id: &JobId, outcome: ExecutionOutcome, now: DateTime<Utc>) -> JobQueueResult<CaJob> {
        let _ = (&self.connection_string, id, outcome, now);
        Err(JobQueueError::Storage("postgres store persistence not yet implemented".into()))
    }

    async fn group_status(&self, group_id: &str) -> JobQueueResult<GroupStatus> {
        let _ = (&self.connection_string, group_id);
        Err(JobQueueError::Storage("postgres store persistence not yet implemented".into()))
    }

    async fn retry_dead(&self, id: &JobId) -> JobQueueResult<CaJob> {
        let _ = (&self.connection_string, id);
        Err(JobQueueError::Storage("postgres store persistence not yet implemented".into()))
    }

    async fn retry_dead_bulk(&self, filter: JobFilter) -> JobQueueResult<Vec<CaJob>> {
        let _ = (&self.connection_string, filter);
        Err(JobQueueError::Storage("postgres store persistence not yet implemented".into()))
    }
}

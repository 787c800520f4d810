use std::collections::HashMap;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::CaJob;
use crate::EnqueueJobRequest;
use crate::ExecutionOutcome;
use crate::GroupStatus;
use crate::JobFilter;
use crate::JobId;
use crate::JobQueue;
use crate::JobQueueError;
use crate::JobQueueResult;
use crate::JobStatus;
use crate::STUCK_PROCESSING_AFTER_MINUTES;
use crate::backoff_for_attempt;
use crate::group_status_from;

#[derive(Default)]
struct State {
    jobs: HashMap<JobId, CaJob>,
    by_idempotency_key: HashMap<String, JobId>,
}

/// Reference implementation backing tests and the default build; a
/// `postgres-store`-gated implementation owns the real claim-under-
/// conditional-update contract for production use.
#[derive(Default)]
pub struct InMemoryJobQueue {
    state: Mutex<State>,
}

impl InMemoryJobQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, request: EnqueueJobRequest) -> JobQueueResult<CaJob> {
        let mut state = self.state.lock().await;
        if let Some(existing_id) = state.by_idempotency_key.get(&request.idempotency_key) {
            let existing_id = existing_id.clone();
            return Ok(state.jobs[&existing_id].clone());
        }
        let now = Utc::now();
        let key = request.idempotency_key.clone();
        let job = CaJob::new(request, now);
        state.by_idempotency_key.insert(key, job.id.clone());
        state.jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    async fn get(&self, id: &JobId) -> JobQueueResult<CaJob> {
        let state = self.state.lock().await;
        state
            .jobs
            .get(id)
            .cloned()
            .ok_or_else(|| JobQueueError::NotFound(id.clone()))
    }

    async fn list(&self, filter: JobFilter) -> JobQueueResult<Vec<CaJob>> {
        let state = self.state.lock().await;
        let mut jobs: Vec<CaJob> = state.jobs.values().filter(|job| filter.matches(job)).cloned().collect();
        jobs.sort_by(|a, b| (a.priority, a.created_at).cmp(&(b.priority, b.created_at)));
        Ok(jobs)
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> JobQueueResult<Option<CaJob>> {
        let mut state = self.state.lock().await;
        let candidate_id = state
            .jobs
            .values()
            .filter(|job| job.is_ready(now))
            .min_by(|a, b| (a.priority, a.created_at).cmp(&(b.priority, b.created_at)))
            .map(|job| job.id.clone());
        let Some(candidate_id) = candidate_id else {
            return Ok(None);
        };
        let job = state.jobs.get_mut(&candidate_id).ok_or_else(|| JobQueueError::NotFound(candidate_id.clone()))?;
        if !matches!(job.status, JobStatus::Pending | JobStatus::Failed) {
            return Err(JobQueueError::NotClaimable(candidate_id));
        }
        job.status = JobStatus::Processing;
        job.claimed_at = Some(now);
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn reset_stuck_processing(&self, now: DateTime<Utc>) -> JobQueueResult<usize> {
        let mut state = self.state.lock().await;
        let threshold = Duration::minutes(STUCK_PROCESSING_AFTER_MINUTES);
        let mut reset_count = 0;
        for job in state.jobs.values_mut() {
            let stuck = job.status == JobStatus::Processing
                && job.claimed_at.map(|claimed_at| now - claimed_at > threshold).unwrap_or(false);
            if stuck {
                job.status = JobStatus::Failed;
                job.claimed_at = None;
                job.updated_at = now;
                reset_count += 1;
            }
        }
        Ok(reset_count)
    }

    async fn apply_outcome(
        &self,
        id: &JobId,
        outcome: ExecutionOutcome,
        now: DateTime<Utc>,
    ) -> JobQueueResult<CaJob> {
        let mut state = self.state.lock().await;
        let job = state.jobs.get_mut(id).ok_or_else(|| JobQueueError::NotFound(id.clone()))?;
        match outcome {
            ExecutionOutcome::Success { protocol } => {
                job.status = JobStatus::Completed;
                job.protocol = Some(protocol);
                job.response_status = Some(200);
            }
            ExecutionOutcome::Unauthorized => {
                job.status = JobStatus::Failed;
                job.scheduled_for = now;
                job.response_status = Some(401);
            }
            ExecutionOutcome::RetryableFailure { status, body } => {
                job.attempts += 1;
                job.response_status = status;
                job.response_body = body;
                match backoff_for_attempt(job.attempts) {
                    Some(backoff) => {
                        job.status = JobStatus::Failed;
                        job.next_retry_at = Some(now + backoff);
                        job.scheduled_for = now + backoff;
                    }
                    None => {
                        job.status = JobStatus::Dead;
                        job.next_retry_at = None;
                    }
                }
            }
            ExecutionOutcome::NonRetryableFailure { status, body } => {
                job.status = JobStatus::Dead;
                job.response_status = status;
                job.response_body = body;
            }
        }
        job.claimed_at = None;
        job.updated_at = now;
        Ok(job.clone())
    }

    async fn group_status(&self, group_id: &str) -> JobQueueResult<GroupStatus> {
        let state = self.state.lock().await;
        let jobs: Vec<CaJob> = state.jobs.values().filter(|job| job.group_id == group_id).cloned().collect();
        Ok(group_status_from(&jobs))
    }

    async fn retry_dead(&self, id: &JobId) -> JobQueueResult<CaJob> {
        let mut state = self.state.lock().await;
        let job = state.jobs.get_mut(id).ok_or_else(|| JobQueueError::NotFound(id.clone()))?;
        job.attempts = 0;
        job.status = JobStatus::Pending;
        job.next_retry_at = None;
        job.scheduled_for = Utc::now();
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn retry_dead_bulk(&self, filter: JobFilter) -> JobQueueResult<Vec<CaJob>> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let ids: Vec<JobId> = state
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Dead && filter.matches(job))
            .map(|job| job.id.clone())
            .collect();
        let mut retried = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = state.jobs.get_mut(&id) {
                job.attempts = 0;
                job.status = JobStatus::Pending;
                job.next_retry_at = None;
                job.scheduled_for = now;
                job.updated_at = now;
                retried.push(job.clone());
            }
        }
        Ok(retried)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::priority;
    use pretty_assertions::assert_eq;

    fn request(key: &str, group_id: &str, priority: i32) -> EnqueueJobRequest {
        EnqueueJobRequest {
            idempotency_key: key.into(),
            seller: "acme".into(),
            group_id: group_id.into(),
            kind: "receita".into(),
            endpoint: "/contas-a-receber".into(),
            method: "POST".into(),
            payload: serde_json::json!({"valor_bruto": "100.00"}),
            priority,
            scheduled_for: Utc::now(),
        }
    }

    #[tokio::test]
    async fn enqueue_is_idempotent_on_key() {
        let queue = InMemoryJobQueue::new();
        let first = queue.enqueue(request("acme:111:receita", "111", priority::RECEITA)).await.expect("first");
        let second = queue.enqueue(request("acme:111:receita", "111", priority::RECEITA)).await.expect("second");
        assert_eq!(first.id, second.id);
        assert_eq!(queue.state.lock().await.jobs.len(), 1);
    }

    #[tokio::test]
    async fn claim_next_picks_lowest_priority_first() {
        let queue = InMemoryJobQueue::new();
        queue.enqueue(request("acme:111:frete", "111", priority::DESPESA)).await.expect("enqueue despesa");
        queue.enqueue(request("acme:111:receita", "111", priority::RECEITA)).await.expect("enqueue receita");
        let claimed = queue.claim_next(Utc::now()).await.expect("claim").expect("some job");
        assert_eq!(claimed.kind, "receita");
        assert_eq!(claimed.status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn retryable_failure_follows_backoff_then_dies() {
        let queue = InMemoryJobQueue::new();
        let job = queue.enqueue(request("acme:111:receita", "111", priority::RECEITA)).await.expect("enqueue");
        let mut current = job;
        for _ in 0..3 {
            current = queue
                .apply_outcome(
                    &current.id,
                    ExecutionOutcome::RetryableFailure { status: Some(500), body: None },
                    Utc::now(),
                )
                .await
                .expect("apply outcome");
        }
        assert_eq!(current.status, JobStatus::Dead);
        assert_eq!(current.attempts, 3);
    }

    #[tokio::test]
    async fn reset_stuck_processing_reverts_to_failed() {
        let queue = InMemoryJobQueue::new();
        let job = queue.enqueue(request("acme:111:receita", "111", priority::RECEITA)).await.expect("enqueue");
        let claimed_at = Utc::now() - Duration::minutes(10);
        {
            let mut state = queue.state.lock().await;
            let stored = state.jobs.get_mut(&job.id).expect("job present");
            stored.status = JobStatus::Processing;
            stored.claimed_at = Some(claimed_at);
        }
        let reset_count = queue.reset_stuck_processing(Utc::now()).await.expect("reset");
        assert_eq!(reset_count, 1);
        let refreshed = queue.get(&job.id).await.expect("get");
        assert_eq!(refreshed.status, JobStatus::Failed);
    }
}

//! Job store abstraction and the volatile in-process implementation.

use crate::error::EngineResult;
use crate::job::{Job, JobId, JobState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

/// Persistence contract shared by all store backends.
///
/// All operations are safe to call from multiple workers concurrently. The
/// store is the single serialization point for job mutation: workers never
/// write a job record directly.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job. Sets `updated_at`; never mutates status.
    async fn save(&self, job: &Job) -> EngineResult<()>;

    /// Claim the next due pending job, transitioning it to `Processing`
    /// atomically. Ordering is priority ascending, then creation time
    /// ascending within a tier. Two concurrent callers never both receive
    /// the same job; a lost claim race surfaces as `None`, not an error.
    async fn fetch_next(&self) -> EngineResult<Option<Job>>;

    /// Read a job back by id.
    async fn get(&self, id: JobId) -> EngineResult<Option<Job>>;

    /// Transition a `Processing` job to `Completed`.
    async fn mark_completed(&self, id: JobId) -> EngineResult<()>;

    /// Transition a job to `Failed`, recording the error.
    async fn mark_failed(&self, id: JobId, error: &str) -> EngineResult<()>;

    /// Transition a job back to `Pending` with a new due time and attempt
    /// count.
    async fn mark_retry(
        &self,
        id: JobId,
        next_attempt_at: DateTime<Utc>,
        attempts: u32,
    ) -> EngineResult<()>;
}

/// Volatile in-process store for when durability is not needed.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs held, in any state.
    pub fn len(&self) -> usize {
        self.jobs.read().unwrap().len()
    }

    /// Whether the store holds no jobs.
    pub fn is_empty(&self) -> bool {
        self.jobs.read().unwrap().is_empty()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn save(&self, job: &Job) -> EngineResult<()> {
        let mut jobs = self.jobs.write().unwrap();
        let mut job = job.clone();
        job.updated_at = Utc::now();
        jobs.insert(job.id, job);
        Ok(())
    }

    async fn fetch_next(&self) -> EngineResult<Option<Job>> {
        let mut jobs = self.jobs.write().unwrap();
        let now = Utc::now();

        // Claim happens under the same write lock as the scan, so at most
        // one caller can see any given job as pending.
        let next = jobs
            .values()
            .filter(|j| {
                j.status == JobState::Pending && j.scheduled_at.map_or(true, |at| at <= now)
            })
            .min_by_key(|j| (j.priority, j.created_at, j.id))
            .map(|j| j.id);

        if let Some(id) = next
            && let Some(job) = jobs.get_mut(&id)
        {
            job.status = JobState::Processing;
            job.updated_at = now;
            return Ok(Some(job.clone()));
        }

        Ok(None)
    }

    async fn get(&self, id: JobId) -> EngineResult<Option<Job>> {
        Ok(self.jobs.read().unwrap().get(&id).cloned())
    }

    async fn mark_completed(&self, id: JobId) -> EngineResult<()> {
        let mut jobs = self.jobs.write().unwrap();
        if let Some(job) = jobs.get_mut(&id)
            && !job.status.is_terminal()
        {
            job.status = JobState::Completed;
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_failed(&self, id: JobId, error: &str) -> EngineResult<()> {
        let mut jobs = self.jobs.write().unwrap();
        if let Some(job) = jobs.get_mut(&id)
            && !job.status.is_terminal()
        {
            job.status = JobState::Failed;
            job.last_error = Some(error.to_string());
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_retry(
        &self,
        id: JobId,
        next_attempt_at: DateTime<Utc>,
        attempts: u32,
    ) -> EngineResult<()> {
        let mut jobs = self.jobs.write().unwrap();
        if let Some(job) = jobs.get_mut(&id)
            && !job.status.is_terminal()
        {
            job.status = JobState::Pending;
            job.scheduled_at = Some(next_attempt_at);
            job.attempts = attempts;
            job.updated_at = Utc::now();
        }
        Ok(())
    }
}

//! Polymorphic due-job backend: durable store or volatile queue.
//!
//! Selected once at engine construction so the worker loop and dispatcher
//! never branch on a nullable store.

use crate::error::EngineResult;
use crate::job::Job;
use crate::queue::InMemoryQueue;
use crate::store::JobStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Where due jobs come from and where outcomes go back to.
#[derive(Clone)]
pub enum JobSource {
    /// Durable, pollable store with a `Processing` claim state.
    Store(Arc<dyn JobStore>),
    /// Volatile signal-driven queue; best-effort delivery, no claim state.
    Queue(Arc<InMemoryQueue>),
}

impl JobSource {
    /// Route a new job into the backend.
    ///
    /// A store keeps its own due-time filter, so scheduled jobs are saved
    /// as-is. The queue has none; a not-yet-due job is held back by a
    /// cancellable deferred enqueue instead.
    pub(crate) async fn submit(&self, job: Job, cancel: &CancellationToken) -> EngineResult<()> {
        match self {
            JobSource::Store(store) => store.save(&job).await,
            JobSource::Queue(queue) => {
                match job.scheduled_at {
                    Some(at) if at > Utc::now() => {
                        defer_enqueue(queue.clone(), job, at, cancel.clone());
                    }
                    _ => queue.enqueue(job),
                }
                Ok(())
            }
        }
    }

    /// Fetch one due job, or wait out one idle period.
    ///
    /// Store mode polls: a miss sleeps for `poll_interval` (or until
    /// cancellation) and reports `None` so the caller can re-check shutdown.
    /// Queue mode blocks on the wake-up signal.
    pub(crate) async fn next_due(
        &self,
        poll_interval: Duration,
        cancel: &CancellationToken,
    ) -> EngineResult<Option<Job>> {
        match self {
            JobSource::Store(store) => {
                if let Some(job) = store.fetch_next().await? {
                    return Ok(Some(job));
                }
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(poll_interval) => {}
                }
                Ok(None)
            }
            JobSource::Queue(queue) => Ok(queue.dequeue(cancel).await),
        }
    }

    /// Record a successful outcome.
    pub(crate) async fn complete(&self, job: &Job) -> EngineResult<()> {
        match self {
            JobSource::Store(store) => store.mark_completed(job.id).await,
            // Nothing to record: the queue never held a claim.
            JobSource::Queue(_) => Ok(()),
        }
    }

    /// Record a terminal failure.
    pub(crate) async fn fail(&self, job: &Job, error: &str) -> EngineResult<()> {
        match self {
            JobSource::Store(store) => store.mark_failed(job.id, error).await,
            JobSource::Queue(_) => {
                warn!(id = %job.id, handler = %job.handler, error,
                    "dropping terminally failed job; volatile backend keeps no record");
                Ok(())
            }
        }
    }

    /// Hand a failed job back for another attempt at `next_attempt_at`.
    /// `job.attempts` must already reflect the attempt that failed.
    pub(crate) async fn retry(
        &self,
        mut job: Job,
        next_attempt_at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> EngineResult<()> {
        match self {
            JobSource::Store(store) => {
                store.mark_retry(job.id, next_attempt_at, job.attempts).await
            }
            JobSource::Queue(queue) => {
                job.status = crate::job::JobState::Pending;
                job.scheduled_at = Some(next_attempt_at);
                job.updated_at = Utc::now();
                defer_enqueue(queue.clone(), job, next_attempt_at, cancel.clone());
                Ok(())
            }
        }
    }

    /// Put back a job that was fetched before its due time (queue-mode race).
    pub(crate) async fn resubmit(&self, job: Job, cancel: &CancellationToken) -> EngineResult<()> {
        let due = job.scheduled_at.unwrap_or_else(Utc::now);
        match self {
            JobSource::Store(store) => store.mark_retry(job.id, due, job.attempts).await,
            JobSource::Queue(queue) => {
                defer_enqueue(queue.clone(), job, due, cancel.clone());
                Ok(())
            }
        }
    }

    /// Return an in-flight job to a resumable state during shutdown, without
    /// touching its attempt count.
    pub(crate) async fn restore(&self, job: Job) -> EngineResult<()> {
        match self {
            JobSource::Store(store) => {
                let due = job.scheduled_at.unwrap_or_else(Utc::now);
                store.mark_retry(job.id, due, job.attempts).await
            }
            JobSource::Queue(queue) => {
                queue.enqueue(job);
                Ok(())
            }
        }
    }
}

/// Enqueue `job` once `due` arrives, unless shutdown cancels the wait first.
fn defer_enqueue(queue: Arc<InMemoryQueue>, job: Job, due: DateTime<Utc>, cancel: CancellationToken) {
    tokio::spawn(async move {
        let wait = (due - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(id = %job.id, "deferred enqueue dropped by shutdown");
            }
            _ = tokio::time::sleep(wait) => queue.enqueue(job),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobState;
    use crate::store::InMemoryJobStore;

    #[tokio::test]
    async fn test_store_submit_and_next_due() {
        let store = Arc::new(InMemoryJobStore::new());
        let source = JobSource::Store(store.clone());
        let cancel = CancellationToken::new();

        let job = Job::new("task", None);
        source.submit(job.clone(), &cancel).await.unwrap();

        let fetched = source
            .next_due(Duration::from_millis(10), &cancel)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.id, job.id);
        assert_eq!(fetched.status, JobState::Processing);
    }

    #[tokio::test]
    async fn test_store_miss_waits_one_poll() {
        let source = JobSource::Store(Arc::new(InMemoryJobStore::new()));
        let cancel = CancellationToken::new();

        let started = std::time::Instant::now();
        let fetched = source
            .next_due(Duration::from_millis(30), &cancel)
            .await
            .unwrap();
        assert!(fetched.is_none());
        assert!(started.elapsed() >= Duration::from_millis(25));
    }

    #[tokio::test]
    async fn test_queue_deferred_submit() {
        let queue = Arc::new(InMemoryQueue::new());
        let source = JobSource::Queue(queue.clone());
        let cancel = CancellationToken::new();

        let job = Job::new("task", None).schedule_after(Duration::from_millis(60));
        source.submit(job, &cancel).await.unwrap();

        assert!(queue.is_empty());
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_queue_deferred_submit_cancelled_by_shutdown() {
        let queue = Arc::new(InMemoryQueue::new());
        let source = JobSource::Queue(queue.clone());
        let cancel = CancellationToken::new();

        let job = Job::new("task", None).schedule_after(Duration::from_millis(60));
        source.submit(job, &cancel).await.unwrap();
        cancel.cancel();

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_restore_requeues_unchanged() {
        let queue = Arc::new(InMemoryQueue::new());
        let source = JobSource::Queue(queue.clone());

        let mut job = Job::new("task", None);
        job.attempts = 2;
        source.restore(job.clone()).await.unwrap();

        let restored = queue.dequeue(&CancellationToken::new()).await.unwrap();
        assert_eq!(restored.attempts, 2);
        assert_eq!(restored.id, job.id);
    }

    #[tokio::test]
    async fn test_store_retry_updates_schedule_and_attempts() {
        let store = Arc::new(InMemoryJobStore::new());
        let source = JobSource::Store(store.clone());
        let cancel = CancellationToken::new();

        let job = Job::new("task", None);
        source.submit(job.clone(), &cancel).await.unwrap();
        let mut claimed = source
            .next_due(Duration::from_millis(10), &cancel)
            .await
            .unwrap()
            .unwrap();

        claimed.attempts += 1;
        let at = Utc::now() + chrono::Duration::hours(1);
        source.retry(claimed, at, &cancel).await.unwrap();

        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobState::Pending);
        assert_eq!(stored.attempts, 1);
        assert_eq!(stored.scheduled_at, Some(at));
    }
}

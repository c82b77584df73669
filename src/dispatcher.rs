//! Producer-side API: accept new work and route it to the backend.

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::job::{Job, JobId, JobPriority};
use crate::source::JobSource;
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Per-dispatch overrides.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchOptions {
    /// Priority tier (defaults to `Normal`)
    pub priority: JobPriority,
    /// Retry budget; `None` takes the engine default. A budget of zero fails
    /// the job on its first claim without invoking the handler.
    pub max_attempts: Option<u32>,
}

/// Accepts units of deferred work. Cheap to clone; every clone routes into
/// the same backend.
#[derive(Clone)]
pub struct Dispatcher {
    source: JobSource,
    config: EngineConfig,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub(crate) fn new(source: JobSource, config: EngineConfig, cancel: CancellationToken) -> Self {
        Self {
            source,
            config,
            cancel,
        }
    }

    /// Enqueue a job due immediately. Returns the new job's id without
    /// waiting for processing.
    pub async fn enqueue<P: Serialize>(&self, handler: &str, payload: &P) -> EngineResult<JobId> {
        self.enqueue_opts(handler, payload, DispatchOptions::default())
            .await
    }

    /// Enqueue with explicit priority or retry budget.
    pub async fn enqueue_opts<P: Serialize>(
        &self,
        handler: &str,
        payload: &P,
        opts: DispatchOptions,
    ) -> EngineResult<JobId> {
        let job = self.build_job(handler, payload, opts)?;
        self.enqueue_job(job).await
    }

    /// Enqueue a fully built job record.
    pub async fn enqueue_job(&self, job: Job) -> EngineResult<JobId> {
        let id = job.id;
        debug!(id = %id, handler = %job.handler, "dispatching job");
        self.source.submit(job, &self.cancel).await?;
        Ok(id)
    }

    /// Enqueue a job that becomes due after `delay`.
    ///
    /// With a durable store the due-time filter in `fetch_next` handles the
    /// delay; with the volatile queue the backend defers the enqueue itself,
    /// cancellable by engine shutdown.
    pub async fn schedule<P: Serialize>(
        &self,
        handler: &str,
        payload: &P,
        delay: Duration,
    ) -> EngineResult<JobId> {
        self.schedule_opts(handler, payload, delay, DispatchOptions::default())
            .await
    }

    /// Schedule with explicit priority or retry budget.
    pub async fn schedule_opts<P: Serialize>(
        &self,
        handler: &str,
        payload: &P,
        delay: Duration,
        opts: DispatchOptions,
    ) -> EngineResult<JobId> {
        let job = self.build_job(handler, payload, opts)?.schedule_after(delay);
        self.enqueue_job(job).await
    }

    fn build_job<P: Serialize>(
        &self,
        handler: &str,
        payload: &P,
        opts: DispatchOptions,
    ) -> EngineResult<Job> {
        let payload = serde_json::to_string(payload)
            .map_err(|e| EngineError::Serialization(e.to_string()))?;
        Ok(Job::new(handler, Some(payload))
            .with_priority(opts.priority)
            .with_max_attempts(
                opts.max_attempts
                    .unwrap_or(self.config.default_max_attempts),
            ))
    }
}

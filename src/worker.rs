//! Worker pool: fixed-size set of loops that claim due jobs, invoke their
//! handlers, and apply retry/backoff or terminal outcomes.

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::job::Job;
use crate::registry::HandlerRegistry;
use crate::source::JobSource;
use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

#[derive(Debug, PartialEq, Eq)]
enum LoopControl {
    Continue,
    Shutdown,
}

/// Consumer-side engine: N independently scheduled loops sharing one backend.
///
/// Concurrency is bounded by the loop count, not by a task-per-job spawn
/// model. Shutdown is graceful: each loop finishes its in-flight invocation,
/// returns the job to a resumable state if it failed, and exits.
pub struct WorkerPool {
    source: JobSource,
    registry: Arc<HandlerRegistry>,
    config: EngineConfig,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Create a pool; no loops run until [`start`](Self::start).
    pub fn new(
        source: JobSource,
        registry: Arc<HandlerRegistry>,
        config: EngineConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            registry,
            config,
            cancel,
            handles: Vec::new(),
        }
    }

    /// Spawn the configured number of worker loops.
    ///
    /// The pool is single-use: once [`shutdown`](Self::shutdown) has fired
    /// the cancellation token, a restart is rejected.
    pub fn start(&mut self) -> EngineResult<()> {
        if !self.handles.is_empty() {
            return Err(EngineError::WorkerAlreadyRunning);
        }
        if self.cancel.is_cancelled() {
            return Err(EngineError::WorkerStopped);
        }

        info!(workers = self.config.worker_count, "starting worker pool");
        for worker in 0..self.config.worker_count {
            let source = self.source.clone();
            let registry = self.registry.clone();
            let config = self.config;
            let cancel = self.cancel.clone();

            self.handles.push(tokio::spawn(async move {
                run_worker(worker, source, registry, config, cancel).await;
            }));
        }
        Ok(())
    }

    /// Cancel all loops and wait for them to drain their in-flight jobs.
    pub async fn shutdown(&mut self) -> EngineResult<()> {
        if self.handles.is_empty() {
            return Err(EngineError::WorkerNotRunning);
        }

        info!("stopping worker pool");
        self.cancel.cancel();
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
        info!("worker pool stopped");
        Ok(())
    }

    /// Whether worker loops are currently running.
    pub fn is_running(&self) -> bool {
        !self.handles.is_empty()
    }
}

async fn run_worker(
    worker: usize,
    source: JobSource,
    registry: Arc<HandlerRegistry>,
    config: EngineConfig,
    cancel: CancellationToken,
) {
    debug!(worker, "worker loop started");

    while !cancel.is_cancelled() {
        let job = match source.next_due(config.poll_interval, &cancel).await {
            Ok(Some(job)) => job,
            Ok(None) => continue,
            Err(e) => {
                // A store that keeps failing shows up here as repeated
                // failed polls rather than a propagated error.
                warn!(worker, error = %e, "failed to poll for jobs");
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(config.poll_interval) => {}
                }
                continue;
            }
        };

        if process(worker, job, &source, &registry, &config, &cancel).await
            == LoopControl::Shutdown
        {
            break;
        }
    }

    debug!(worker, "worker loop stopped");
}

async fn process(
    worker: usize,
    job: Job,
    source: &JobSource,
    registry: &HandlerRegistry,
    config: &EngineConfig,
    cancel: &CancellationToken,
) -> LoopControl {
    // Queue mode has no due-time filter, so a scheduled job can surface
    // early; hand it back without processing.
    if let Some(at) = job.scheduled_at
        && at > Utc::now()
    {
        debug!(worker, id = %job.id, "job not yet due, resubmitting");
        if let Err(e) = source.resubmit(job, cancel).await {
            warn!(worker, error = %e, "failed to resubmit job");
        }
        return LoopControl::Continue;
    }

    // An exhausted budget (including a zero budget at dispatch) fails the
    // job without invoking its handler.
    if job.attempts >= job.max_attempts {
        let error = "no attempts remaining";
        warn!(worker, id = %job.id, attempts = job.attempts, error, "job failed");
        if let Err(e) = source.fail(&job, error).await {
            warn!(worker, error = %e, "failed to record job failure");
        }
        return LoopControl::Continue;
    }

    let span = info_span!("job", worker, id = %job.id, handler = %job.handler);
    async move {
        let Some(handler) = registry.get(&job.handler) else {
            // Terminal: a missing handler will not appear on retry.
            let error = format!("no handler registered for '{}'", job.handler);
            warn!(%error, "job failed");
            if let Err(e) = source.fail(&job, &error).await {
                warn!(error = %e, "failed to record job failure");
            }
            return LoopControl::Continue;
        };

        debug!(attempt = job.attempts + 1, "invoking handler");
        let outcome = handler
            .call(job.payload.as_deref(), cancel.child_token())
            .await;

        match outcome {
            Ok(result) if result.success => {
                debug!("job completed");
                if let Err(e) = source.complete(&job).await {
                    warn!(error = %e, "failed to record job completion");
                }
                LoopControl::Continue
            }
            Ok(result) => {
                let error = result.error.unwrap_or_else(|| "job failed".to_string());
                after_failure(job, result.retry, error, source, config, cancel).await
            }
            // Unexpected invocation failures (deserialization included) are
            // retryable with the same backoff schedule.
            Err(e) => after_failure(job, true, e.to_string(), source, config, cancel).await,
        }
    }
    .instrument(span)
    .await
}

async fn after_failure(
    mut job: Job,
    retryable: bool,
    error: String,
    source: &JobSource,
    config: &EngineConfig,
    cancel: &CancellationToken,
) -> LoopControl {
    if cancel.is_cancelled() {
        // Teardown mid-flight: hand the job back untouched and exit.
        debug!("shutdown during invocation, restoring job");
        if let Err(e) = source.restore(job).await {
            warn!(error = %e, "failed to restore job during shutdown");
        }
        return LoopControl::Shutdown;
    }

    job.attempts += 1;

    if retryable && job.attempts < job.max_attempts {
        let delay = job.backoff_delay(config.max_backoff);
        let next_attempt_at = Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64);
        info!(
            attempt = job.attempts,
            delay_ms = delay.as_millis() as u64,
            %error,
            "scheduling retry"
        );
        if let Err(e) = source.retry(job, next_attempt_at, cancel).await {
            warn!(error = %e, "failed to schedule retry");
        }
    } else {
        info!(attempts = job.attempts, %error, "job failed terminally");
        if let Err(e) = source.fail(&job, &error).await {
            warn!(error = %e, "failed to record job failure");
        }
    }

    LoopControl::Continue
}

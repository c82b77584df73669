//! Engine wiring: one owned instance per process group instead of
//! process-wide singletons, so tests can run isolated engines side by side.

use crate::config::EngineConfig;
use crate::dispatcher::Dispatcher;
use crate::error::EngineResult;
use crate::queue::InMemoryQueue;
use crate::registry::HandlerRegistry;
use crate::source::JobSource;
use crate::store::JobStore;
use crate::worker::WorkerPool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Owns the backend, the handler registry, and the worker pool for one job
/// processing engine.
pub struct Engine {
    config: EngineConfig,
    registry: Arc<HandlerRegistry>,
    source: JobSource,
    cancel: CancellationToken,
    pool: WorkerPool,
}

impl Engine {
    /// Engine backed by a durable job store.
    pub fn with_store(store: Arc<dyn JobStore>, config: EngineConfig) -> Self {
        Self::from_source(JobSource::Store(store), config)
    }

    /// Engine backed by the volatile in-memory queue: lower latency, no
    /// polling delay, no durability.
    pub fn volatile(config: EngineConfig) -> Self {
        Self::from_source(JobSource::Queue(Arc::new(InMemoryQueue::new())), config)
    }

    fn from_source(source: JobSource, config: EngineConfig) -> Self {
        let registry = Arc::new(HandlerRegistry::new());
        let cancel = CancellationToken::new();
        let pool = WorkerPool::new(source.clone(), registry.clone(), config, cancel.clone());
        Self {
            config,
            registry,
            source,
            cancel,
            pool,
        }
    }

    /// Handler registry; register handlers before (or concurrently with)
    /// starting the workers.
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Producer handle routing into this engine's backend.
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.source.clone(), self.config, self.cancel.clone())
    }

    /// Token cancelled when this engine shuts down.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Start the worker loops. An engine is single-use: starting again after
    /// [`shutdown`](Self::shutdown) is rejected.
    pub fn start(&mut self) -> EngineResult<()> {
        info!(workers = self.config.worker_count, "starting engine");
        self.pool.start()
    }

    /// Signal shutdown and wait for every worker to drain its in-flight job.
    /// Pending deferred enqueues are dropped rather than leaked.
    pub async fn shutdown(&mut self) -> EngineResult<()> {
        self.pool.shutdown().await
    }

    /// Whether worker loops are running.
    pub fn is_running(&self) -> bool {
        self.pool.is_running()
    }
}

//! Engine configuration.

use crate::job::DEFAULT_MAX_ATTEMPTS;
use std::time::Duration;

/// Engine-wide configuration, immutable after startup.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Number of concurrent worker loops
    pub worker_count: usize,

    /// Retry budget applied to jobs that do not set their own
    pub default_max_attempts: u32,

    /// Poll interval between store fetches when no job is due
    pub poll_interval: Duration,

    /// Upper bound on the exponential retry backoff
    pub max_backoff: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
            poll_interval: Duration::from_secs(1),
            max_backoff: Duration::from_secs(3600),
        }
    }
}

impl EngineConfig {
    /// Set the worker count.
    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Set the default retry budget.
    pub fn with_default_max_attempts(mut self, max_attempts: u32) -> Self {
        self.default_max_attempts = max_attempts;
        self
    }

    /// Set the store poll interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Set the backoff ceiling.
    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }
}

//! Job definition and state management.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Job unique identifier.
pub type JobId = Uuid;

/// Default retry budget when none is given at dispatch time.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Job priority levels. Lower values are served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum JobPriority {
    /// Highest priority
    Critical = 0,
    /// High priority
    High = 1,
    /// Normal priority (default)
    #[default]
    Normal = 2,
    /// Lowest priority
    Low = 3,
}

impl JobPriority {
    /// Reconstruct a priority from its stored numeric value.
    pub fn from_repr(value: i64) -> Option<Self> {
        match value {
            0 => Some(JobPriority::Critical),
            1 => Some(JobPriority::High),
            2 => Some(JobPriority::Normal),
            3 => Some(JobPriority::Low),
            _ => None,
        }
    }
}

/// Job lifecycle state.
///
/// `Pending` is both the initial state and the state re-entered after a
/// retryable failure. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// Job is waiting to be processed
    Pending,
    /// Job is currently held by a worker
    Processing,
    /// Job completed successfully
    Completed,
    /// Job failed permanently
    Failed,
}

impl JobState {
    /// Stable string form used by the durable store.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    /// Parse the stored string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobState::Pending),
            "processing" => Some(JobState::Processing),
            "completed" => Some(JobState::Completed),
            "failed" => Some(JobState::Failed),
            _ => None,
        }
    }

    /// Whether the state admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// Outcome a handler reports for one invocation.
///
/// The `retry` flag is only meaningful when `success` is false.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    /// Whether the invocation succeeded
    pub success: bool,
    /// Whether a failure should be retried
    pub retry: bool,
    /// Error message (if failed)
    pub error: Option<String>,
}

impl JobResult {
    /// Successful invocation.
    pub fn ok() -> Self {
        Self {
            success: true,
            retry: false,
            error: None,
        }
    }

    /// Failed invocation that should be retried with backoff.
    pub fn retryable(error: impl Into<String>) -> Self {
        Self {
            success: false,
            retry: true,
            error: Some(error.into()),
        }
    }

    /// Failed invocation that must not be retried.
    pub fn fatal(error: impl Into<String>) -> Self {
        Self {
            success: false,
            retry: false,
            error: Some(error.into()),
        }
    }
}

/// One unit of deferred work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier
    pub id: JobId,

    /// Handler name resolved through the registry
    pub handler: String,

    /// Serialized payload (JSON text)
    pub payload: Option<String>,

    /// Job priority
    pub priority: JobPriority,

    /// Lifecycle state
    pub status: JobState,

    /// Number of attempts performed so far
    pub attempts: u32,

    /// Maximum number of attempts before the job fails terminally
    pub max_attempts: u32,

    /// When the job becomes due (absent means due immediately)
    pub scheduled_at: Option<DateTime<Utc>>,

    /// When the job was created
    pub created_at: DateTime<Utc>,

    /// When the job was last mutated
    pub updated_at: DateTime<Utc>,

    /// Error recorded by the most recent failure
    pub last_error: Option<String>,
}

impl Job {
    /// Create a new pending job.
    pub fn new(handler: impl Into<String>, payload: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            handler: handler.into(),
            payload,
            priority: JobPriority::default(),
            status: JobState::Pending,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            scheduled_at: None,
            created_at: now,
            updated_at: now,
            last_error: None,
        }
    }

    /// Set job priority.
    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the retry budget.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Schedule the job for a specific time.
    pub fn schedule_at(mut self, time: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(time);
        self
    }

    /// Schedule the job after a delay.
    pub fn schedule_after(self, delay: Duration) -> Self {
        let delay = chrono::Duration::milliseconds(delay.as_millis() as i64);
        self.schedule_at(Utc::now() + delay)
    }

    /// Check whether the job is due for dispatch.
    pub fn is_due(&self) -> bool {
        match self.scheduled_at {
            Some(at) => at <= Utc::now(),
            None => true,
        }
    }

    /// Backoff delay before the next attempt: `2^min(attempts, 10)` seconds,
    /// capped at `ceiling`.
    pub fn backoff_delay(&self, ceiling: Duration) -> Duration {
        let exp = self.attempts.min(10);
        Duration::from_secs(2u64.saturating_pow(exp)).min(ceiling)
    }
}

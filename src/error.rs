//! Error types for the job engine.

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine-specific errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Payload serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Payload deserialization error
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Job store error
    #[error("storage error: {0}")]
    Storage(String),

    /// Database error from the durable store
    #[cfg(feature = "sqlite")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Worker pool already running
    #[error("worker pool already running")]
    WorkerAlreadyRunning,

    /// Worker pool not running
    #[error("worker pool not running")]
    WorkerNotRunning,

    /// Worker pool was shut down and cannot be restarted
    #[error("worker pool already shut down")]
    WorkerStopped,
}

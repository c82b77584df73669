//! Background job processing engine with pluggable persistence.
//!
//! Conveyor accepts units of deferred work, holds them until due, and
//! distributes them across a fixed-size worker pool with:
//! - Pluggable persistence: durable SQLite store or volatile in-process
//!   backends
//! - Atomic claiming: at most one worker holds a job at a time
//! - Automatic retries with exponential backoff
//! - Job priorities with FIFO ordering within a tier
//! - Delayed/scheduled jobs
//! - Graceful, cancellation-aware shutdown
//!
//! ## Quick Start - Job Records
//!
//! ```
//! use conveyor::{Job, JobPriority};
//!
//! let job = Job::new("send_email", Some(r#"{"to":"user@example.com"}"#.into()))
//!     .with_priority(JobPriority::High)
//!     .with_max_attempts(5);
//!
//! assert_eq!(job.handler, "send_email");
//! assert_eq!(job.priority, JobPriority::High);
//! assert!(job.is_due());
//! ```
//!
//! ## Priorities
//!
//! Lower values are served first; jobs at the same priority are served in
//! creation order.
//!
//! ```
//! use conveyor::JobPriority;
//!
//! assert!(JobPriority::Critical < JobPriority::Normal);
//! assert!(JobPriority::Normal < JobPriority::Low);
//! ```
//!
//! ## Engine Configuration
//!
//! ```
//! use conveyor::EngineConfig;
//! use std::time::Duration;
//!
//! let config = EngineConfig::default()
//!     .with_worker_count(8)
//!     .with_poll_interval(Duration::from_millis(500))
//!     .with_max_backoff(Duration::from_secs(600));
//!
//! assert_eq!(config.worker_count, 8);
//! ```
//!
//! ## Complete Example
//!
//! ```no_run
//! use async_trait::async_trait;
//! use conveyor::prelude::*;
//! use serde::Deserialize;
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Deserialize)]
//! struct Email {
//!     to: String,
//! }
//!
//! struct SendEmail;
//!
//! #[async_trait]
//! impl JobHandler for SendEmail {
//!     type Payload = Email;
//!
//!     async fn handle(&self, payload: Email, _cancel: CancellationToken) -> JobResult {
//!         println!("sending email to {}", payload.to);
//!         JobResult::ok()
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), EngineError> {
//!     let mut engine = Engine::volatile(EngineConfig::default());
//!     engine.registry().register("send_email", SendEmail);
//!
//!     let dispatcher = engine.dispatcher();
//!     engine.start()?;
//!
//!     dispatcher
//!         .enqueue("send_email", &serde_json::json!({"to": "user@example.com"}))
//!         .await?;
//!
//!     engine.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! For durability, open a [`SqliteJobStore`](sqlite::SqliteJobStore) and
//! build the engine with [`Engine::with_store`]; scheduled jobs then survive
//! restarts and due times are enforced by the store itself.

pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod job;
pub mod queue;
pub mod registry;
pub mod source;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod store;
pub mod worker;

pub use config::EngineConfig;
pub use dispatcher::{DispatchOptions, Dispatcher};
pub use engine::Engine;
pub use error::{EngineError, EngineResult};
pub use job::{Job, JobId, JobPriority, JobResult, JobState};
pub use queue::InMemoryQueue;
pub use registry::{HandlerRegistry, JobHandler};
pub use source::JobSource;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteJobStore;
pub use store::{InMemoryJobStore, JobStore};
pub use worker::WorkerPool;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::dispatcher::{DispatchOptions, Dispatcher};
    pub use crate::engine::Engine;
    pub use crate::error::{EngineError, EngineResult};
    pub use crate::job::{Job, JobId, JobPriority, JobResult, JobState};
    pub use crate::registry::{HandlerRegistry, JobHandler};
    #[cfg(feature = "sqlite")]
    pub use crate::sqlite::SqliteJobStore;
    pub use crate::store::{InMemoryJobStore, JobStore};
}

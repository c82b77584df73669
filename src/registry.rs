//! Handler registration and lookup.

use crate::error::{EngineError, EngineResult};
use crate::job::JobResult;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A registered capability that performs the work for one handler name.
///
/// The payload type is fixed at registration time; the registry deserializes
/// the job's stored payload into it before invoking the handler. An absent
/// payload deserializes from JSON `null`.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    /// Deserialized payload shape this handler expects.
    type Payload: DeserializeOwned + Send;

    /// Perform the work. The token is cancelled when the engine shuts down;
    /// long-running handlers should observe it.
    async fn handle(&self, payload: Self::Payload, cancel: CancellationToken) -> JobResult;
}

/// Object-safe adapter over a typed [`JobHandler`].
#[async_trait]
pub(crate) trait ErasedHandler: Send + Sync {
    async fn call(
        &self,
        payload: Option<&str>,
        cancel: CancellationToken,
    ) -> EngineResult<JobResult>;
}

struct TypedHandler<H>(H);

#[async_trait]
impl<H: JobHandler> ErasedHandler for TypedHandler<H> {
    async fn call(
        &self,
        payload: Option<&str>,
        cancel: CancellationToken,
    ) -> EngineResult<JobResult> {
        let payload: H::Payload = serde_json::from_str(payload.unwrap_or("null"))
            .map_err(|e| EngineError::Deserialization(e.to_string()))?;
        Ok(self.0.handle(payload, cancel).await)
    }
}

/// Mapping from handler name to handler capability.
///
/// Read-mostly after startup; backed by a concurrent map so registration may
/// race with lookups during multi-threaded initialization.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, Arc<dyn ErasedHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under a unique name.
    ///
    /// # Panics
    ///
    /// Panics if `name` is empty; that is a programmer error, not a runtime
    /// condition.
    pub fn register<H: JobHandler>(&self, name: impl Into<String>, handler: H) {
        let name = name.into();
        assert!(!name.is_empty(), "handler name must not be empty");
        self.handlers.insert(name, Arc::new(TypedHandler(handler)));
    }

    /// Look up a handler. A miss is an expected runtime outcome (unregistered
    /// or mistyped handler name), not an error.
    pub(crate) fn get(&self, name: &str) -> Option<Arc<dyn ErasedHandler>> {
        self.handlers.get(name).map(|entry| entry.value().clone())
    }

    /// Whether a handler is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

//! End-to-end tests for the job engine.

use async_trait::async_trait;
use conveyor::prelude::*;
use serde::Deserialize;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Log engine activity when `RUST_LOG` is set; later calls are no-ops.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn fast_config() -> EngineConfig {
    init_tracing();
    EngineConfig::default()
        .with_worker_count(1)
        .with_poll_interval(Duration::from_millis(20))
        .with_max_backoff(Duration::from_millis(50))
}

async fn wait_for_status(
    store: &Arc<InMemoryJobStore>,
    id: JobId,
    status: JobState,
    timeout: Duration,
) -> Job {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(job) = store.get(id).await.unwrap()
            && job.status == status
        {
            return job;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("job {id} did not reach {status:?} within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_for_count(counter: &AtomicU32, expected: u32, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    while counter.load(Ordering::SeqCst) < expected {
        if tokio::time::Instant::now() >= deadline {
            panic!(
                "counter reached {} of {expected} within {timeout:?}",
                counter.load(Ordering::SeqCst)
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

struct Counting(Arc<AtomicU32>);

#[async_trait]
impl JobHandler for Counting {
    type Payload = serde_json::Value;

    async fn handle(&self, _p: serde_json::Value, _c: CancellationToken) -> JobResult {
        self.0.fetch_add(1, Ordering::SeqCst);
        JobResult::ok()
    }
}

struct AlwaysBoom(Arc<AtomicU32>);

#[async_trait]
impl JobHandler for AlwaysBoom {
    type Payload = serde_json::Value;

    async fn handle(&self, _p: serde_json::Value, _c: CancellationToken) -> JobResult {
        self.0.fetch_add(1, Ordering::SeqCst);
        JobResult::retryable("boom")
    }
}

#[derive(Deserialize)]
struct Tag {
    name: String,
}

struct Recorder(Arc<Mutex<Vec<String>>>);

#[async_trait]
impl JobHandler for Recorder {
    type Payload = Tag;

    async fn handle(&self, payload: Tag, _c: CancellationToken) -> JobResult {
        self.0.lock().unwrap().push(payload.name);
        JobResult::ok()
    }
}

/// Scenario A: an unregistered handler name fails terminally without
/// consuming any of the retry budget.
#[tokio::test]
async fn unregistered_handler_fails_terminally() {
    let store = Arc::new(InMemoryJobStore::new());
    let mut engine = Engine::with_store(store.clone(), fast_config());
    let dispatcher = engine.dispatcher();
    engine.start().unwrap();

    let id = dispatcher.enqueue("noop", &()).await.unwrap();

    let job = wait_for_status(&store, id, JobState::Failed, Duration::from_secs(2)).await;
    assert!(job.last_error.as_deref().unwrap().contains("noop"));
    assert_eq!(job.attempts, 0);

    engine.shutdown().await.unwrap();
}

/// Scenario B: a successful handler completes the job in one cycle.
#[tokio::test]
async fn successful_job_completes_once() {
    let store = Arc::new(InMemoryJobStore::new());
    let mut engine = Engine::with_store(store.clone(), fast_config());
    let invocations = Arc::new(AtomicU32::new(0));
    engine.registry().register("count", Counting(invocations.clone()));
    let dispatcher = engine.dispatcher();
    engine.start().unwrap();

    let id = dispatcher.enqueue("count", &serde_json::json!({})).await.unwrap();

    wait_for_status(&store, id, JobState::Completed, Duration::from_secs(2)).await;
    assert_eq!(invocations.load(Ordering::SeqCst), 1);

    engine.shutdown().await.unwrap();
}

/// Scenario C / P4: a handler that always asks for a retry is invoked exactly
/// `max_attempts` times, then the job fails with its error recorded.
#[tokio::test]
async fn retry_budget_is_exact() {
    let store = Arc::new(InMemoryJobStore::new());
    let mut engine = Engine::with_store(store.clone(), fast_config());
    let invocations = Arc::new(AtomicU32::new(0));
    engine.registry().register("boom", AlwaysBoom(invocations.clone()));
    let dispatcher = engine.dispatcher();
    engine.start().unwrap();

    let id = dispatcher
        .enqueue_opts(
            "boom",
            &serde_json::json!({}),
            DispatchOptions {
                max_attempts: Some(3),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let job = wait_for_status(&store, id, JobState::Failed, Duration::from_secs(5)).await;
    assert_eq!(job.last_error.as_deref(), Some("boom"));

    engine.shutdown().await.unwrap();
    assert_eq!(invocations.load(Ordering::SeqCst), 3);
}

/// Scenario D / P1: the lower-priority-value job is dispatched first.
#[tokio::test]
async fn priority_order_is_respected() {
    let mut engine = Engine::volatile(fast_config());
    let seen = Arc::new(Mutex::new(Vec::new()));
    engine.registry().register("record", Recorder(seen.clone()));
    let dispatcher = engine.dispatcher();

    // Enqueue before any worker runs so both wait in the same tier snapshot.
    dispatcher
        .enqueue_opts(
            "record",
            &serde_json::json!({"name": "low"}),
            DispatchOptions {
                priority: JobPriority::Low,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    dispatcher
        .enqueue_opts(
            "record",
            &serde_json::json!({"name": "critical"}),
            DispatchOptions {
                priority: JobPriority::Critical,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    engine.start().unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while seen.lock().unwrap().len() < 2 {
        assert!(tokio::time::Instant::now() < deadline, "jobs not processed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(*seen.lock().unwrap(), vec!["critical", "low"]);

    engine.shutdown().await.unwrap();
}

/// Scenario E / P6: a scheduled job is not claimable before its due time.
#[cfg(feature = "sqlite")]
#[tokio::test]
async fn scheduled_job_respects_delay() {
    let store = Arc::new(SqliteJobStore::connect("sqlite::memory:").await.unwrap());
    let engine = Engine::with_store(store.clone(), fast_config());
    let dispatcher = engine.dispatcher();

    dispatcher
        .schedule("later", &(), Duration::from_secs(2))
        .await
        .unwrap();

    assert!(store.fetch_next().await.unwrap().is_none());

    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert!(store.fetch_next().await.unwrap().is_some());
}

/// P6 in queue mode: the dispatcher's compensating delay holds the job back.
#[tokio::test]
async fn volatile_schedule_defers_dispatch() {
    let mut engine = Engine::volatile(fast_config());
    let invocations = Arc::new(AtomicU32::new(0));
    engine.registry().register("count", Counting(invocations.clone()));
    let dispatcher = engine.dispatcher();
    engine.start().unwrap();

    dispatcher
        .schedule("count", &serde_json::json!({}), Duration::from_millis(200))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(invocations.load(Ordering::SeqCst), 0);

    wait_for_count(&invocations, 1, Duration::from_secs(2)).await;

    engine.shutdown().await.unwrap();
}

/// P3: with several workers racing over one store, every job is delivered
/// exactly once.
#[tokio::test]
async fn concurrent_workers_deliver_each_job_once() {
    let store = Arc::new(InMemoryJobStore::new());
    let mut engine = Engine::with_store(store.clone(), fast_config().with_worker_count(4));
    let invocations = Arc::new(AtomicU32::new(0));
    engine.registry().register("count", Counting(invocations.clone()));
    let dispatcher = engine.dispatcher();
    engine.start().unwrap();

    let mut ids = Vec::new();
    for i in 0..20 {
        ids.push(
            dispatcher
                .enqueue("count", &serde_json::json!({"i": i}))
                .await
                .unwrap(),
        );
    }

    for id in ids {
        wait_for_status(&store, id, JobState::Completed, Duration::from_secs(5)).await;
    }
    engine.shutdown().await.unwrap();
    assert_eq!(invocations.load(Ordering::SeqCst), 20);
}

/// P7: terminal statuses survive later mutation attempts.
#[tokio::test]
async fn terminal_status_is_immutable() {
    let store = Arc::new(InMemoryJobStore::new());
    let mut engine = Engine::with_store(store.clone(), fast_config());
    let invocations = Arc::new(AtomicU32::new(0));
    engine.registry().register("count", Counting(invocations.clone()));
    let dispatcher = engine.dispatcher();
    engine.start().unwrap();

    let id = dispatcher.enqueue("count", &serde_json::json!({})).await.unwrap();
    wait_for_status(&store, id, JobState::Completed, Duration::from_secs(2)).await;
    engine.shutdown().await.unwrap();

    store.mark_failed(id, "too late").await.unwrap();
    store
        .mark_retry(id, chrono::Utc::now(), 9)
        .await
        .unwrap();

    let job = store.get(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobState::Completed);
}

/// Shutdown mid-flight returns the job to `Pending` without burning an
/// attempt, and the worker loop exits.
#[tokio::test]
async fn shutdown_restores_in_flight_job() {
    struct BlockUntilCancelled(Arc<AtomicU32>);

    #[async_trait]
    impl JobHandler for BlockUntilCancelled {
        type Payload = serde_json::Value;

        async fn handle(&self, _p: serde_json::Value, cancel: CancellationToken) -> JobResult {
            self.0.fetch_add(1, Ordering::SeqCst);
            cancel.cancelled().await;
            JobResult::retryable("interrupted by shutdown")
        }
    }

    let store = Arc::new(InMemoryJobStore::new());
    let mut engine = Engine::with_store(store.clone(), fast_config());
    let started = Arc::new(AtomicU32::new(0));
    engine
        .registry()
        .register("block", BlockUntilCancelled(started.clone()));
    let dispatcher = engine.dispatcher();
    engine.start().unwrap();

    let id = dispatcher.enqueue("block", &serde_json::json!({})).await.unwrap();
    wait_for_count(&started, 1, Duration::from_secs(2)).await;

    engine.shutdown().await.unwrap();

    let job = store.get(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobState::Pending);
    assert_eq!(job.attempts, 0);
    assert_eq!(started.load(Ordering::SeqCst), 1);
}

/// A volatile engine processes everything thrown at it while running.
#[tokio::test]
async fn volatile_engine_end_to_end() {
    let mut engine = Engine::volatile(fast_config().with_worker_count(2));
    let invocations = Arc::new(AtomicU32::new(0));
    engine.registry().register("count", Counting(invocations.clone()));
    let dispatcher = engine.dispatcher();
    engine.start().unwrap();

    for i in 0..5 {
        dispatcher
            .enqueue("count", &serde_json::json!({"i": i}))
            .await
            .unwrap();
    }

    wait_for_count(&invocations, 5, Duration::from_secs(2)).await;
    engine.shutdown().await.unwrap();
}

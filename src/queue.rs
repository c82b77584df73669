//! Volatile in-process queue, the low-latency alternative to a job store.
//!
//! Jobs wait in a priority heap guarded by a lock; a separate unbounded
//! signal channel wakes blocked consumers whenever anything is enqueued.
//! There is no `Processing` state in this mode and delivery uniqueness is
//! best-effort: a job handed to a worker is not tracked anywhere else.

use crate::job::Job;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Heap entry: priority first, then enqueue sequence for FIFO within a tier.
struct QueuedJob {
    seq: u64,
    job: Job,
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        // Inverted so the max-heap pops the lowest (priority, seq) pair.
        other
            .job
            .priority
            .cmp(&self.job.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Priority-aware holding area with a wake-up signal.
pub struct InMemoryQueue {
    heap: Mutex<BinaryHeap<QueuedJob>>,
    seq: AtomicU64,
    signal_tx: mpsc::UnboundedSender<()>,
    signal_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<()>>,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
            signal_tx,
            signal_rx: tokio::sync::Mutex::new(signal_rx),
        }
    }

    /// Insert a job and wake one blocked consumer. Never blocks the caller.
    pub fn enqueue(&self, job: Job) {
        trace!(id = %job.id, handler = %job.handler, "enqueueing job");
        let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
        self.heap.lock().unwrap().push(QueuedJob { seq, job });
        // The receiver lives as long as the queue, so this cannot fail.
        let _ = self.signal_tx.send(());
    }

    /// Wait for a wake-up signal, then pop the highest-priority entry.
    ///
    /// Signals and the heap are updated independently, so a consumer may wake
    /// up and find the heap already drained by a faster worker; that surfaces
    /// as `None` and the caller loop retries. Cancellation also yields `None`.
    pub async fn dequeue(&self, cancel: &CancellationToken) -> Option<Job> {
        {
            let mut signal = self.signal_rx.lock().await;
            tokio::select! {
                // No new jobs are handed out once shutdown has fired.
                biased;
                _ = cancel.cancelled() => return None,
                received = signal.recv() => received?,
            }
        }
        self.heap.lock().unwrap().pop().map(|entry| entry.job)
    }

    /// Number of jobs currently waiting.
    pub fn len(&self) -> usize {
        self.heap.lock().unwrap().len()
    }

    /// Whether no jobs are waiting.
    pub fn is_empty(&self) -> bool {
        self.heap.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobPriority;
    use std::time::Duration;

    #[tokio::test]
    async fn test_enqueue_dequeue() {
        let queue = InMemoryQueue::new();
        let job = Job::new("task", None);
        queue.enqueue(job.clone());

        assert_eq!(queue.len(), 1);
        let popped = queue.dequeue(&CancellationToken::new()).await.unwrap();
        assert_eq!(popped.id, job.id);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_priority_ordering() {
        let queue = InMemoryQueue::new();
        let low = Job::new("low", None).with_priority(JobPriority::Low);
        let critical = Job::new("critical", None).with_priority(JobPriority::Critical);
        let normal = Job::new("normal", None);

        queue.enqueue(low.clone());
        queue.enqueue(normal.clone());
        queue.enqueue(critical.clone());

        let cancel = CancellationToken::new();
        assert_eq!(queue.dequeue(&cancel).await.unwrap().id, critical.id);
        assert_eq!(queue.dequeue(&cancel).await.unwrap().id, normal.id);
        assert_eq!(queue.dequeue(&cancel).await.unwrap().id, low.id);
    }

    #[tokio::test]
    async fn test_fifo_within_priority_tier() {
        let queue = InMemoryQueue::new();
        let jobs: Vec<Job> = (0..5).map(|_| Job::new("task", None)).collect();
        for job in &jobs {
            queue.enqueue(job.clone());
        }

        let cancel = CancellationToken::new();
        for expected in &jobs {
            let popped = queue.dequeue(&cancel).await.unwrap();
            assert_eq!(popped.id, expected.id);
        }
    }

    #[tokio::test]
    async fn test_dequeue_returns_none_on_cancellation() {
        let queue = InMemoryQueue::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(queue.dequeue(&cancel).await.is_none());
    }

    #[tokio::test]
    async fn test_dequeue_blocks_until_enqueue() {
        use std::sync::Arc;

        let queue = Arc::new(InMemoryQueue::new());
        let cancel = CancellationToken::new();

        let consumer = {
            let queue = queue.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.dequeue(&cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!consumer.is_finished());

        let job = Job::new("task", None);
        queue.enqueue(job.clone());

        let popped = consumer.await.unwrap().unwrap();
        assert_eq!(popped.id, job.id);
    }

    #[tokio::test]
    async fn test_stale_signal_yields_none() {
        let queue = InMemoryQueue::new();
        let job = Job::new("task", None);
        queue.enqueue(job);

        // Drain the heap out from under the pending signal.
        queue.heap.lock().unwrap().clear();

        let popped = queue.dequeue(&CancellationToken::new()).await;
        assert!(popped.is_none());
    }
}

//! The worker-queue boundary (spec.md §1 non-goal: "the task/worker queue
//! used to parallelize scans and verification; treated as an opaque
//! scheduler exposing `addTask`, `onTaskComplete`, `awaitAllTasks`"). The
//! add-file pipeline is deliberately *not* dispatched through this queue —
//! it mutates the tree and hash caches, which spec.md §5 confines to the
//! engine's owning thread — so [`TaskOutcome`] only carries verify/replicate
//! results.
//!
//! We define the trait boundary plus one concrete pool, [`RayonTaskQueue`],
//! grounded on the teacher's `rayon` dependency (already used for
//! CPU-bound parallel work like `core/index/pusher.rs`'s `into_par_iter`
//! filtering). Jobs are plain synchronous closures dispatched onto
//! `rayon`'s global thread pool; a job that needs to call an `async`
//! `Backend` method blocks on the calling `tokio` runtime's `Handle`
//! (captured at `add_task` time) rather than sharing a reference across
//! the pool boundary — matching spec.md §5's "workers communicate back
//! only through structured result messages... each worker reconstructs
//! its own Backend from a serializable StorageDescriptor."

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::error::VaultError;

/// A unit of work, already bound to everything it needs (it does not
/// borrow from the caller) so it can run on a rayon worker thread.
pub type BoxedJob = Box<dyn FnOnce() -> TaskOutcome + Send + 'static>;

/// The closed sum of results a dispatched job can produce (spec.md §9
/// "Model as a collector that aggregates per-task `Result<T, E>` and
/// synthesizes an engine-level summary; never panics on a single
/// failure" — this is that `Result<T, E>`, made concrete per pipeline).
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Verified(crate::engine::verify::VerifyLeafOutcome),
    Replicated(crate::engine::replicate::ReplicateLeafOutcome),
    Failed { context: String, error: String },
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueues `job`; returns immediately. `onTaskComplete` is modeled as
    /// the `TaskOutcome` collected by [`TaskQueue::await_all`], not a
    /// separate callback (spec.md §9 "Callback-driven scanning... recast
    /// as a lazy sequence... consumed by the engine's loop").
    fn add_task(&self, job: BoxedJob);

    /// `awaitAllTasks`: blocks (asynchronously) until every task added
    /// since the last call has produced a result, then drains them.
    async fn await_all(&self) -> Vec<TaskOutcome>;
}

pub struct RayonTaskQueue {
    tx: mpsc::UnboundedSender<TaskOutcome>,
    rx: Mutex<mpsc::UnboundedReceiver<TaskOutcome>>,
    pending: AtomicUsize,
}

impl RayonTaskQueue {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            tx,
            rx: Mutex::new(rx),
            pending: AtomicUsize::new(0),
        })
    }
}

impl Default for RayonTaskQueue {
    fn default() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            pending: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TaskQueue for RayonTaskQueue {
    fn add_task(&self, job: BoxedJob) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        let tx = self.tx.clone();
        rayon::spawn(move || {
            let outcome = job();
            let _ = tx.send(outcome);
        });
    }

    async fn await_all(&self) -> Vec<TaskOutcome> {
        let expected = self.pending.swap(0, Ordering::SeqCst);
        let mut rx = self.rx.lock().await;
        let mut out = Vec::with_capacity(expected);
        for _ in 0..expected {
            match rx.recv().await {
                Some(outcome) => out.push(outcome),
                None => break,
            }
        }
        out
    }
}

/// Runs `future` to completion from inside a synchronous `rayon` job,
/// using the `tokio::runtime::Handle` captured when the job was built.
/// `rayon` worker threads are not `tokio` runtime threads, so this is a
/// plain `block_on` rather than `block_in_place` (which requires already
/// running on one of the runtime's own worker threads).
pub fn block_on_handle<F: std::future::Future>(handle: &tokio::runtime::Handle, future: F) -> F::Output {
    handle.block_on(future)
}

pub fn task_failed(context: impl Into<String>, error: VaultError) -> TaskOutcome {
    TaskOutcome::Failed {
        context: context.into(),
        error: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::verify::VerifyLeafOutcome;

    #[tokio::test]
    async fn runs_many_jobs_and_collects_every_outcome() {
        let queue = RayonTaskQueue::new();
        for i in 0..50 {
            queue.add_task(Box::new(move || {
                TaskOutcome::Verified(VerifyLeafOutcome::unmodified(format!("leaf-{i}")))
            }));
        }
        let results = queue.await_all().await;
        assert_eq!(results.len(), 50);
    }

    #[tokio::test]
    async fn await_all_with_no_pending_tasks_is_empty() {
        let queue = RayonTaskQueue::new();
        assert!(queue.await_all().await.is_empty());
    }
}

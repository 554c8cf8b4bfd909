//! Atomic write-lock contention scenarios (spec.md §8): for N concurrent
//! acquirers against the same location, exactly one wins, regardless of N.

use std::sync::Arc;

use mediavault_core::engine::lock::{owner_id, WriteLock};
use mediavault_core::storage::{Backend, FsBackend};
use tempfile::TempDir;

async fn run_contention_scenario(n: usize) {
    let dir = TempDir::new().unwrap();
    let backend: Arc<dyn Backend> = Arc::new(FsBackend::new(dir.path(), false));

    let mut handles = Vec::new();
    for _ in 0..n {
        let backend = Arc::clone(&backend);
        handles.push(tokio::spawn(async move {
            WriteLock::acquire(backend, ".db/write.lock", owner_id()).await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1, "exactly one of {n} concurrent acquirers should win");
}

#[tokio::test]
async fn two_concurrent_acquirers_exactly_one_wins() {
    run_contention_scenario(2).await;
}

#[tokio::test]
async fn ten_concurrent_acquirers_exactly_one_wins() {
    run_contention_scenario(10).await;
}

#[tokio::test]
async fn fifty_concurrent_acquirers_exactly_one_wins() {
    run_contention_scenario(50).await;
}

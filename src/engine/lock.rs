//! The write-lock protocol (spec.md §4.5): a JSON sentinel file under
//! `.db/write.lock` giving one engine instance exclusive write capability
//! over a `(location, "write.lock")` pair, refreshed on a jittered interval
//! and broken automatically once stale.
//!
//! Grounded on the same "explicit component owned by the engine" pattern
//! [`crate::engine::AssetEngine`] uses throughout (spec.md §9 "implicit
//! global state... model as explicit components").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::constants::{LOCK_REFRESH_MAX_MS, LOCK_REFRESH_MIN_MS, LOCK_STALE_AFTER_MS};
use crate::error::VaultError;
use crate::storage::{Backend, WriteLockInfo};

/// Builds the `"<process-id>@<host>:<random>"` owner identity spec.md §4.5
/// names, without pulling in a `hostname`-style crate the teacher's
/// dependency stack doesn't already carry.
pub fn owner_id() -> String {
    let host = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "localhost".to_string());
    format!(
        "{}@{}:{}",
        std::process::id(),
        host,
        uuid::Uuid::new_v4().simple()
    )
}

/// A held write lock, with a background refresher task. Dropping this value
/// stops the refresher but does **not** release the lock on storage — call
/// [`WriteLock::release`] explicitly on every exit path (spec.md §5
/// "Lock release must execute on every exit path"; Rust has no async
/// `Drop`, so this is the engine's responsibility, not this type's).
pub struct WriteLock {
    backend: Arc<dyn Backend>,
    lock_path: String,
    owner: String,
    lost: Arc<AtomicBool>,
    refresher: Mutex<Option<JoinHandle<()>>>,
}

impl WriteLock {
    /// `acquireWriteLock` with the stale-break rule folded in: if the lock
    /// file is present but its `timestamp` is more than
    /// [`LOCK_STALE_AFTER_MS`] old, delete it and retry once; otherwise
    /// surface `LockHeld` (spec.md §7, §8 property 8).
    pub async fn acquire(
        backend: Arc<dyn Backend>,
        lock_path: impl Into<String>,
        owner: impl Into<String>,
    ) -> Result<Self, VaultError> {
        let lock_path = lock_path.into();
        let owner = owner.into();
        let info = WriteLockInfo {
            owner: owner.clone(),
            acquired_at: Utc::now(),
            timestamp: now_ms(),
        };

        if backend.acquire_write_lock(&lock_path, &info).await? {
            return Ok(Self::new(backend, lock_path, owner));
        }

        if let Some(existing) = backend.check_write_lock(&lock_path).await? {
            if now_ms().saturating_sub(existing.timestamp) > LOCK_STALE_AFTER_MS {
                log::warn!(
                    "breaking stale write lock at {} held by {} ({}ms old)",
                    lock_path,
                    existing.owner,
                    now_ms().saturating_sub(existing.timestamp)
                );
                backend.release_write_lock(&lock_path).await?;
                if backend.acquire_write_lock(&lock_path, &info).await? {
                    return Ok(Self::new(backend, lock_path, owner));
                }
            }
        } else {
            // Invalid JSON / corrupt sentinel: treat as stale (spec.md §8
            // "Boundary behaviors... acquireWriteLock treats as stale").
            backend.release_write_lock(&lock_path).await?;
            if backend.acquire_write_lock(&lock_path, &info).await? {
                return Ok(Self::new(backend, lock_path, owner));
            }
        }

        Err(VaultError::lock_held(&lock_path))
    }

    fn new(backend: Arc<dyn Backend>, lock_path: String, owner: String) -> Self {
        Self {
            backend,
            lock_path,
            owner,
            lost: Arc::new(AtomicBool::new(false)),
            refresher: Mutex::new(None),
        }
    }

    /// Starts the background refresher that rewrites the lock's
    /// `timestamp` every 3-5 seconds (jittered). If the refresher ever
    /// observes a foreign owner it sets [`WriteLock::is_lost`] and stops
    /// retrying — spec.md §4.5 "Refresh verifies current owner equals this
    /// instance before rewriting; if not, abort with `LockLost`."
    pub async fn start_refresher(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                let jitter_ms = rand::thread_rng().gen_range(LOCK_REFRESH_MIN_MS..=LOCK_REFRESH_MAX_MS);
                tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
                if this.lost.load(Ordering::SeqCst) {
                    return;
                }
                match this.backend.check_write_lock(&this.lock_path).await {
                    Ok(Some(current)) if current.owner == this.owner => {
                        let info = WriteLockInfo {
                            owner: this.owner.clone(),
                            acquired_at: current.acquired_at,
                            timestamp: now_ms(),
                        };
                        if let Err(err) = this.backend.rewrite_write_lock(&this.lock_path, &info).await {
                            log::warn!("write lock refresh failed for {}: {}", this.lock_path, err);
                        }
                    }
                    Ok(_) => {
                        log::error!(
                            "write lock refresher for {} observed a foreign owner; stopping writes",
                            this.lock_path
                        );
                        this.lost.store(true, Ordering::SeqCst);
                        return;
                    }
                    Err(err) => {
                        log::warn!("write lock refresh could not read lock at {}: {}", this.lock_path, err);
                    }
                }
            }
        });
        *self.refresher.lock().await = Some(handle);
    }

    /// `true` once the refresher has observed a foreign owner; the engine
    /// must stop accepting writes (spec.md §7 `LockLost`).
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Stops the refresher and deletes the lock sentinel. Idempotent.
    pub async fn release(&self) -> Result<(), VaultError> {
        if let Some(handle) = self.refresher.lock().await.take() {
            handle.abort();
        }
        self.backend.release_write_lock(&self.lock_path).await
    }
}

fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::local::FsBackend;
    use std::sync::Arc as StdArc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn single_acquire_succeeds() {
        let dir = TempDir::new().unwrap();
        let backend: Arc<dyn Backend> = StdArc::new(FsBackend::new(dir.path(), false));
        let lock = WriteLock::acquire(backend, ".db/write.lock", "owner-a").await.unwrap();
        assert_eq!(lock.owner(), "owner-a");
    }

    #[tokio::test]
    async fn second_acquire_fails_while_held() {
        let dir = TempDir::new().unwrap();
        let backend: Arc<dyn Backend> = StdArc::new(FsBackend::new(dir.path(), false));
        let _lock = WriteLock::acquire(Arc::clone(&backend), ".db/write.lock", "owner-a")
            .await
            .unwrap();
        let err = WriteLock::acquire(backend, ".db/write.lock", "owner-b")
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::LockHeld(_)));
    }

    #[tokio::test]
    async fn release_then_reacquire_with_new_owner() {
        let dir = TempDir::new().unwrap();
        let backend: Arc<dyn Backend> = StdArc::new(FsBackend::new(dir.path(), false));
        let lock = WriteLock::acquire(Arc::clone(&backend), ".db/write.lock", "owner-a")
            .await
            .unwrap();
        lock.release().await.unwrap();

        let lock2 = WriteLock::acquire(Arc::clone(&backend), ".db/write.lock", "owner-x")
            .await
            .unwrap();
        assert_eq!(lock2.owner(), "owner-x");
        let checked = backend.check_write_lock(".db/write.lock").await.unwrap().unwrap();
        assert_eq!(checked.owner, "owner-x");
    }

    #[tokio::test]
    async fn stale_lock_is_broken_by_another_owner() {
        let dir = TempDir::new().unwrap();
        let backend: Arc<dyn Backend> = StdArc::new(FsBackend::new(dir.path(), false));
        let stale = WriteLockInfo {
            owner: "ghost".to_string(),
            acquired_at: Utc::now(),
            timestamp: now_ms() - (crate::constants::LOCK_STALE_AFTER_MS + 1_000),
        };
        backend.acquire_write_lock(".db/write.lock", &stale).await.unwrap();

        let lock = WriteLock::acquire(Arc::clone(&backend), ".db/write.lock", "owner-new")
            .await
            .unwrap();
        assert_eq!(lock.owner(), "owner-new");
    }

    #[tokio::test]
    async fn invalid_lock_json_is_treated_as_stale() {
        let dir = TempDir::new().unwrap();
        let backend: Arc<dyn Backend> = StdArc::new(FsBackend::new(dir.path(), false));
        backend.write(".db/write.lock", None, b"not json").await.unwrap();
        let lock = WriteLock::acquire(Arc::clone(&backend), ".db/write.lock", "owner-new")
            .await
            .unwrap();
        assert_eq!(lock.owner(), "owner-new");
    }

    #[tokio::test]
    async fn concurrent_acquires_exactly_one_winner() {
        let dir = TempDir::new().unwrap();
        let backend: Arc<dyn Backend> = StdArc::new(FsBackend::new(dir.path(), false));

        let mut handles = Vec::new();
        for i in 0..20 {
            let backend = Arc::clone(&backend);
            handles.push(tokio::spawn(async move {
                WriteLock::acquire(backend, ".db/write.lock", format!("owner-{i}")).await
            }));
        }
        let mut winners = 0;
        let mut winner_owner = None;
        for handle in handles {
            if let Ok(lock) = handle.await.unwrap() {
                winners += 1;
                winner_owner = Some(lock.owner().to_string());
            }
        }
        assert_eq!(winners, 1);
        let checked = backend.check_write_lock(".db/write.lock").await.unwrap().unwrap();
        assert_eq!(Some(checked.owner), winner_owner);
    }
}

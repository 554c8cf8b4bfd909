//! The asset engine (spec.md §4.5): the single owner of a vault's storage
//! backends, Merkle tree, hash caches, metadata collection, write lock, and
//! task queue. Everything else in this crate is a capability this module
//! composes; nothing here talks to disk/S3/crypto directly except through
//! those capabilities.
//!
//! Grounded on `oxen-rust`'s top-level `LocalRepository`/`command` layer:
//! one struct owning every subsystem, `load`/`init`-style constructors, and
//! pipeline methods that return an aggregate report rather than bailing on
//! the first per-file failure (spec.md §7).

pub mod add;
pub mod hash_cache;
pub mod lock;
pub mod metadata;
pub mod replicate;
pub mod task_queue;
pub mod verify;

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rsa::RsaPublicKey;
use uuid::Uuid;

use crate::constants::{
    DB_DIR, HASH_CACHE_FILE_NAME, PROGRESS_FLUSH_INTERVAL, TREE_FILE_NAME, WRITE_LOCK_FILE_NAME,
};
use crate::crypto::keys::PrivateKeyMap;
use crate::engine::add::{AddFileRequest, AddOutcome};
use crate::engine::hash_cache::HashCache;
use crate::engine::lock::WriteLock;
use crate::engine::metadata::{DbUpdate, InMemoryMetadataCollection, MetadataCollection};
use crate::engine::replicate::{replicate_leaf, ReplicateLeafOutcome, ReplicateReport};
use crate::engine::task_queue::{task_failed, BoxedJob, RayonTaskQueue, TaskOutcome, TaskQueue};
use crate::engine::verify::{verify_leaf, VerifyLeafOutcome, VerifyOptions, VerifyReport};
use crate::error::VaultError;
use crate::merkle::merkle_form::{load_tree, save_tree};
use crate::merkle::node::HashedItem;
use crate::merkle::tree::SortTree;
use crate::storage::{backend_from_location, Backend, EncryptedBackend, PrefixBackend};

/// At-rest encryption material for a vault (spec.md §4.3). Absent means
/// assets and metadata are stored as plaintext.
#[derive(Clone)]
pub struct EncryptionConfig {
    pub public_key: RsaPublicKey,
    pub key_map: PrivateKeyMap,
}

/// Everything needed to open or create a vault at a location (spec.md §6).
#[derive(Clone)]
pub struct EngineConfig {
    /// `fs:` or `s3:` location URI (spec.md §6).
    pub location: String,
    pub readonly: bool,
    /// Optional sub-path namespacing via [`PrefixBackend`] (spec.md §4.2).
    pub prefix: Option<String>,
    pub encryption: Option<EncryptionConfig>,
}

/// The coordinator described in spec.md §4.5 and §5. One instance per
/// vault location; `load`/`create` acquire the write lock (unless
/// `readonly`), `shutdown` releases it — Rust has no async `Drop`, so
/// callers must call `shutdown` on every exit path.
pub struct AssetEngine {
    storage: Arc<dyn Backend>,
    tree: SortTree,
    local_cache: HashCache,
    local_cache_path: PathBuf,
    remote_cache_path: String,
    tree_path: String,
    lock_path: String,
    lock: Option<Arc<WriteLock>>,
    metadata: Arc<dyn MetadataCollection>,
    task_queue: Arc<dyn TaskQueue>,
    files_since_flush: AtomicUsize,
}

impl AssetEngine {
    async fn open_storage(config: &EngineConfig) -> Result<Arc<dyn Backend>, VaultError> {
        let mut backend = backend_from_location(&config.location, config.readonly).await?;
        if let Some(prefix) = &config.prefix {
            backend = Arc::new(PrefixBackend::new(backend, prefix.clone())?);
        }
        if let Some(enc) = &config.encryption {
            backend = Arc::new(EncryptedBackend::new(
                backend,
                enc.public_key.clone(),
                enc.key_map.clone(),
            ));
        }
        Ok(backend)
    }

    /// Initializes a brand new vault: fresh tree, fresh write lock.
    /// Fails if a tree already exists at `{config.location}/.db/tree.dat`.
    pub async fn create(config: EngineConfig, metadata: Arc<dyn MetadataCollection>) -> Result<Self, VaultError> {
        let storage = Self::open_storage(&config).await?;
        let tree_path = format!("{DB_DIR}/{TREE_FILE_NAME}");
        if storage.file_exists(&tree_path).await? {
            return Err(VaultError::basic_str(format!(
                "a tree already exists at {tree_path}; use AssetEngine::load instead"
            )));
        }
        let tree = SortTree::create_tree(Uuid::new_v4());
        Self::open(config, storage, tree, tree_path, metadata).await
    }

    /// Opens an existing vault, loading its persisted tree. Creates a fresh
    /// (empty) tree if none is found, matching `loadTree`'s documented
    /// "absent is not an error" behavior (spec.md §4.4).
    pub async fn load(config: EngineConfig, metadata: Arc<dyn MetadataCollection>) -> Result<Self, VaultError> {
        let storage = Self::open_storage(&config).await?;
        let tree_path = format!("{DB_DIR}/{TREE_FILE_NAME}");
        let tree = load_tree(&tree_path, storage.as_ref())
            .await?
            .unwrap_or_else(|| SortTree::create_tree(Uuid::new_v4()));
        Self::open(config, storage, tree, tree_path, metadata).await
    }

    async fn open(
        config: EngineConfig,
        storage: Arc<dyn Backend>,
        tree: SortTree,
        tree_path: String,
        metadata: Arc<dyn MetadataCollection>,
    ) -> Result<Self, VaultError> {
        let remote_cache_path = format!("{DB_DIR}/{HASH_CACHE_FILE_NAME}");
        let local_cache = HashCache::load_from_backend(storage.as_ref(), &remote_cache_path).await;
        let local_cache_path = std::env::temp_dir().join(format!(
            "mediavault-hash-cache-{}.json",
            hex::encode(tree.metadata.id.as_bytes())
        ));

        let lock_path = format!("{DB_DIR}/{WRITE_LOCK_FILE_NAME}");
        let lock = if config.readonly {
            None
        } else {
            let owner = lock::owner_id();
            let acquired = WriteLock::acquire(Arc::clone(&storage), lock_path.clone(), owner).await?;
            let acquired = Arc::new(acquired);
            acquired.start_refresher().await;
            Some(acquired)
        };

        Ok(Self {
            storage,
            tree,
            local_cache,
            local_cache_path,
            remote_cache_path,
            tree_path,
            lock_path,
            lock,
            metadata,
            task_queue: RayonTaskQueue::new(),
            files_since_flush: AtomicUsize::new(0),
        })
    }

    /// Convenience constructor for tests/standalone use: an in-memory
    /// metadata collection instead of a caller-supplied document store.
    pub async fn create_with_in_memory_metadata(config: EngineConfig) -> Result<Self, VaultError> {
        Self::create(config, Arc::new(InMemoryMetadataCollection::new())).await
    }

    pub fn tree(&self) -> &SortTree {
        &self.tree
    }

    pub fn storage(&self) -> &Arc<dyn Backend> {
        &self.storage
    }

    /// `true` once the write-lock refresher has observed a foreign owner;
    /// callers must stop issuing writes (spec.md §7 `LockLost`).
    pub fn lock_lost(&self) -> bool {
        self.lock.as_ref().is_some_and(|l| l.is_lost())
    }

    fn require_write_access(&self) -> Result<(), VaultError> {
        if self.storage.readonly() {
            return Err(VaultError::readonly("asset engine is read-only"));
        }
        if self.lock_lost() {
            return Err(VaultError::lock_lost(
                self.lock.as_ref().map(|l| l.owner()).unwrap_or("unknown"),
            ));
        }
        Ok(())
    }

    /// Runs the add-file pipeline for one file (spec.md §4.5), persisting
    /// the tree and both hash caches every
    /// [`crate::constants::PROGRESS_FLUSH_INTERVAL`] files.
    pub async fn add_file(&mut self, request: AddFileRequest) -> Result<AddOutcome, VaultError> {
        self.require_write_access()?;
        let outcome = add::add_file(
            self.storage.as_ref(),
            self.metadata.as_ref(),
            &mut self.tree,
            &mut self.local_cache,
            request,
        )
        .await?;

        if matches!(outcome, AddOutcome::Added { .. }) {
            let count = self.files_since_flush.fetch_add(1, Ordering::SeqCst) + 1;
            if count >= PROGRESS_FLUSH_INTERVAL {
                self.files_since_flush.store(0, Ordering::SeqCst);
                self.flush().await?;
            }
        }
        Ok(outcome)
    }

    /// Persists the tree and both hash caches without waiting for the
    /// periodic flush interval.
    pub async fn flush(&mut self) -> Result<(), VaultError> {
        save_tree(&self.tree_path, &mut self.tree, self.storage.as_ref()).await?;
        self.local_cache.save_to_backend(self.storage.as_ref(), &self.remote_cache_path).await;
        self.local_cache.save_to_file(&self.local_cache_path);
        Ok(())
    }

    /// Verifies every leaf in the tree (plus any untracked on-disk asset),
    /// dispatching each leaf check onto the [`TaskQueue`] (spec.md §5
    /// "hashing/verification/replication I/O dispatched to a worker pool").
    pub async fn verify(&self, options: VerifyOptions) -> Result<VerifyReport, VaultError> {
        let mut leaves = Vec::new();
        if let Some(root) = self.tree.root() {
            root.collect_leaves(&mut leaves);
        }
        let known_names: std::collections::HashSet<String> =
            leaves.iter().map(|l| l.name.clone()).collect();
        let handle = tokio::runtime::Handle::current();

        for leaf in leaves {
            let leaf = leaf.clone();
            let storage = Arc::clone(&self.storage);
            let options = options.clone();
            let handle = handle.clone();
            self.task_queue.add_task(Box::new(move || {
                let outcome = task_queue::block_on_handle(&handle, verify_leaf(storage.as_ref(), &leaf, &options));
                TaskOutcome::Verified(outcome)
            }) as BoxedJob);
        }

        let mut report = VerifyReport::default();
        for outcome in self.task_queue.await_all().await {
            match outcome {
                TaskOutcome::Verified(leaf_outcome) => report.record(leaf_outcome),
                TaskOutcome::Failed { context, error } => {
                    report.record(VerifyLeafOutcome::Failed { name: context, error })
                }
                other => {
                    log::warn!("verify task queue produced an unexpected outcome: {other:?}");
                }
            }
        }

        let mut next = None;
        loop {
            let page = self
                .storage
                .list_files(crate::constants::ASSETS_DIR, 1000, next.as_deref())
                .await?;
            for name in &page.names {
                if !known_names.contains(name) {
                    report.new.push(name.clone());
                }
            }
            if page.next.is_none() {
                break;
            }
            next = page.next;
        }
        Ok(report)
    }

    /// Replicates every leaf of `self`'s tree into `dest`, dispatching each
    /// copy onto the task queue and re-persisting `dest`'s tree every
    /// [`crate::constants::PROGRESS_FLUSH_INTERVAL`] copies, finishing with
    /// a metadata sync via [`DbUpdate`] dispatch (spec.md §4.5).
    pub async fn replicate(&self, dest: &mut AssetEngine) -> Result<ReplicateReport, VaultError> {
        dest.require_write_access()?;

        let mut leaves = Vec::new();
        if let Some(root) = self.tree.root() {
            root.collect_leaves(&mut leaves);
        }
        let handle = tokio::runtime::Handle::current();
        // Workers only read the destination tree to decide skip-vs-copy; the
        // authoritative mutation happens back on this thread as outcomes
        // come in below, so a point-in-time snapshot is all they need.
        let dest_tree_snapshot = Arc::new(dest.tree.clone());

        for leaf in &leaves {
            let leaf = (*leaf).clone();
            let src = Arc::clone(&self.storage);
            let dest_storage = Arc::clone(&dest.storage);
            let dest_tree_snapshot = Arc::clone(&dest_tree_snapshot);
            let handle = handle.clone();
            self.task_queue.add_task(Box::new(move || {
                let outcome = task_queue::block_on_handle(
                    &handle,
                    replicate_leaf(src.as_ref(), dest_storage.as_ref(), dest_tree_snapshot.as_ref(), &leaf),
                );
                TaskOutcome::Replicated(outcome)
            }) as BoxedJob);
        }

        let mut report = ReplicateReport::default();
        let mut since_flush = 0usize;
        for outcome in self.task_queue.await_all().await {
            let leaf_outcome = match outcome {
                TaskOutcome::Replicated(leaf_outcome) => leaf_outcome,
                TaskOutcome::Failed { context, error } => ReplicateLeafOutcome::Failed { name: context, error },
                other => {
                    log::warn!("replicate task queue produced an unexpected outcome: {other:?}");
                    continue;
                }
            };

            if let ReplicateLeafOutcome::Copied { name } = &leaf_outcome {
                if let Some(src_leaf) = leaves.iter().find(|l| &l.name == name) {
                    dest.tree.upsert_item(HashedItem {
                        name: src_leaf.name.clone(),
                        hash: src_leaf.content_hash,
                        length: src_leaf.length,
                        last_modified: src_leaf.last_modified,
                    })?;
                    since_flush += 1;
                    if since_flush >= PROGRESS_FLUSH_INTERVAL {
                        since_flush = 0;
                        dest.flush().await?;
                    }
                }
            }
            report.record(leaf_outcome);
        }

        dest.flush().await?;
        self.sync_metadata_to(dest).await?;
        Ok(report)
    }

    /// Copies every document in every collection this engine's metadata
    /// store holds into `dest`'s, as a sequence of [`DbUpdate::Upsert`]
    /// dispatches (spec.md §4.5 "final metadata-collection sync": "iterate
    /// every collection in the source document database").
    async fn sync_metadata_to(&self, dest: &AssetEngine) -> Result<(), VaultError> {
        for collection in self.metadata.list_collections().await? {
            for doc in self.metadata.get_sorted(&collection, "_id").await? {
                let Some(id) = doc.get("_id").and_then(|v| v.as_str()) else {
                    continue;
                };
                DbUpdate::Upsert {
                    collection: collection.clone(),
                    id: id.to_string(),
                    doc,
                }
                .apply(dest.metadata.as_ref())
                .await?;
            }
        }
        Ok(())
    }

    /// Stops the write-lock refresher and deletes the lock sentinel.
    /// Idempotent; safe to call even if no lock was ever acquired
    /// (read-only engines).
    pub async fn shutdown(mut self) -> Result<(), VaultError> {
        self.flush().await?;
        if let Some(lock) = self.lock.take() {
            log::debug!("releasing write lock at {}", self.lock_path);
            lock.release().await?;
        }
        Ok(())
    }
}

pub fn task_outcome_failed(context: impl Into<String>, error: VaultError) -> TaskOutcome {
    task_failed(context, error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::local::FsBackend;
    use serde_json::json;
    use tempfile::TempDir;

    fn fs_location(dir: &TempDir) -> String {
        format!("fs:{}", dir.path().display())
    }

    #[tokio::test]
    async fn create_then_load_round_trips_an_added_file() {
        let vault_dir = TempDir::new().unwrap();
        let source_dir = TempDir::new().unwrap();
        let config = EngineConfig {
            location: fs_location(&vault_dir),
            readonly: false,
            prefix: None,
            encryption: None,
        };
        let mut engine = AssetEngine::create_with_in_memory_metadata(config.clone())
            .await
            .unwrap();

        let src_path = source_dir.path().join("photo.jpg");
        tokio::fs::write(&src_path, b"asset bytes").await.unwrap();
        let outcome = engine
            .add_file(AddFileRequest {
                file_path: src_path,
                content_type: Some("image/jpeg".to_string()),
                thumbnail: None,
                display: None,
                orig_file_name: "photo.jpg".to_string(),
                orig_path: "/camera/photo.jpg".to_string(),
                width: None,
                height: None,
                photo_date: None,
                coordinates: None,
                properties: json!({}),
                labels: vec![],
                micro: None,
                color: None,
                duration: None,
            })
            .await
            .unwrap();
        assert!(matches!(outcome, AddOutcome::Added { .. }));
        engine.shutdown().await.unwrap();

        let reopened = AssetEngine::load(config, Arc::new(InMemoryMetadataCollection::new()))
            .await
            .unwrap();
        assert_eq!(reopened.tree().node_count(), 1);
        reopened.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn second_create_at_same_location_fails() {
        let vault_dir = TempDir::new().unwrap();
        let config = EngineConfig {
            location: fs_location(&vault_dir),
            readonly: false,
            prefix: None,
            encryption: None,
        };
        let engine = AssetEngine::create_with_in_memory_metadata(config.clone())
            .await
            .unwrap();
        engine.shutdown().await.unwrap();

        let backend = FsBackend::new(vault_dir.path(), false);
        backend
            .write(&format!("{DB_DIR}/{TREE_FILE_NAME}"), None, b"not empty")
            .await
            .unwrap();

        let err = AssetEngine::create_with_in_memory_metadata(config).await.unwrap_err();
        assert!(matches!(err, VaultError::Basic(_)));
    }

    #[tokio::test]
    async fn verify_reports_clean_after_add() {
        let vault_dir = TempDir::new().unwrap();
        let source_dir = TempDir::new().unwrap();
        let config = EngineConfig {
            location: fs_location(&vault_dir),
            readonly: false,
            prefix: None,
            encryption: None,
        };
        let mut engine = AssetEngine::create_with_in_memory_metadata(config).await.unwrap();
        let src_path = source_dir.path().join("photo.jpg");
        tokio::fs::write(&src_path, b"asset bytes").await.unwrap();
        engine
            .add_file(AddFileRequest {
                file_path: src_path,
                content_type: None,
                thumbnail: None,
                display: None,
                orig_file_name: "photo.jpg".to_string(),
                orig_path: "/camera/photo.jpg".to_string(),
                width: None,
                height: None,
                photo_date: None,
                coordinates: None,
                properties: json!({}),
                labels: vec![],
                micro: None,
                color: None,
                duration: None,
            })
            .await
            .unwrap();

        let report = engine.verify(VerifyOptions::default()).await.unwrap();
        assert!(report.is_clean());
        assert_eq!(report.unmodified.len(), 1);
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn replicate_copies_assets_and_metadata_between_engines() {
        let src_dir = TempDir::new().unwrap();
        let dest_dir = TempDir::new().unwrap();
        let source_dir = TempDir::new().unwrap();

        let src_config = EngineConfig {
            location: fs_location(&src_dir),
            readonly: false,
            prefix: None,
            encryption: None,
        };
        let dest_config = EngineConfig {
            location: fs_location(&dest_dir),
            readonly: false,
            prefix: None,
            encryption: None,
        };

        let mut src_engine = AssetEngine::create_with_in_memory_metadata(src_config).await.unwrap();
        let mut dest_engine = AssetEngine::create_with_in_memory_metadata(dest_config).await.unwrap();

        let src_path = source_dir.path().join("photo.jpg");
        tokio::fs::write(&src_path, b"replicate me").await.unwrap();
        src_engine
            .add_file(AddFileRequest {
                file_path: src_path,
                content_type: None,
                thumbnail: None,
                display: None,
                orig_file_name: "photo.jpg".to_string(),
                orig_path: "/camera/photo.jpg".to_string(),
                width: None,
                height: None,
                photo_date: None,
                coordinates: None,
                properties: json!({}),
                labels: vec![],
                micro: None,
                color: None,
                duration: None,
            })
            .await
            .unwrap();

        // A document in a collection other than "assets" must sync too.
        src_engine
            .metadata
            .insert_one("albums", "summer-trip", json!({"_id": "summer-trip", "count": 1}))
            .await
            .unwrap();

        let report = src_engine.replicate(&mut dest_engine).await.unwrap();
        assert_eq!(report.copied.len(), 1);
        assert_eq!(dest_engine.tree().node_count(), 1);
        assert_eq!(
            dest_engine.metadata.get("albums", "summer-trip").await.unwrap(),
            Some(json!({"_id": "summer-trip", "count": 1}))
        );

        src_engine.shutdown().await.unwrap();
        dest_engine.shutdown().await.unwrap();
    }
}

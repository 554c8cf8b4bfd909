//! The `Backend` capability trait: uniform byte-level operations over a
//! local filesystem or an S3-compatible object store (spec.md §4.1).
//!
//! Grounded on `oxen-rust/src/lib/src/storage/version_store.rs`'s
//! `VersionStore` trait (one trait, one `local.rs` impl, one `s3.rs` impl,
//! an `Arc<dyn _>` factory), generalized from "versioned blob store" to the
//! full operation set spec.md names: listing, directory existence, streaming
//! I/O, copy, and the atomic write-lock primitives.

use std::fmt::Debug;
use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::VaultError;

pub type BoxAsyncRead = Pin<Box<dyn tokio::io::AsyncRead + Send + Unpin>>;

/// Per-file metadata as spec.md §3 defines it. `content_type` is absent for
/// local FS, which has no out-of-band content-type store.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    pub content_type: Option<String>,
    pub length: u64,
    pub last_modified: DateTime<Utc>,
}

/// Write-lock sentinel file contents (spec.md §3, §6). Field names match
/// the wire JSON exactly: `owner`, `acquiredAt`, `timestamp`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WriteLockInfo {
    pub owner: String,
    #[serde(rename = "acquiredAt")]
    pub acquired_at: DateTime<Utc>,
    pub timestamp: u64,
}

/// One page of a `list_files`/`list_dirs` call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ListPage {
    pub names: Vec<String>,
    pub next: Option<String>,
}

/// A storage location descriptor, serializable so a worker can reconstruct
/// its own `Backend` instead of sharing one across a thread boundary
/// (spec.md §5 "workers reconstruct their own Backend from a serializable
/// StorageDescriptor").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum StorageDescriptor {
    Fs { root: String, readonly: bool },
    S3 { bucket: String, prefix: String, readonly: bool, endpoint: Option<String> },
}

impl StorageDescriptor {
    pub fn readonly(&self) -> bool {
        match self {
            StorageDescriptor::Fs { readonly, .. } => *readonly,
            StorageDescriptor::S3 { readonly, .. } => *readonly,
        }
    }
}

/// A concrete byte store: filesystem or S3 (spec.md glossary).
///
/// Paths are opaque strings; each backend parses them. Every mutating
/// operation must check `readonly()` before any I/O.
#[async_trait]
pub trait Backend: Debug + Send + Sync {
    /// The `fs:`/`s3:` location URI this backend was constructed from.
    fn location(&self) -> &str;

    fn readonly(&self) -> bool;

    fn descriptor(&self) -> StorageDescriptor;

    async fn is_empty(&self, path: &str) -> Result<bool, VaultError>;

    async fn list_files(
        &self,
        path: &str,
        max: usize,
        next: Option<&str>,
    ) -> Result<ListPage, VaultError>;

    async fn list_dirs(
        &self,
        path: &str,
        max: usize,
        next: Option<&str>,
    ) -> Result<ListPage, VaultError>;

    async fn file_exists(&self, path: &str) -> Result<bool, VaultError>;

    async fn dir_exists(&self, path: &str) -> Result<bool, VaultError>;

    async fn info(&self, path: &str) -> Result<Option<FileInfo>, VaultError>;

    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>, VaultError>;

    async fn write(
        &self,
        path: &str,
        content_type: Option<&str>,
        data: &[u8],
    ) -> Result<(), VaultError>;

    async fn read_stream(&self, path: &str) -> Result<Option<BoxAsyncRead>, VaultError>;

    async fn write_stream(
        &self,
        path: &str,
        content_type: Option<&str>,
        reader: BoxAsyncRead,
        length: Option<u64>,
    ) -> Result<(), VaultError>;

    /// No error if the file is already absent.
    async fn delete_file(&self, path: &str) -> Result<(), VaultError>;

    /// No error if the directory is already absent.
    async fn delete_dir(&self, path: &str) -> Result<(), VaultError>;

    async fn copy_to(&self, src: &str, dest: &str) -> Result<(), VaultError>;

    /// Atomically creates the lock sentinel. Returns `true` iff this call
    /// was the one that created it, `false` if another owner already holds
    /// it. Must never read-then-write (spec.md §4.1).
    async fn acquire_write_lock(
        &self,
        lock_path: &str,
        info: &WriteLockInfo,
    ) -> Result<bool, VaultError>;

    /// No error if the lock is already absent.
    async fn release_write_lock(&self, lock_path: &str) -> Result<(), VaultError>;

    async fn check_write_lock(&self, lock_path: &str) -> Result<Option<WriteLockInfo>, VaultError>;

    /// Overwrites the lock sentinel in place (used by the refresher to bump
    /// `timestamp`). Not atomic against a concurrent acquire — callers must
    /// verify ownership first (spec.md §4.5).
    async fn rewrite_write_lock(
        &self,
        lock_path: &str,
        info: &WriteLockInfo,
    ) -> Result<(), VaultError>;
}

pub fn guard_readonly(backend: &dyn Backend, op: &str) -> Result<(), VaultError> {
    if backend.readonly() {
        return Err(VaultError::readonly(op));
    }
    Ok(())
}

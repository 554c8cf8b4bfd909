//! Local filesystem implementation of the `Backend` trait.
//!
//! Grounded on `oxen-rust/src/lib/src/storage/local.rs`'s `LocalVersionStore`
//! (one root path, `std::fs` wrapped with `util::fs`-style path-bearing
//! errors) generalized to the full listing/streaming/write-lock operation
//! set of spec.md §4.1.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncReadExt;

use crate::error::VaultError;
use crate::storage::backend::{
    Backend, BoxAsyncRead, FileInfo, ListPage, StorageDescriptor, WriteLockInfo,
};
use crate::util::fs as ufs;
use crate::util::natural_cmp;

/// Local filesystem backend rooted at an absolute or relative directory.
#[derive(Debug, Clone)]
pub struct FsBackend {
    root: PathBuf,
    readonly: bool,
}

impl FsBackend {
    pub fn new(root: impl AsRef<Path>, readonly: bool) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            readonly,
        }
    }

    /// Resolves an opaque path key to an absolute filesystem path.
    /// Backslashes are normalized to `/` (spec.md §6); empty paths are
    /// rejected fail-fast (spec.md §4.1).
    fn resolve(&self, path: &str) -> Result<PathBuf, VaultError> {
        if path.is_empty() {
            return Err(VaultError::invalid_path("fs: path must not be empty"));
        }
        let normalized = path.replace('\\', "/");
        Ok(self.root.join(normalized))
    }

    fn guard_write(&self, op: &str) -> Result<(), VaultError> {
        if self.readonly {
            return Err(VaultError::readonly(op));
        }
        Ok(())
    }

    fn to_file_info(meta: &std::fs::Metadata) -> Result<FileInfo, VaultError> {
        let modified = meta.modified().map_err(VaultError::from)?;
        let last_modified: DateTime<Utc> = modified.into();
        Ok(FileInfo {
            content_type: None,
            length: meta.len(),
            last_modified,
        })
    }
}

#[async_trait]
impl Backend for FsBackend {
    fn location(&self) -> &str {
        self.root.to_str().unwrap_or_default()
    }

    fn readonly(&self) -> bool {
        self.readonly
    }

    fn descriptor(&self) -> StorageDescriptor {
        StorageDescriptor::Fs {
            root: self.root.to_string_lossy().into_owned(),
            readonly: self.readonly,
        }
    }

    async fn is_empty(&self, path: &str) -> Result<bool, VaultError> {
        let dir = self.resolve(path)?;
        if !dir.exists() {
            return Ok(true);
        }
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(VaultError::from)?;
        Ok(entries.next_entry().await.map_err(VaultError::from)?.is_none())
    }

    async fn list_files(
        &self,
        path: &str,
        max: usize,
        next: Option<&str>,
    ) -> Result<ListPage, VaultError> {
        list_entries(&self.resolve(path)?, max, next, false).await
    }

    async fn list_dirs(
        &self,
        path: &str,
        max: usize,
        next: Option<&str>,
    ) -> Result<ListPage, VaultError> {
        list_entries(&self.resolve(path)?, max, next, true).await
    }

    async fn file_exists(&self, path: &str) -> Result<bool, VaultError> {
        let p = self.resolve(path)?;
        match tokio::fs::metadata(&p).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(VaultError::from(err)),
        }
    }

    async fn dir_exists(&self, path: &str) -> Result<bool, VaultError> {
        let p = self.resolve(path)?;
        match tokio::fs::metadata(&p).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(VaultError::from(err)),
        }
    }

    async fn info(&self, path: &str) -> Result<Option<FileInfo>, VaultError> {
        let p = self.resolve(path)?;
        match tokio::fs::metadata(&p).await {
            Ok(meta) if meta.is_file() => Ok(Some(Self::to_file_info(&meta)?)),
            Ok(_) => Ok(None),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(VaultError::from(err)),
        }
    }

    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>, VaultError> {
        let p = self.resolve(path)?;
        ufs::read(&p)
    }

    async fn write(
        &self,
        path: &str,
        _content_type: Option<&str>,
        data: &[u8],
    ) -> Result<(), VaultError> {
        self.guard_write("write")?;
        let p = self.resolve(path)?;
        ufs::write_atomic(&p, data)
    }

    async fn read_stream(&self, path: &str) -> Result<Option<BoxAsyncRead>, VaultError> {
        let p = self.resolve(path)?;
        match tokio::fs::File::open(&p).await {
            Ok(file) => Ok(Some(Box::pin(file))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(VaultError::from(err)),
        }
    }

    async fn write_stream(
        &self,
        path: &str,
        _content_type: Option<&str>,
        mut reader: BoxAsyncRead,
        _length: Option<u64>,
    ) -> Result<(), VaultError> {
        self.guard_write("write_stream")?;
        let p = self.resolve(path)?;
        if let Some(parent) = p.parent() {
            ufs::create_dir_all(parent)?;
        }
        let mut file = tokio::fs::File::create(&p).await.map_err(VaultError::from)?;
        tokio::io::copy(&mut reader, &mut file)
            .await
            .map_err(VaultError::from)?;
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<(), VaultError> {
        self.guard_write("delete_file")?;
        let p = self.resolve(path)?;
        ufs::remove_file_if_exists(&p)
    }

    async fn delete_dir(&self, path: &str) -> Result<(), VaultError> {
        self.guard_write("delete_dir")?;
        let p = self.resolve(path)?;
        ufs::remove_dir_all(&p)
    }

    async fn copy_to(&self, src: &str, dest: &str) -> Result<(), VaultError> {
        self.guard_write("copy_to")?;
        let src_path = self.resolve(src)?;
        let dest_path = self.resolve(dest)?;
        if let Some(parent) = dest_path.parent() {
            ufs::create_dir_all(parent)?;
        }
        tokio::fs::copy(&src_path, &dest_path)
            .await
            .map_err(VaultError::from)?;
        Ok(())
    }

    async fn acquire_write_lock(
        &self,
        lock_path: &str,
        info: &WriteLockInfo,
    ) -> Result<bool, VaultError> {
        self.guard_write("acquire_write_lock")?;
        let p = self.resolve(lock_path)?;
        let payload = serde_json::to_vec(info).map_err(VaultError::from)?;
        ufs::create_new_exclusive(&p, &payload)
    }

    async fn release_write_lock(&self, lock_path: &str) -> Result<(), VaultError> {
        self.guard_write("release_write_lock")?;
        let p = self.resolve(lock_path)?;
        ufs::remove_file_if_exists(&p)
    }

    async fn check_write_lock(&self, lock_path: &str) -> Result<Option<WriteLockInfo>, VaultError> {
        let p = self.resolve(lock_path)?;
        match ufs::read(&p)? {
            None => Ok(None),
            Some(bytes) => Ok(serde_json::from_slice(&bytes).ok()),
        }
    }

    async fn rewrite_write_lock(
        &self,
        lock_path: &str,
        info: &WriteLockInfo,
    ) -> Result<(), VaultError> {
        self.guard_write("rewrite_write_lock")?;
        let p = self.resolve(lock_path)?;
        let payload = serde_json::to_vec(info).map_err(VaultError::from)?;
        ufs::write_atomic(&p, &payload)
    }
}

async fn list_entries(
    dir: &Path,
    max: usize,
    next: Option<&str>,
    want_dirs: bool,
) -> Result<ListPage, VaultError> {
    if !dir.exists() {
        return Ok(ListPage::default());
    }
    let mut names = Vec::new();
    let mut read_dir = tokio::fs::read_dir(dir).await.map_err(VaultError::from)?;
    while let Some(entry) = read_dir.next_entry().await.map_err(VaultError::from)? {
        let file_type = entry.file_type().await.map_err(VaultError::from)?;
        if file_type.is_dir() == want_dirs {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort_by(|a, b| natural_cmp(a, b));

    let start = match next {
        Some(cursor) => names
            .iter()
            .position(|n| natural_cmp(n, cursor) == std::cmp::Ordering::Greater)
            .unwrap_or(names.len()),
        None => 0,
    };
    let remaining = &names[start..];
    let page: Vec<String> = remaining.iter().take(max).cloned().collect();
    let next_cursor = if remaining.len() > max {
        page.last().cloned()
    } else {
        None
    };
    Ok(ListPage {
        names: page,
        next: next_cursor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, FsBackend) {
        let dir = TempDir::new().unwrap();
        let backend = FsBackend::new(dir.path(), false);
        (dir, backend)
    }

    #[tokio::test]
    async fn write_read_round_trip() {
        let (_dir, backend) = setup();
        backend.write("a/file.bin", None, b"hello").await.unwrap();
        assert_eq!(backend.read("a/file.bin").await.unwrap().unwrap(), b"hello");
    }

    #[tokio::test]
    async fn info_reports_length_for_unencrypted_write() {
        let (_dir, backend) = setup();
        backend.write("f.bin", None, b"0123456789").await.unwrap();
        let info = backend.info("f.bin").await.unwrap().unwrap();
        assert_eq!(info.length, 10);
        assert!(info.content_type.is_none());
    }

    #[tokio::test]
    async fn read_missing_returns_none() {
        let (_dir, backend) = setup();
        assert!(backend.read("missing").await.unwrap().is_none());
        assert!(backend.info("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_path_is_rejected() {
        let (_dir, backend) = setup();
        let err = backend.read("").await.unwrap_err();
        assert!(matches!(err, VaultError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn readonly_backend_rejects_writes_without_io() {
        let dir = TempDir::new().unwrap();
        let backend = FsBackend::new(dir.path(), true);
        let err = backend.write("f.bin", None, b"x").await.unwrap_err();
        assert!(matches!(err, VaultError::Readonly(_)));
        assert!(!dir.path().join("f.bin").exists());
    }

    #[tokio::test]
    async fn listing_uses_numeric_aware_collation() {
        let (_dir, backend) = setup();
        for name in ["file2", "file10", "file1"] {
            backend.write(name, None, b"x").await.unwrap();
        }
        let page = backend.list_files(".", 10, None).await.unwrap();
        assert_eq!(page.names, vec!["file1", "file2", "file10"]);
    }

    #[tokio::test]
    async fn delete_missing_file_is_not_an_error() {
        let (_dir, backend) = setup();
        backend.delete_file("nope").await.unwrap();
    }

    #[tokio::test]
    async fn write_lock_is_exclusive() {
        let (_dir, backend) = setup();
        let info = WriteLockInfo {
            owner: "owner-a".to_string(),
            acquired_at: Utc::now(),
            timestamp: 1,
        };
        assert!(backend.acquire_write_lock(".db/write.lock", &info).await.unwrap());
        let other = WriteLockInfo {
            owner: "owner-b".to_string(),
            acquired_at: Utc::now(),
            timestamp: 2,
        };
        assert!(!backend
            .acquire_write_lock(".db/write.lock", &other)
            .await
            .unwrap());
        let checked = backend.check_write_lock(".db/write.lock").await.unwrap().unwrap();
        assert_eq!(checked.owner, "owner-a");
    }

    #[tokio::test]
    async fn invalid_lock_json_reads_as_absent() {
        let (_dir, backend) = setup();
        backend.write(".db/write.lock", None, b"not json").await.unwrap();
        assert!(backend.check_write_lock(".db/write.lock").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn write_stream_reads_full_body() {
        let (dir, backend) = setup();
        let data = vec![7u8; 1 << 20];
        let src_path = dir.path().join("src.bin");
        tokio::fs::write(&src_path, &data).await.unwrap();
        let src_file = tokio::fs::File::open(&src_path).await.unwrap();
        let reader: BoxAsyncRead = Box::pin(src_file);
        backend
            .write_stream("big.bin", None, reader, Some(data.len() as u64))
            .await
            .unwrap();
        let mut out = Vec::new();
        let mut stream = backend.read_stream("big.bin").await.unwrap().unwrap();
        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, data);
    }
}

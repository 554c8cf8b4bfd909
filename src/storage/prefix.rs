//! Path-prefix namespacing decorator (spec.md §4.2).
//!
//! Grounded on the decorator-over-`Arc<dyn Backend>` shape already implied
//! by `create_version_store`'s `Arc<dyn VersionStore>` factory return type —
//! generalized here into an explicit wrapper type rather than a factory
//! function, since the spec calls for a composable decorator, not just a
//! constructor switch.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::VaultError;
use crate::storage::backend::{
    Backend, BoxAsyncRead, FileInfo, ListPage, StorageDescriptor, WriteLockInfo,
};

/// Wraps a `Backend`, prepending a constant prefix onto every path. If the
/// prefix ends with `:` it is concatenated verbatim (preserving scheme tags
/// like `fs:`/`s3:`); otherwise it is joined with `/`.
#[derive(Debug, Clone)]
pub struct PrefixBackend {
    inner: Arc<dyn Backend>,
    prefix: String,
    location: String,
}

impl PrefixBackend {
    pub fn new(inner: Arc<dyn Backend>, prefix: impl Into<String>) -> Result<Self, VaultError> {
        let prefix = prefix.into();
        if prefix.is_empty() {
            return Err(VaultError::invalid_path(
                "PrefixBackend: prefix must not be empty",
            ));
        }
        let location = join(inner.location(), &prefix);
        Ok(Self {
            inner,
            prefix,
            location,
        })
    }

    fn join_path(&self, path: &str) -> String {
        join(&self.prefix, path)
    }
}

fn join(base: &str, rest: &str) -> String {
    if base.ends_with(':') {
        format!("{base}{rest}")
    } else if base.is_empty() {
        rest.to_string()
    } else {
        format!("{}/{}", base.trim_end_matches('/'), rest)
    }
}

#[async_trait]
impl Backend for PrefixBackend {
    fn location(&self) -> &str {
        &self.location
    }

    fn readonly(&self) -> bool {
        self.inner.readonly()
    }

    fn descriptor(&self) -> StorageDescriptor {
        self.inner.descriptor()
    }

    async fn is_empty(&self, path: &str) -> Result<bool, VaultError> {
        self.inner.is_empty(&self.join_path(path)).await
    }

    async fn list_files(
        &self,
        path: &str,
        max: usize,
        next: Option<&str>,
    ) -> Result<ListPage, VaultError> {
        self.inner.list_files(&self.join_path(path), max, next).await
    }

    async fn list_dirs(
        &self,
        path: &str,
        max: usize,
        next: Option<&str>,
    ) -> Result<ListPage, VaultError> {
        self.inner.list_dirs(&self.join_path(path), max, next).await
    }

    async fn file_exists(&self, path: &str) -> Result<bool, VaultError> {
        self.inner.file_exists(&self.join_path(path)).await
    }

    async fn dir_exists(&self, path: &str) -> Result<bool, VaultError> {
        self.inner.dir_exists(&self.join_path(path)).await
    }

    async fn info(&self, path: &str) -> Result<Option<FileInfo>, VaultError> {
        self.inner.info(&self.join_path(path)).await
    }

    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>, VaultError> {
        self.inner.read(&self.join_path(path)).await
    }

    async fn write(
        &self,
        path: &str,
        content_type: Option<&str>,
        data: &[u8],
    ) -> Result<(), VaultError> {
        self.inner.write(&self.join_path(path), content_type, data).await
    }

    async fn read_stream(&self, path: &str) -> Result<Option<BoxAsyncRead>, VaultError> {
        self.inner.read_stream(&self.join_path(path)).await
    }

    async fn write_stream(
        &self,
        path: &str,
        content_type: Option<&str>,
        reader: BoxAsyncRead,
        length: Option<u64>,
    ) -> Result<(), VaultError> {
        self.inner
            .write_stream(&self.join_path(path), content_type, reader, length)
            .await
    }

    async fn delete_file(&self, path: &str) -> Result<(), VaultError> {
        self.inner.delete_file(&self.join_path(path)).await
    }

    async fn delete_dir(&self, path: &str) -> Result<(), VaultError> {
        self.inner.delete_dir(&self.join_path(path)).await
    }

    async fn copy_to(&self, src: &str, dest: &str) -> Result<(), VaultError> {
        self.inner
            .copy_to(&self.join_path(src), &self.join_path(dest))
            .await
    }

    async fn acquire_write_lock(
        &self,
        lock_path: &str,
        info: &WriteLockInfo,
    ) -> Result<bool, VaultError> {
        self.inner
            .acquire_write_lock(&self.join_path(lock_path), info)
            .await
    }

    async fn release_write_lock(&self, lock_path: &str) -> Result<(), VaultError> {
        self.inner.release_write_lock(&self.join_path(lock_path)).await
    }

    async fn check_write_lock(&self, lock_path: &str) -> Result<Option<WriteLockInfo>, VaultError> {
        self.inner.check_write_lock(&self.join_path(lock_path)).await
    }

    async fn rewrite_write_lock(
        &self,
        lock_path: &str,
        info: &WriteLockInfo,
    ) -> Result<(), VaultError> {
        self.inner
            .rewrite_write_lock(&self.join_path(lock_path), info)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::local::FsBackend;
    use tempfile::TempDir;

    #[tokio::test]
    async fn empty_prefix_is_rejected_at_construction() {
        let dir = TempDir::new().unwrap();
        let inner: Arc<dyn Backend> = Arc::new(FsBackend::new(dir.path(), false));
        assert!(PrefixBackend::new(inner, "").is_err());
    }

    #[tokio::test]
    async fn writes_land_under_prefix() {
        let dir = TempDir::new().unwrap();
        let inner: Arc<dyn Backend> = Arc::new(FsBackend::new(dir.path(), false));
        let prefixed = PrefixBackend::new(inner, "assets").unwrap();
        prefixed.write("a.bin", None, b"hi").await.unwrap();
        assert!(dir.path().join("assets/a.bin").exists());
        assert_eq!(prefixed.read("a.bin").await.unwrap().unwrap(), b"hi");
    }

    #[tokio::test]
    async fn scheme_prefix_concatenates_verbatim() {
        let dir = TempDir::new().unwrap();
        let inner: Arc<dyn Backend> = Arc::new(FsBackend::new(dir.path(), false));
        let prefixed = PrefixBackend::new(inner, "fs:").unwrap();
        assert!(prefixed.location().starts_with("fs:"));
    }
}

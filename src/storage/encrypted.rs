//! Encryption-at-rest decorator (spec.md §4.2): intercepts `read`/`write`/
//! `read_stream`/`write_stream`, passes everything else straight through to
//! the wrapped backend.
//!
//! `info().length` is whatever the inner backend reports — the on-disk,
//! encrypted size. Callers already treat `length` as opaque (it only ever
//! feeds progress bars and `Content-Length` headers), so no correction is
//! needed here.
//!
//! Grounded on the same decorator shape as [`crate::storage::prefix`];
//! the actual cipher work is [`crate::crypto`]'s job, not this module's.

use std::sync::Arc;

use async_trait::async_trait;
use rsa::RsaPublicKey;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::crypto::{decrypt_buffer, encrypt_buffer, PrivateKeyMap, StreamDecryptor, StreamEncryptor};
use crate::error::VaultError;
use crate::storage::backend::{
    guard_readonly, Backend, BoxAsyncRead, FileInfo, ListPage, StorageDescriptor, WriteLockInfo,
};

const STREAM_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct EncryptedBackend {
    inner: Arc<dyn Backend>,
    public_key: RsaPublicKey,
    key_map: PrivateKeyMap,
}

impl EncryptedBackend {
    pub fn new(inner: Arc<dyn Backend>, public_key: RsaPublicKey, key_map: PrivateKeyMap) -> Self {
        Self {
            inner,
            public_key,
            key_map,
        }
    }
}

#[async_trait]
impl Backend for EncryptedBackend {
    fn location(&self) -> &str {
        self.inner.location()
    }

    fn readonly(&self) -> bool {
        self.inner.readonly()
    }

    fn descriptor(&self) -> StorageDescriptor {
        self.inner.descriptor()
    }

    async fn is_empty(&self, path: &str) -> Result<bool, VaultError> {
        self.inner.is_empty(path).await
    }

    async fn list_files(
        &self,
        path: &str,
        max: usize,
        next: Option<&str>,
    ) -> Result<ListPage, VaultError> {
        self.inner.list_files(path, max, next).await
    }

    async fn list_dirs(
        &self,
        path: &str,
        max: usize,
        next: Option<&str>,
    ) -> Result<ListPage, VaultError> {
        self.inner.list_dirs(path, max, next).await
    }

    async fn file_exists(&self, path: &str) -> Result<bool, VaultError> {
        self.inner.file_exists(path).await
    }

    async fn dir_exists(&self, path: &str) -> Result<bool, VaultError> {
        self.inner.dir_exists(path).await
    }

    async fn info(&self, path: &str) -> Result<Option<FileInfo>, VaultError> {
        self.inner.info(path).await
    }

    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>, VaultError> {
        let Some(ciphertext) = self.inner.read(path).await? else {
            return Ok(None);
        };
        Ok(Some(decrypt_buffer(&ciphertext, &self.key_map)?))
    }

    async fn write(
        &self,
        path: &str,
        content_type: Option<&str>,
        data: &[u8],
    ) -> Result<(), VaultError> {
        guard_readonly(self, "write")?;
        let ciphertext = encrypt_buffer(&self.public_key, data)?;
        self.inner.write(path, content_type, &ciphertext).await
    }

    async fn read_stream(&self, path: &str) -> Result<Option<BoxAsyncRead>, VaultError> {
        let Some(mut inner_reader) = self.inner.read_stream(path).await? else {
            return Ok(None);
        };
        let key_map = self.key_map.clone();
        let (mut writer, reader) = tokio::io::duplex(STREAM_CHUNK);
        tokio::spawn(async move {
            let mut decryptor = StreamDecryptor::new(key_map);
            let mut buf = vec![0u8; STREAM_CHUNK];
            loop {
                let n = match inner_reader.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(_) => return,
                };
                match decryptor.update(&buf[..n]) {
                    Ok(plaintext) if !plaintext.is_empty() => {
                        if writer.write_all(&plaintext).await.is_err() {
                            return;
                        }
                    }
                    Ok(_) => {}
                    Err(_) => return,
                }
            }
            if let Ok(tail) = decryptor.finalize() {
                let _ = writer.write_all(&tail).await;
            }
        });
        Ok(Some(Box::pin(reader)))
    }

    async fn write_stream(
        &self,
        path: &str,
        content_type: Option<&str>,
        mut reader: BoxAsyncRead,
        _length: Option<u64>,
    ) -> Result<(), VaultError> {
        guard_readonly(self, "write_stream")?;
        let public_key = self.public_key.clone();
        let (mut writer, encrypted_reader) = tokio::io::duplex(STREAM_CHUNK);

        let encrypt_task = tokio::spawn(async move {
            let mut encryptor = StreamEncryptor::new(&public_key)?;
            let mut buf = vec![0u8; STREAM_CHUNK];
            loop {
                let n = reader
                    .read(&mut buf)
                    .await
                    .map_err(VaultError::from)?;
                if n == 0 {
                    break;
                }
                let ciphertext = encryptor.update(&buf[..n]);
                if !ciphertext.is_empty() {
                    writer
                        .write_all(&ciphertext)
                        .await
                        .map_err(VaultError::from)?;
                }
            }
            let tail = encryptor.finalize();
            if !tail.is_empty() {
                writer.write_all(&tail).await.map_err(VaultError::from)?;
            }
            Ok::<(), VaultError>(())
        });

        self.inner
            .write_stream(path, content_type, Box::pin(encrypted_reader), None)
            .await?;
        encrypt_task
            .await
            .map_err(|e| VaultError::basic_str(format!("encryption task panicked: {e}")))??;
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<(), VaultError> {
        self.inner.delete_file(path).await
    }

    async fn delete_dir(&self, path: &str) -> Result<(), VaultError> {
        self.inner.delete_dir(path).await
    }

    async fn copy_to(&self, src: &str, dest: &str) -> Result<(), VaultError> {
        self.inner.copy_to(src, dest).await
    }

    async fn acquire_write_lock(
        &self,
        lock_path: &str,
        info: &WriteLockInfo,
    ) -> Result<bool, VaultError> {
        self.inner.acquire_write_lock(lock_path, info).await
    }

    async fn release_write_lock(&self, lock_path: &str) -> Result<(), VaultError> {
        self.inner.release_write_lock(lock_path).await
    }

    async fn check_write_lock(&self, lock_path: &str) -> Result<Option<WriteLockInfo>, VaultError> {
        self.inner.check_write_lock(lock_path).await
    }

    async fn rewrite_write_lock(
        &self,
        lock_path: &str,
        info: &WriteLockInfo,
    ) -> Result<(), VaultError> {
        self.inner.rewrite_write_lock(lock_path, info).await
    }
}

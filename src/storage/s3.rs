//! S3-compatible object store implementation of the `Backend` trait.
//!
//! The teacher's own `storage/s3.rs` is a `TODO`-stubbed skeleton; this is a
//! from-scratch implementation against `aws-sdk-s3` (the same crate family
//! used for S3 access elsewhere in the retrieval corpus, e.g.
//! `saworbit-orbit`'s `s3-native` feature and
//! `ADI-Foundation-Labs-ADI-Stack-Server`'s storage layer), shaped to match
//! the same trait the `fs` backend implements (spec.md §4.1).

use std::time::SystemTime;

use async_trait::async_trait;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use tokio::io::AsyncReadExt;

use crate::constants::S3_DELETE_BATCH_MAX;
use crate::error::VaultError;
use crate::storage::backend::{
    Backend, BoxAsyncRead, FileInfo, ListPage, StorageDescriptor, WriteLockInfo,
};

/// Explicit credentials, taking precedence over the environment (spec.md §6).
#[derive(Debug, Clone, Default)]
pub struct S3Credentials {
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
}

impl S3Credentials {
    /// Reads `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`,
    /// `AWS_DEFAULT_REGION`/`AWS_REGION`, and `AWS_ENDPOINT` when not already
    /// set explicitly.
    pub fn from_env_or(self) -> Self {
        S3Credentials {
            access_key_id: self
                .access_key_id
                .or_else(|| std::env::var("AWS_ACCESS_KEY_ID").ok()),
            secret_access_key: self
                .secret_access_key
                .or_else(|| std::env::var("AWS_SECRET_ACCESS_KEY").ok()),
            region: self.region.or_else(|| {
                std::env::var("AWS_DEFAULT_REGION")
                    .or_else(|_| std::env::var("AWS_REGION"))
                    .ok()
            }),
            endpoint: self.endpoint.or_else(|| std::env::var("AWS_ENDPOINT").ok()),
        }
    }
}

#[derive(Debug)]
pub struct S3Backend {
    client: Client,
    bucket: String,
    prefix: String,
    readonly: bool,
    endpoint: Option<String>,
    location: String,
}

impl S3Backend {
    pub async fn new(
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        readonly: bool,
        creds: S3Credentials,
    ) -> Result<Self, VaultError> {
        let bucket = bucket.into();
        let prefix = prefix.into().trim_matches('/').to_string();
        let creds = creds.from_env_or();

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &creds.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        if let (Some(key), Some(secret)) = (&creds.access_key_id, &creds.secret_access_key) {
            loader = loader.credentials_provider(Credentials::new(
                key.clone(),
                secret.clone(),
                None,
                None,
                "mediavault-explicit",
            ));
        }
        if let Some(endpoint) = &creds.endpoint {
            loader = loader.endpoint_url(endpoint.clone());
        }
        let config = loader.load().await;
        let client = Client::new(&config);

        let location = if prefix.is_empty() {
            format!("s3:{}", bucket)
        } else {
            format!("s3:{}/{}", bucket, prefix)
        };

        Ok(Self {
            client,
            bucket,
            prefix,
            readonly,
            endpoint: creds.endpoint,
            location,
        })
    }

    fn object_key(&self, path: &str) -> String {
        if self.prefix.is_empty() {
            path.to_string()
        } else {
            format!("{}/{}", self.prefix, path)
        }
    }

    fn guard_write(&self, op: &str) -> Result<(), VaultError> {
        if self.readonly {
            return Err(VaultError::readonly(op));
        }
        Ok(())
    }

    fn is_precondition_failed<E>(err: &aws_sdk_s3::error::SdkError<E, aws_smithy_runtime_api::http::Response>) -> bool {
        match err {
            aws_sdk_s3::error::SdkError::ServiceError(ctx) => {
                ctx.raw().status().as_u16() == 412
            }
            _ => false,
        }
    }
}

#[async_trait]
impl Backend for S3Backend {
    fn location(&self) -> &str {
        &self.location
    }

    fn readonly(&self) -> bool {
        self.readonly
    }

    fn descriptor(&self) -> StorageDescriptor {
        StorageDescriptor::S3 {
            bucket: self.bucket.clone(),
            prefix: self.prefix.clone(),
            readonly: self.readonly,
            endpoint: self.endpoint.clone(),
        }
    }

    async fn is_empty(&self, path: &str) -> Result<bool, VaultError> {
        let prefix = self.object_key(path);
        let resp = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(format!("{}/", prefix.trim_end_matches('/')))
            .max_keys(1)
            .send()
            .await
            .map_err(|e| VaultError::s3(e.to_string()))?;
        Ok(resp.contents().is_empty())
    }

    async fn list_files(
        &self,
        path: &str,
        max: usize,
        next: Option<&str>,
    ) -> Result<ListPage, VaultError> {
        let prefix = format!("{}/", self.object_key(path).trim_end_matches('/'));
        let mut req = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&prefix)
            .delimiter("/")
            .max_keys(max as i32);
        if let Some(token) = next {
            req = req.continuation_token(token);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| VaultError::s3(e.to_string()))?;

        let names = resp
            .contents()
            .iter()
            .filter_map(|obj| obj.key())
            .filter_map(|key| key.strip_prefix(&prefix))
            .filter(|name| !name.is_empty())
            .map(|name| name.to_string())
            .collect();

        Ok(ListPage {
            names,
            next: resp.next_continuation_token().map(|s| s.to_string()),
        })
    }

    async fn list_dirs(
        &self,
        path: &str,
        max: usize,
        next: Option<&str>,
    ) -> Result<ListPage, VaultError> {
        let prefix = format!("{}/", self.object_key(path).trim_end_matches('/'));
        let mut req = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&prefix)
            .delimiter("/")
            .max_keys(max as i32);
        if let Some(token) = next {
            req = req.continuation_token(token);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| VaultError::s3(e.to_string()))?;

        // Directory names have their trailing slash stripped, matching the
        // `fs` backend's bare-name convention (spec.md §9, Open Questions).
        let names = resp
            .common_prefixes()
            .iter()
            .filter_map(|cp| cp.prefix())
            .filter_map(|p| p.strip_prefix(&prefix))
            .map(|name| name.trim_end_matches('/').to_string())
            .filter(|name| !name.is_empty())
            .collect();

        Ok(ListPage {
            names,
            next: resp.next_continuation_token().map(|s| s.to_string()),
        })
    }

    async fn file_exists(&self, path: &str) -> Result<bool, VaultError> {
        Ok(self.info(path).await?.is_some())
    }

    async fn dir_exists(&self, path: &str) -> Result<bool, VaultError> {
        // S3 has no directories: true iff at least one object has this
        // prefix. An empty "directory" therefore reads as absent — this
        // matches the source behavior noted in spec.md §9 Open Questions.
        Ok(!self.is_empty(path).await?)
    }

    async fn info(&self, path: &str) -> Result<Option<FileInfo>, VaultError> {
        let key = self.object_key(path);
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(resp) => {
                let last_modified = resp
                    .last_modified()
                    .and_then(|t| SystemTime::try_from(*t).ok())
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(Utc::now);
                Ok(Some(FileInfo {
                    content_type: resp.content_type().map(|s| s.to_string()),
                    length: resp.content_length().unwrap_or(0) as u64,
                    last_modified,
                }))
            }
            Err(err) => {
                if is_not_found(&err) {
                    Ok(None)
                } else {
                    Err(VaultError::s3(err.to_string()))
                }
            }
        }
    }

    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>, VaultError> {
        let key = self.object_key(path);
        match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(resp) => {
                let bytes = resp
                    .body
                    .collect()
                    .await
                    .map_err(|e| VaultError::s3(e.to_string()))?
                    .into_bytes();
                Ok(Some(bytes.to_vec()))
            }
            Err(err) => {
                if is_not_found(&err) {
                    Ok(None)
                } else {
                    Err(VaultError::s3(err.to_string()))
                }
            }
        }
    }

    async fn write(
        &self,
        path: &str,
        content_type: Option<&str>,
        data: &[u8],
    ) -> Result<(), VaultError> {
        self.guard_write("write")?;
        let key = self.object_key(path);
        let mut req = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(data.to_vec()));
        if let Some(ct) = content_type {
            req = req.content_type(ct);
        }
        req.send().await.map_err(|e| VaultError::s3(e.to_string()))?;
        Ok(())
    }

    async fn read_stream(&self, path: &str) -> Result<Option<BoxAsyncRead>, VaultError> {
        let key = self.object_key(path);
        match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(resp) => Ok(Some(Box::pin(resp.body.into_async_read()))),
            Err(err) => {
                if is_not_found(&err) {
                    Ok(None)
                } else {
                    Err(VaultError::s3(err.to_string()))
                }
            }
        }
    }

    async fn write_stream(
        &self,
        path: &str,
        content_type: Option<&str>,
        mut reader: BoxAsyncRead,
        _length: Option<u64>,
    ) -> Result<(), VaultError> {
        self.guard_write("write_stream")?;
        // S3's PUT needs a known content length up front; buffer the
        // stream into memory rather than claim chunked-upload semantics we
        // don't implement.
        let mut buf = Vec::new();
        reader
            .read_to_end(&mut buf)
            .await
            .map_err(VaultError::from)?;
        self.write(path, content_type, &buf).await
    }

    async fn delete_file(&self, path: &str) -> Result<(), VaultError> {
        self.guard_write("delete_file")?;
        let key = self.object_key(path);
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| VaultError::s3(e.to_string()))?;
        Ok(())
    }

    async fn delete_dir(&self, path: &str) -> Result<(), VaultError> {
        self.guard_write("delete_dir")?;
        let prefix = format!("{}/", self.object_key(path).trim_end_matches('/'));
        let mut continuation = None;
        loop {
            let mut req = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix);
            if let Some(token) = &continuation {
                req = req.continuation_token(token.clone());
            }
            let resp = req
                .send()
                .await
                .map_err(|e| VaultError::s3(e.to_string()))?;

            let keys: Vec<String> = resp
                .contents()
                .iter()
                .filter_map(|o| o.key())
                .map(|k| k.to_string())
                .collect();

            for batch in keys.chunks(S3_DELETE_BATCH_MAX) {
                let objects: Result<Vec<_>, _> = batch
                    .iter()
                    .map(|k| {
                        aws_sdk_s3::types::ObjectIdentifier::builder()
                            .key(k)
                            .build()
                    })
                    .collect();
                let objects = objects.map_err(|e| VaultError::s3(e.to_string()))?;
                let delete = aws_sdk_s3::types::Delete::builder()
                    .set_objects(Some(objects))
                    .quiet(true)
                    .build()
                    .map_err(|e| VaultError::s3(e.to_string()))?;
                self.client
                    .delete_objects()
                    .bucket(&self.bucket)
                    .delete(delete)
                    .send()
                    .await
                    .map_err(|e| VaultError::s3(e.to_string()))?;
            }

            if resp.is_truncated().unwrap_or(false) {
                continuation = resp.next_continuation_token().map(|s| s.to_string());
            } else {
                break;
            }
        }
        Ok(())
    }

    async fn copy_to(&self, src: &str, dest: &str) -> Result<(), VaultError> {
        self.guard_write("copy_to")?;
        let src_key = self.object_key(src);
        let dest_key = self.object_key(dest);
        let copy_source = format!(
            "{}/{}",
            self.bucket,
            urlencoding_path(&src_key)
        );
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(copy_source)
            .key(&dest_key)
            .send()
            .await
            .map_err(|e| VaultError::s3(e.to_string()))?;
        Ok(())
    }

    async fn acquire_write_lock(
        &self,
        lock_path: &str,
        info: &WriteLockInfo,
    ) -> Result<bool, VaultError> {
        self.guard_write("acquire_write_lock")?;
        let key = self.object_key(lock_path);
        let payload = serde_json::to_vec(info).map_err(VaultError::from)?;
        let result = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type("application/json")
            .if_none_match("*")
            .body(ByteStream::from(payload))
            .send()
            .await;
        match result {
            Ok(_) => Ok(true),
            Err(err) if Self::is_precondition_failed(&err) => Ok(false),
            Err(err) => Err(VaultError::s3(err.to_string())),
        }
    }

    async fn release_write_lock(&self, lock_path: &str) -> Result<(), VaultError> {
        self.delete_file(lock_path).await
    }

    async fn check_write_lock(&self, lock_path: &str) -> Result<Option<WriteLockInfo>, VaultError> {
        match self.read(lock_path).await? {
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
        self.write(lock_path, Some("application/json"), &serde_json::to_vec(info)?)
            .await
    }
}

fn is_not_found<E: std::fmt::Debug>(err: &aws_sdk_s3::error::SdkError<E, aws_smithy_runtime_api::http::Response>) -> bool {
    matches!(err, aws_sdk_s3::error::SdkError::ServiceError(ctx) if ctx.raw().status().as_u16() == 404)
}

fn urlencoding_path(path: &str) -> String {
    path.split('/')
        .map(|seg| {
            seg.chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~') {
                        c.to_string()
                    } else {
                        format!("%{:02X}", c as u32)
                    }
                })
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("/")
}

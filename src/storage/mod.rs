//! Storage backends and decorators (spec.md §4.1, §4.2).
//!
//! Grounded on `oxen-rust/src/lib/src/storage/mod.rs`'s module layout: one
//! trait module, one module per concrete backend, plus thin wrapper types
//! composed over `Arc<dyn Backend>`.

pub mod backend;
pub mod encrypted;
pub mod local;
pub mod location;
pub mod prefix;
pub mod s3;

pub use backend::{
    guard_readonly, Backend, BoxAsyncRead, FileInfo, ListPage, StorageDescriptor, WriteLockInfo,
};
pub use encrypted::EncryptedBackend;
pub use local::FsBackend;
pub use location::{parse_location, Location};
pub use prefix::PrefixBackend;
pub use s3::{S3Backend, S3Credentials};

use std::sync::Arc;

use crate::error::VaultError;

/// Constructs the concrete `Backend` a [`StorageDescriptor`] names. Used by
/// workers to rebuild the backend they need instead of sharing one across
/// a thread boundary (spec.md §5).
pub async fn backend_from_descriptor(
    descriptor: &StorageDescriptor,
) -> Result<Arc<dyn Backend>, VaultError> {
    match descriptor {
        StorageDescriptor::Fs { root, readonly } => {
            Ok(Arc::new(FsBackend::new(root, *readonly)))
        }
        StorageDescriptor::S3 {
            bucket,
            prefix,
            readonly,
            endpoint,
        } => {
            let creds = S3Credentials {
                endpoint: endpoint.clone(),
                ..Default::default()
            };
            let backend = S3Backend::new(bucket.clone(), prefix.clone(), *readonly, creds).await?;
            Ok(Arc::new(backend))
        }
    }
}

/// Builds a `Backend` from an `fs:`/`s3:` location URI (spec.md §6).
pub async fn backend_from_location(
    uri: &str,
    readonly: bool,
) -> Result<Arc<dyn Backend>, VaultError> {
    match parse_location(uri)? {
        Location::Fs(root) => Ok(Arc::new(FsBackend::new(root, readonly))),
        Location::S3 { bucket, prefix } => {
            let backend =
                S3Backend::new(bucket, prefix, readonly, S3Credentials::default()).await?;
            Ok(Arc::new(backend))
        }
    }
}

//! Errors for the mediavault-core library
//!
//! Enumeration for all errors that can occur in the storage, encryption,
//! Merkle tree, and asset engine layers.
//!

use derive_more::{Display, Error};
use std::io;
use std::num::ParseIntError;
use std::path::StripPrefixError;

pub mod path_buf_error;
pub mod string_error;

pub use crate::error::path_buf_error::PathBufError;
pub use crate::error::string_error::StringError;

#[derive(Debug, Display, Error)]
pub enum VaultError {
    /// Resource absent. `read`/`info` return `Option::None` instead of this
    /// variant; this variant is surfaced only where absence cannot be
    /// expressed as an `Option` (e.g. `copy_to` source missing).
    NotFound(Box<PathBufError>),

    /// A mutating operation was attempted on a readonly backend.
    Readonly(StringError),

    /// `acquire_write_lock` found the lock already held by a live owner.
    LockHeld(StringError),

    /// The lock refresher observed a foreign owner; writes must stop.
    LockLost(StringError),

    /// A rehash disagreed with the recorded hash.
    HashMismatch(Box<HashMismatch>),

    /// A key required to decrypt was entirely absent (no map, no default).
    KeyMissing(StringError),

    /// A specific key hash was required and not present in the key map.
    NoKey(StringError),

    /// Encrypted data declared a format version/type this build does not
    /// understand, and no `"default"` fallback key was supplied.
    FormatVersion(StringError),

    /// Malformed location URI or empty prefix; a programmer error.
    InvalidPath(StringError),

    /// Wrapped I/O error, not yet classified as transient or fatal.
    IO(io::Error),

    /// An operation that exhausted its retry budget.
    Transient(StringError),

    // External library errors
    JSON(serde_json::Error),
    UuidError(uuid::Error),
    Encoding(std::str::Utf8Error),
    Rsa(rsa::Error),
    Pkcs8(String),
    S3(StringError),

    /// Fallback for ad hoc messages.
    Basic(StringError),
}

#[derive(Debug, Clone)]
pub struct HashMismatch {
    pub path: String,
    pub expected: String,
    pub actual: String,
}

impl std::fmt::Display for HashMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "hash mismatch for {}: expected {} got {}",
            self.path, self.expected, self.actual
        )
    }
}
impl std::error::Error for HashMismatch {}

impl VaultError {
    pub fn basic_str(s: impl AsRef<str>) -> Self {
        VaultError::Basic(StringError::from(s.as_ref()))
    }

    pub fn not_found(path: impl AsRef<std::path::Path>) -> Self {
        VaultError::NotFound(Box::new(path.as_ref().into()))
    }

    pub fn readonly(op: impl AsRef<str>) -> Self {
        VaultError::Readonly(StringError::from(format!(
            "operation `{}` is not permitted on a readonly backend",
            op.as_ref()
        )))
    }

    pub fn lock_held(path: impl AsRef<str>) -> Self {
        VaultError::LockHeld(StringError::from(format!(
            "write lock already held: {}",
            path.as_ref()
        )))
    }

    pub fn lock_lost(owner: impl AsRef<str>) -> Self {
        VaultError::LockLost(StringError::from(format!(
            "write lock refresh observed foreign owner, expected {}",
            owner.as_ref()
        )))
    }

    pub fn hash_mismatch(
        path: impl AsRef<str>,
        expected: impl AsRef<str>,
        actual: impl AsRef<str>,
    ) -> Self {
        VaultError::HashMismatch(Box::new(HashMismatch {
            path: path.as_ref().to_string(),
            expected: expected.as_ref().to_string(),
            actual: actual.as_ref().to_string(),
        }))
    }

    pub fn key_missing(msg: impl AsRef<str>) -> Self {
        VaultError::KeyMissing(StringError::from(msg.as_ref()))
    }

    pub fn no_key(key_hash_hex: impl AsRef<str>) -> Self {
        VaultError::NoKey(StringError::from(format!(
            "no decryption key for hash {}",
            key_hash_hex.as_ref()
        )))
    }

    pub fn format_version(msg: impl AsRef<str>) -> Self {
        VaultError::FormatVersion(StringError::from(msg.as_ref()))
    }

    pub fn invalid_path(msg: impl AsRef<str>) -> Self {
        VaultError::InvalidPath(StringError::from(msg.as_ref()))
    }

    pub fn transient(msg: impl AsRef<str>) -> Self {
        VaultError::Transient(StringError::from(msg.as_ref()))
    }

    pub fn s3(msg: impl AsRef<str>) -> Self {
        VaultError::S3(StringError::from(msg.as_ref()))
    }

    /// True if the error is worth retrying with backoff (see
    /// `util::retry::with_backoff`).
    pub fn is_transient(&self) -> bool {
        matches!(self, VaultError::Transient(_) | VaultError::IO(_))
    }
}

impl From<io::Error> for VaultError {
    fn from(error: io::Error) -> Self {
        VaultError::IO(error)
    }
}

impl From<String> for VaultError {
    fn from(error: String) -> Self {
        VaultError::Basic(StringError::from(error))
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(error: serde_json::Error) -> Self {
        VaultError::JSON(error)
    }
}

impl From<uuid::Error> for VaultError {
    fn from(error: uuid::Error) -> Self {
        VaultError::UuidError(error)
    }
}

impl From<std::str::Utf8Error> for VaultError {
    fn from(error: std::str::Utf8Error) -> Self {
        VaultError::Encoding(error)
    }
}

impl From<rsa::Error> for VaultError {
    fn from(error: rsa::Error) -> Self {
        VaultError::Rsa(error)
    }
}

impl From<StripPrefixError> for VaultError {
    fn from(error: StripPrefixError) -> Self {
        VaultError::basic_str(format!("error stripping prefix: {}", error))
    }
}

impl From<ParseIntError> for VaultError {
    fn from(error: ParseIntError) -> Self {
        VaultError::basic_str(error.to_string())
    }
}

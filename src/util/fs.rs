//! Thin wrappers around `std::fs` that attach the failing path to the error
//! and log at the point of failure — the same convention as
//! `oxen-rust/src/lib/src/util/fs.rs`'s `create_dir_all`/`remove_dir_all`/
//! `write`/`rename` helpers.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::VaultError;

pub fn create_dir_all(path: impl AsRef<Path>) -> Result<(), VaultError> {
    let path = path.as_ref();
    if path.exists() {
        return Ok(());
    }
    fs::create_dir_all(path).map_err(|err| {
        log::error!("create_dir_all {:?}: {}", path, err);
        VaultError::IO(err)
    })
}

pub fn remove_dir_all(path: impl AsRef<Path>) -> Result<(), VaultError> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(());
    }
    fs::remove_dir_all(path).map_err(|err| {
        log::error!("remove_dir_all {:?}: {}", path, err);
        VaultError::IO(err)
    })
}

pub fn remove_file_if_exists(path: impl AsRef<Path>) -> Result<(), VaultError> {
    let path = path.as_ref();
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => {
            log::error!("remove_file {:?}: {}", path, err);
            Err(VaultError::IO(err))
        }
    }
}

/// Writes `data` to `path` atomically: write to a sibling temp file, then
/// rename over the destination. Readers therefore always see either the old
/// or the new contents, never a partial write (spec.md §5, tree-save
/// ordering guarantee on `fs`).
pub fn write_atomic(path: impl AsRef<Path>, data: &[u8]) -> Result<(), VaultError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    let mut tmp = NamedTempFile::new_in(path.parent().unwrap_or_else(|| Path::new(".")))
        .map_err(VaultError::from)?;
    tmp.write_all(data).map_err(VaultError::from)?;
    tmp.flush().map_err(VaultError::from)?;
    tmp.persist(path)
        .map_err(|err| VaultError::basic_str(format!("could not persist {:?}: {}", path, err.error)))?;
    Ok(())
}

pub fn read(path: impl AsRef<Path>) -> Result<Option<Vec<u8>>, VaultError> {
    let path = path.as_ref();
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => {
            log::error!("read {:?}: {}", path, err);
            Err(VaultError::IO(err))
        }
    }
}

/// Creates `path` exclusively, failing if it already exists — the primitive
/// that makes local write-lock acquisition atomic (spec.md §4.1).
pub fn create_new_exclusive(path: impl AsRef<Path>, data: &[u8]) -> Result<bool, VaultError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    match fs::OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(mut file) => {
            file.write_all(data).map_err(VaultError::from)?;
            Ok(true)
        }
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(err) => {
            log::error!("create_new_exclusive {:?}: {}", path, err);
            Err(VaultError::IO(err))
        }
    }
}

pub fn file_info(path: impl AsRef<Path>) -> Result<Option<std::fs::Metadata>, VaultError> {
    let path = path.as_ref();
    match fs::metadata(path) {
        Ok(meta) => Ok(Some(meta)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => {
            log::error!("metadata {:?}: {}", path, err);
            Err(VaultError::IO(err))
        }
    }
}

pub fn open(path: impl AsRef<Path>) -> Result<File, VaultError> {
    File::open(path.as_ref()).map_err(VaultError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn write_atomic_then_read_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a/b/file.bin");
        write_atomic(&path, b"hello").unwrap();
        assert_eq!(read(&path).unwrap().unwrap(), b"hello");
    }

    #[test]
    fn create_new_exclusive_is_atomic_per_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lock.json");
        assert!(create_new_exclusive(&path, b"{}").unwrap());
        assert!(!create_new_exclusive(&path, b"{}").unwrap());
    }

    #[test]
    fn remove_file_if_exists_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.txt");
        remove_file_if_exists(&path).unwrap();
    }
}

//! Key rotation decrypt scenario (spec.md §8): bytes written under an old
//! public key and bytes written under a newly rotated one must both decrypt
//! cleanly through a `key_map` carrying both private keys.

use std::sync::Arc;

use mediavault_core::crypto::{generate_key_pair, hash_public_key, PrivateKeyMap};
use mediavault_core::storage::{Backend, EncryptedBackend, FsBackend};
use tempfile::TempDir;

#[tokio::test]
async fn old_and_new_key_writes_both_decrypt_after_rotation() {
    let dir = TempDir::new().unwrap();
    let inner: Arc<dyn Backend> = Arc::new(FsBackend::new(dir.path(), false));

    let (old_private, old_public) = generate_key_pair().unwrap();
    let (new_private, new_public) = generate_key_pair().unwrap();

    let mut key_map = PrivateKeyMap::new();
    key_map.insert(hex::encode(hash_public_key(&old_public).unwrap()), old_private);
    key_map.insert(hex::encode(hash_public_key(&new_public).unwrap()), new_private);

    let old_backend = EncryptedBackend::new(Arc::clone(&inner), old_public, key_map.clone());
    old_backend.write("assets/before-rotation", None, b"written under the old key").await.unwrap();

    // Rotate: subsequent writes go out under the new public key, but the
    // key map still carries the old private key for existing ciphertext.
    let new_backend = EncryptedBackend::new(inner, new_public, key_map);
    new_backend.write("assets/after-rotation", None, b"written under the new key").await.unwrap();

    let old_plaintext = new_backend.read("assets/before-rotation").await.unwrap().unwrap();
    assert_eq!(old_plaintext, b"written under the old key");

    let new_plaintext = old_backend.read("assets/after-rotation").await.unwrap().unwrap();
    assert_eq!(new_plaintext, b"written under the new key");
}

#[tokio::test]
async fn missing_key_for_ciphertext_header_fails_to_decrypt() {
    let dir = TempDir::new().unwrap();
    let inner: Arc<dyn Backend> = Arc::new(FsBackend::new(dir.path(), false));

    let (write_private, write_public) = generate_key_pair().unwrap();
    let mut write_key_map = PrivateKeyMap::new();
    write_key_map.insert(hex::encode(hash_public_key(&write_public).unwrap()), write_private);
    let write_backend = EncryptedBackend::new(Arc::clone(&inner), write_public, write_key_map);
    write_backend.write("assets/orphaned", None, b"bytes nobody can read anymore").await.unwrap();

    let (other_private, other_public) = generate_key_pair().unwrap();
    let mut other_key_map = PrivateKeyMap::new();
    other_key_map.insert(hex::encode(hash_public_key(&other_public).unwrap()), other_private);
    let read_backend = EncryptedBackend::new(inner, other_public, other_key_map);

    assert!(read_backend.read("assets/orphaned").await.is_err());
}

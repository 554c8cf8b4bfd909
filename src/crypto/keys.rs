//! RSA-4096 keypair generation, PEM persistence, and the public-key hash
//! used to tag ciphertext to the key it was wrapped for (spec.md §4.3).

use std::collections::HashMap;
use std::path::Path;

use pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::error::VaultError;

pub const KEY_BITS: usize = 4096;

/// Lookup table from hex-encoded public-key hash to the matching private
/// key, plus an optional `"default"` entry used for legacy ciphertext and
/// as a fallback when a header names an unrecognized format (spec.md §4.3).
pub type PrivateKeyMap = HashMap<String, RsaPrivateKey>;

pub fn generate_key_pair() -> Result<(RsaPrivateKey, RsaPublicKey), VaultError> {
    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, KEY_BITS)
        .map_err(|e| VaultError::basic_str(format!("RSA key generation failed: {e}")))?;
    let public_key = RsaPublicKey::from(&private_key);
    Ok((private_key, public_key))
}

/// SHA-256 over the SPKI DER encoding of the public key. This, not the raw
/// modulus, is what ends up in the ciphertext header, so two semantically
/// identical keys loaded from different encodings always hash the same.
pub fn hash_public_key(public_key: &RsaPublicKey) -> Result<[u8; 32], VaultError> {
    let der = public_key
        .to_public_key_der()
        .map_err(|e| VaultError::Pkcs8(e.to_string()))?;
    let mut hasher = Sha256::new();
    hasher.update(der.as_bytes());
    Ok(hasher.finalize().into())
}

pub fn save_key_pair(
    private_key: &RsaPrivateKey,
    public_key: &RsaPublicKey,
    private_path: &Path,
    public_path: &Path,
) -> Result<(), VaultError> {
    private_key
        .write_pkcs8_pem_file(private_path, LineEnding::LF)
        .map_err(|e| VaultError::Pkcs8(e.to_string()))?;
    public_key
        .write_public_key_pem_file(public_path, LineEnding::LF)
        .map_err(|e| VaultError::Pkcs8(e.to_string()))?;
    Ok(())
}

/// Loads a PKCS#8 PEM private key and its SPKI PEM public key from
/// `{path}` and `{path}.pub`. Neither existing is not an error at this
/// layer — callers decide whether to generate a fresh pair.
pub fn load_key_pair(
    private_path: &Path,
    public_path: &Path,
) -> Result<Option<(RsaPrivateKey, RsaPublicKey)>, VaultError> {
    if !private_path.exists() || !public_path.exists() {
        return Ok(None);
    }
    let private_key = RsaPrivateKey::read_pkcs8_pem_file(private_path)
        .map_err(|e| VaultError::Pkcs8(e.to_string()))?;
    let public_key = RsaPublicKey::read_public_key_pem_file(public_path)
        .map_err(|e| VaultError::Pkcs8(e.to_string()))?;
    Ok(Some((private_key, public_key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn generated_public_key_hash_is_stable() {
        let (_priv, public_key) = generate_key_pair().unwrap();
        let a = hash_public_key(&public_key).unwrap();
        let b = hash_public_key(&public_key).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let (private_key, public_key) = generate_key_pair().unwrap();
        let priv_path = dir.path().join("id_rsa");
        let pub_path = dir.path().join("id_rsa.pub");
        save_key_pair(&private_key, &public_key, &priv_path, &pub_path).unwrap();

        let (loaded_private, loaded_public) = load_key_pair(&priv_path, &pub_path)
            .unwrap()
            .expect("key pair should exist after saving");
        assert_eq!(
            hash_public_key(&loaded_public).unwrap(),
            hash_public_key(&public_key).unwrap()
        );
        assert_eq!(
            loaded_private.to_public_key(),
            private_key.to_public_key()
        );
    }

    #[test]
    fn missing_key_pair_returns_none() {
        let dir = TempDir::new().unwrap();
        let result = load_key_pair(
            &dir.path().join("nope"),
            &dir.path().join("nope.pub"),
        )
        .unwrap();
        assert!(result.is_none());
    }
}

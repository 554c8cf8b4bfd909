//! Whole-buffer hybrid encrypt/decrypt (spec.md §4.3): generate a random
//! AES-256 key and IV, encrypt the payload with AES-256-CBC/PKCS7, wrap the
//! symmetric key with RSA-OAEP(SHA-256) under the recipient's public key,
//! and prepend the format header.
//!
//! Layout of a current-format ciphertext: `header(44) || wrapped_key(512)
//! || iv(16) || ciphertext`. Legacy ciphertexts (written before the header
//! existed) are just `wrapped_key(512) || iv(16) || ciphertext` and are
//! decrypted with whatever key the caller names `"default"`.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes256;
use rand::RngCore;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};

use crate::crypto::header::{EncryptionHeader, HEADER_LEN, IV_LEN, WRAPPED_KEY_LEN};
use crate::crypto::keys::{hash_public_key, PrivateKeyMap};
use crate::error::VaultError;

type CbcEnc = cbc::Encryptor<Aes256>;
type CbcDec = cbc::Decryptor<Aes256>;

fn wrap_key(public_key: &RsaPublicKey, key: &[u8]) -> Result<Vec<u8>, VaultError> {
    let mut rng = rand::thread_rng();
    public_key
        .encrypt(&mut rng, Oaep::new::<sha2::Sha256>(), key)
        .map_err(VaultError::from)
}

fn unwrap_key(private_key: &RsaPrivateKey, wrapped: &[u8]) -> Result<Vec<u8>, VaultError> {
    private_key
        .decrypt(Oaep::new::<sha2::Sha256>(), wrapped)
        .map_err(VaultError::from)
}

pub fn encrypt_buffer(public_key: &RsaPublicKey, plaintext: &[u8]) -> Result<Vec<u8>, VaultError> {
    let mut rng = rand::thread_rng();
    let mut key = [0u8; 32];
    rng.fill_bytes(&mut key);
    let mut iv = [0u8; IV_LEN];
    rng.fill_bytes(&mut iv);

    let ciphertext =
        CbcEnc::new(&key.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext);
    let wrapped = wrap_key(public_key, &key)?;
    let header = EncryptionHeader::current(hash_public_key(public_key)?);

    let mut out = Vec::with_capacity(HEADER_LEN + WRAPPED_KEY_LEN + IV_LEN + ciphertext.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(&wrapped);
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

pub fn decrypt_buffer(data: &[u8], key_map: &PrivateKeyMap) -> Result<Vec<u8>, VaultError> {
    let header = (data.len() >= HEADER_LEN)
        .then(|| EncryptionHeader::decode(&data[..HEADER_LEN]))
        .flatten();

    let (private_key, payload) = match &header {
        Some(header) => {
            let key_hash_hex = hex::encode(header.key_hash);
            let private_key = if header.is_supported() {
                key_map
                    .get(&key_hash_hex)
                    .ok_or_else(|| VaultError::no_key(&key_hash_hex))?
            } else {
                key_map.get("default").ok_or_else(|| {
                    VaultError::format_version(format!(
                        "unsupported ciphertext format version {}, no default key to fall back on",
                        header.version
                    ))
                })?
            };
            (private_key, &data[HEADER_LEN..])
        }
        None => {
            let private_key = key_map.get("default").ok_or_else(|| {
                VaultError::key_missing("legacy ciphertext requires a default key")
            })?;
            (private_key, data)
        }
    };

    if payload.len() < WRAPPED_KEY_LEN + IV_LEN {
        return Err(VaultError::format_version("truncated ciphertext"));
    }
    let wrapped = &payload[0..WRAPPED_KEY_LEN];
    let iv = &payload[WRAPPED_KEY_LEN..WRAPPED_KEY_LEN + IV_LEN];
    let ciphertext = &payload[WRAPPED_KEY_LEN + IV_LEN..];

    let key = unwrap_key(private_key, wrapped)?;

    CbcDec::new(key.as_slice().into(), iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|e| VaultError::basic_str(format!("CBC/PKCS7 unpad failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::generate_key_pair;

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let (private_key, public_key) = generate_key_pair().unwrap();
        let plaintext = b"the quick brown fox jumps over the lazy dog".to_vec();
        let ciphertext = encrypt_buffer(&public_key, &plaintext).unwrap();

        let key_hash_hex = hex::encode(hash_public_key(&public_key).unwrap());
        let mut map = PrivateKeyMap::new();
        map.insert(key_hash_hex, private_key);

        let decrypted = decrypt_buffer(&ciphertext, &map).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn supported_format_with_unmatched_key_hash_fails_even_with_default_present() {
        // spec.md §4.3: the "default" fallback only applies to an
        // unsupported version/type, not to a supported header whose
        // specific key hash is simply missing from the map.
        let (private_key, public_key) = generate_key_pair().unwrap();
        let ciphertext = encrypt_buffer(&public_key, b"payload").unwrap();

        let mut map = PrivateKeyMap::new();
        map.insert("default".to_string(), private_key);

        assert!(matches!(
            decrypt_buffer(&ciphertext, &map),
            Err(VaultError::NoKey(_))
        ));
    }

    #[test]
    fn unsupported_format_falls_back_to_default() {
        let (private_key, public_key) = generate_key_pair().unwrap();
        let mut ciphertext = encrypt_buffer(&public_key, b"payload").unwrap();
        // Corrupt the version field so the header is no longer "supported".
        ciphertext[4..8].copy_from_slice(&99u32.to_le_bytes());

        let mut map = PrivateKeyMap::new();
        map.insert("default".to_string(), private_key);

        let decrypted = decrypt_buffer(&ciphertext, &map).unwrap();
        assert_eq!(decrypted, b"payload");
    }

    #[test]
    fn missing_key_is_an_error() {
        let (_private_key, public_key) = generate_key_pair().unwrap();
        let ciphertext = encrypt_buffer(&public_key, b"payload").unwrap();
        let map = PrivateKeyMap::new();
        assert!(decrypt_buffer(&ciphertext, &map).is_err());
    }

    #[test]
    fn empty_plaintext_round_trips() {
        let (private_key, public_key) = generate_key_pair().unwrap();
        let ciphertext = encrypt_buffer(&public_key, b"").unwrap();
        let key_hash_hex = hex::encode(hash_public_key(&public_key).unwrap());
        let mut map = PrivateKeyMap::new();
        map.insert(key_hash_hex, private_key);
        assert_eq!(decrypt_buffer(&ciphertext, &map).unwrap(), b"");
    }
}

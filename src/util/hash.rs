//! SHA-256 helpers. The spec is explicit that file/leaf hashes are SHA-256
//! (unlike the teacher's xxh3-based `util::hasher`), so this module is
//! written fresh rather than adapted from `oxen-rust/src/lib/src/util/hasher.rs`.

use std::io::{self, Read};

use sha2::{Digest, Sha256};

use crate::error::VaultError;

pub fn hash_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hashes a reader in fixed-size chunks without buffering the whole file,
/// for use on large media assets during add/verify/replicate.
pub fn hash_reader(mut reader: impl Read) -> Result<[u8; 32], VaultError> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).map_err(VaultError::from)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}

pub fn hash_two(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

pub fn to_hex(hash: &[u8; 32]) -> String {
    hex::encode(hash)
}

pub fn from_hex(s: &str) -> Result<[u8; 32], VaultError> {
    let bytes =
        hex::decode(s).map_err(|e| VaultError::basic_str(format!("invalid hex hash: {}", e)))?;
    bytes
        .try_into()
        .map_err(|_| VaultError::basic_str("hash must be exactly 32 bytes"))
}

/// Reads into a scratch buffer while hashing, returning both the digest and
/// the number of bytes read — used by the streaming cipher tests and the
/// verify pipeline's full-rehash path.
pub fn hash_and_count(mut reader: impl Read) -> io::Result<([u8; 32], u64)> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((hasher.finalize().into(), total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn hash_bytes_matches_known_sha256() {
        let digest = hash_bytes(b"abc");
        assert_eq!(
            to_hex(&digest),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn hash_reader_matches_hash_bytes() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(1000);
        let from_bytes = hash_bytes(&data);
        let from_reader = hash_reader(Cursor::new(&data)).unwrap();
        assert_eq!(from_bytes, from_reader);
    }

    #[test]
    fn hex_round_trips() {
        let digest = hash_bytes(b"round trip");
        let hex = to_hex(&digest);
        assert_eq!(from_hex(&hex).unwrap(), digest);
    }
}

//! The 44-byte self-describing header prepended to every ciphertext written
//! in the current format (spec.md §4.3): a 4-byte tag, a little-endian
//! format version, a 4-byte encryption-type identifier, and the SHA-256
//! hash of the SPKI-DER-encoded public key the file was wrapped for.
//!
//! Ciphertexts written before this header existed ("legacy format") have
//! none of this and are detected by the absence of the `ENC1` tag at the
//! front of the stream.

pub const ENC1_TAG: &[u8; 4] = b"ENC1";
pub const ENC_TYPE: &[u8; 4] = b"A2CB";
pub const CURRENT_VERSION: u32 = 1;

pub const HEADER_LEN: usize = 44;
/// RSA-4096 OAEP(SHA-256)-wrapped AES-256 key length, in bytes.
pub const WRAPPED_KEY_LEN: usize = 512;
pub const IV_LEN: usize = 16;
const KEY_HASH_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptionHeader {
    pub version: u32,
    pub enc_type: [u8; 4],
    pub key_hash: [u8; 32],
}

impl EncryptionHeader {
    pub fn current(key_hash: [u8; 32]) -> Self {
        Self {
            version: CURRENT_VERSION,
            enc_type: *ENC_TYPE,
            key_hash,
        }
    }

    pub fn is_supported(&self) -> bool {
        self.version == CURRENT_VERSION && &self.enc_type == ENC_TYPE
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(ENC1_TAG);
        out[4..8].copy_from_slice(&self.version.to_le_bytes());
        out[8..12].copy_from_slice(&self.enc_type);
        out[12..12 + KEY_HASH_LEN].copy_from_slice(&self.key_hash);
        out
    }

    /// Returns `None` if `bytes` doesn't carry the `ENC1` tag, meaning the
    /// payload is either legacy-format or simply too short to be a header.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_LEN || &bytes[0..4] != ENC1_TAG {
            return None;
        }
        let version = u32::from_le_bytes(bytes[4..8].try_into().ok()?);
        let mut enc_type = [0u8; 4];
        enc_type.copy_from_slice(&bytes[8..12]);
        let mut key_hash = [0u8; 32];
        key_hash.copy_from_slice(&bytes[12..12 + KEY_HASH_LEN]);
        Some(Self {
            version,
            enc_type,
            key_hash,
        })
    }
}

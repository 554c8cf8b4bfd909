//! Incremental encrypt/decrypt state machines for large files (spec.md
//! §4.3): `update()` is called with each chunk read off disk or the wire,
//! `finalize()` flushes whatever PKCS7 padding logic the buffered tail
//! needs. Unlike `buffer::encrypt_buffer`/`decrypt_buffer`, callers never
//! need the whole file in memory at once.

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes256;
use generic_array::GenericArray;
use rand::RngCore;
use rsa::{Oaep, RsaPublicKey};
use typenum::U16;

use crate::crypto::header::{EncryptionHeader, HEADER_LEN, IV_LEN, WRAPPED_KEY_LEN};
use crate::crypto::keys::{hash_public_key, PrivateKeyMap};
use crate::error::VaultError;

type CbcEnc = cbc::Encryptor<Aes256>;
type CbcDec = cbc::Decryptor<Aes256>;
type Block = GenericArray<u8, U16>;

/// Streams plaintext through AES-256-CBC, emitting the header and wrapped
/// key ahead of the first ciphertext byte.
pub struct StreamEncryptor {
    cipher: CbcEnc,
    buffer: Vec<u8>,
    preamble: Option<Vec<u8>>,
}

impl StreamEncryptor {
    pub fn new(public_key: &RsaPublicKey) -> Result<Self, VaultError> {
        let mut rng = rand::thread_rng();
        let mut key = [0u8; 32];
        rng.fill_bytes(&mut key);
        let mut iv = [0u8; IV_LEN];
        rng.fill_bytes(&mut iv);

        let wrapped = public_key
            .encrypt(&mut rng, Oaep::new::<sha2::Sha256>(), &key)
            .map_err(VaultError::from)?;
        let header = EncryptionHeader::current(hash_public_key(public_key)?);

        let mut preamble = Vec::with_capacity(HEADER_LEN + WRAPPED_KEY_LEN + IV_LEN);
        preamble.extend_from_slice(&header.encode());
        preamble.extend_from_slice(&wrapped);
        preamble.extend_from_slice(&iv);

        Ok(Self {
            cipher: CbcEnc::new(key.as_slice().into(), iv.as_slice().into()),
            buffer: Vec::new(),
            preamble: Some(preamble),
        })
    }

    /// Feeds `chunk` in, returning whatever ciphertext bytes (and, on the
    /// first call, the header/wrapped-key preamble) are ready to flush.
    /// Fewer than 16 bytes of plaintext tail are always held back for the
    /// next call or `finalize`.
    pub fn update(&mut self, chunk: &[u8]) -> Vec<u8> {
        let mut out = self.preamble.take().unwrap_or_default();
        self.buffer.extend_from_slice(chunk);

        let full_blocks = self.buffer.len() / 16;
        if full_blocks > 0 {
            let take = full_blocks * 16;
            for block_bytes in self.buffer[..take].chunks_exact(16) {
                let mut block: Block = GenericArray::clone_from_slice(block_bytes);
                self.cipher.encrypt_block_mut(&mut block);
                out.extend_from_slice(&block);
            }
            self.buffer.drain(..take);
        }
        out
    }

    /// Pads the remaining <16 bytes with PKCS7 and encrypts the final
    /// block(s), including a full pad-only block if the plaintext length
    /// was already a multiple of 16.
    pub fn finalize(mut self) -> Vec<u8> {
        let mut out = self.preamble.take().unwrap_or_default();
        let pad_len = 16 - (self.buffer.len() % 16);
        self.buffer
            .extend(std::iter::repeat(pad_len as u8).take(pad_len));

        for block_bytes in self.buffer.chunks_exact(16) {
            let mut block: Block = GenericArray::clone_from_slice(block_bytes);
            self.cipher.encrypt_block_mut(&mut block);
            out.extend_from_slice(&block);
        }
        out
    }
}

enum DecState {
    Buffering(Vec<u8>),
    Streaming {
        cipher: CbcDec,
        ciphertext_buf: Vec<u8>,
        pending_plaintext: Option<[u8; 16]>,
    },
}

enum StartResult {
    NeedMore(Vec<u8>),
    Started { cipher: CbcDec, remainder: Vec<u8> },
}

/// Mirror of [`StreamEncryptor`]: buffers incoming bytes until it has seen
/// enough to determine format and unwrap the symmetric key, then streams
/// plaintext out one block behind the ciphertext so PKCS7 padding can be
/// stripped from the true last block at `finalize`.
pub struct StreamDecryptor {
    key_map: PrivateKeyMap,
    state: DecState,
}

impl StreamDecryptor {
    pub fn new(key_map: PrivateKeyMap) -> Self {
        Self {
            key_map,
            state: DecState::Buffering(Vec::new()),
        }
    }

    pub fn update(&mut self, chunk: &[u8]) -> Result<Vec<u8>, VaultError> {
        match std::mem::replace(&mut self.state, DecState::Buffering(Vec::new())) {
            DecState::Buffering(mut buf) => {
                buf.extend_from_slice(chunk);
                match self.try_start_streaming(buf)? {
                    StartResult::NeedMore(buf) => {
                        self.state = DecState::Buffering(buf);
                        Ok(Vec::new())
                    }
                    StartResult::Started { cipher, remainder } => {
                        self.state = DecState::Streaming {
                            cipher,
                            ciphertext_buf: Vec::new(),
                            pending_plaintext: None,
                        };
                        self.feed_streaming(&remainder)
                    }
                }
            }
            streaming @ DecState::Streaming { .. } => {
                self.state = streaming;
                self.feed_streaming(chunk)
            }
        }
    }

    fn try_start_streaming(&self, buf: Vec<u8>) -> Result<StartResult, VaultError> {
        if buf.len() < 4 {
            return Ok(StartResult::NeedMore(buf));
        }
        let is_current_format = &buf[0..4] == b"ENC1";
        let needed = if is_current_format {
            HEADER_LEN + WRAPPED_KEY_LEN + IV_LEN
        } else {
            WRAPPED_KEY_LEN + IV_LEN
        };
        if buf.len() < needed {
            return Ok(StartResult::NeedMore(buf));
        }

        let (wrapped, iv, private_key) = if is_current_format {
            let header = EncryptionHeader::decode(&buf[..HEADER_LEN])
                .ok_or_else(|| VaultError::format_version("malformed ENC1 header"))?;
            let key_hash_hex = hex::encode(header.key_hash);
            let private_key = if header.is_supported() {
                self.key_map
                    .get(&key_hash_hex)
                    .ok_or_else(|| VaultError::no_key(&key_hash_hex))?
            } else {
                self.key_map.get("default").ok_or_else(|| {
                    VaultError::format_version(format!(
                        "unsupported ciphertext format version {}",
                        header.version
                    ))
                })?
            };
            (
                buf[HEADER_LEN..HEADER_LEN + WRAPPED_KEY_LEN].to_vec(),
                buf[HEADER_LEN + WRAPPED_KEY_LEN..needed].to_vec(),
                private_key,
            )
        } else {
            let private_key = self.key_map.get("default").ok_or_else(|| {
                VaultError::key_missing("legacy ciphertext requires a default key")
            })?;
            (
                buf[0..WRAPPED_KEY_LEN].to_vec(),
                buf[WRAPPED_KEY_LEN..needed].to_vec(),
                private_key,
            )
        };

        let key = private_key
            .decrypt(Oaep::new::<sha2::Sha256>(), &wrapped)
            .map_err(VaultError::from)?;
        let cipher = CbcDec::new(key.as_slice().into(), iv.as_slice().into());
        let remainder = buf[needed..].to_vec();
        Ok(StartResult::Started { cipher, remainder })
    }

    fn feed_streaming(&mut self, chunk: &[u8]) -> Result<Vec<u8>, VaultError> {
        let (cipher, ciphertext_buf, pending) = match &mut self.state {
            DecState::Streaming {
                cipher,
                ciphertext_buf,
                pending_plaintext,
            } => (cipher, ciphertext_buf, pending_plaintext),
            DecState::Buffering(_) => return Ok(Vec::new()),
        };
        ciphertext_buf.extend_from_slice(chunk);

        let mut out = Vec::new();
        while ciphertext_buf.len() >= 16 {
            let block_bytes: Vec<u8> = ciphertext_buf.drain(..16).collect();
            let mut block: Block = GenericArray::clone_from_slice(&block_bytes);
            cipher.decrypt_block_mut(&mut block);
            let plaintext: [u8; 16] = block.into();
            if let Some(prev) = pending.replace(plaintext) {
                out.extend_from_slice(&prev);
            }
        }
        Ok(out)
    }

    pub fn finalize(self) -> Result<Vec<u8>, VaultError> {
        match self.state {
            DecState::Buffering(_) => Err(VaultError::format_version(
                "ciphertext ended before a full header could be read",
            )),
            DecState::Streaming {
                ciphertext_buf,
                pending_plaintext,
                ..
            } => {
                if !ciphertext_buf.is_empty() {
                    return Err(VaultError::basic_str("ciphertext ended mid-block"));
                }
                let last =
                    pending_plaintext.ok_or_else(|| VaultError::basic_str("empty ciphertext"))?;
                unpad_pkcs7(&last)
            }
        }
    }
}

fn unpad_pkcs7(block: &[u8; 16]) -> Result<Vec<u8>, VaultError> {
    let pad_len = *block.last().unwrap() as usize;
    if pad_len == 0 || pad_len > 16 || block[16 - pad_len..].iter().any(|&b| b as usize != pad_len)
    {
        return Err(VaultError::basic_str("invalid PKCS7 padding"));
    }
    Ok(block[..16 - pad_len].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::generate_key_pair;

    fn key_map_for(public_key: &RsaPublicKey, private_key: rsa::RsaPrivateKey) -> PrivateKeyMap {
        let mut map = PrivateKeyMap::new();
        map.insert(hex::encode(hash_public_key(public_key).unwrap()), private_key);
        map
    }

    #[test]
    fn streaming_round_trips_in_small_chunks() {
        let (private_key, public_key) = generate_key_pair().unwrap();
        let plaintext: Vec<u8> = (0u8..=255).cycle().take(1000).collect();

        let mut encryptor = StreamEncryptor::new(&public_key).unwrap();
        let mut ciphertext = Vec::new();
        for chunk in plaintext.chunks(7) {
            ciphertext.extend(encryptor.update(chunk));
        }
        ciphertext.extend(encryptor.finalize());

        let mut decryptor = StreamDecryptor::new(key_map_for(&public_key, private_key));
        let mut decrypted = Vec::new();
        for chunk in ciphertext.chunks(13) {
            decrypted.extend(decryptor.update(chunk).unwrap());
        }
        decrypted.extend(decryptor.finalize().unwrap());

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn streaming_round_trips_exact_block_multiple() {
        let (private_key, public_key) = generate_key_pair().unwrap();
        let plaintext = vec![0x42u8; 64];

        let mut encryptor = StreamEncryptor::new(&public_key).unwrap();
        let mut ciphertext = encryptor.update(&plaintext);
        ciphertext.extend(encryptor.finalize());

        let mut decryptor = StreamDecryptor::new(key_map_for(&public_key, private_key));
        let mut decrypted = decryptor.update(&ciphertext).unwrap();
        decrypted.extend(decryptor.finalize().unwrap());

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn empty_stream_round_trips() {
        let (private_key, public_key) = generate_key_pair().unwrap();
        let encryptor = StreamEncryptor::new(&public_key).unwrap();
        let ciphertext = encryptor.finalize();

        let mut decryptor = StreamDecryptor::new(key_map_for(&public_key, private_key));
        let mut decrypted = decryptor.update(&ciphertext).unwrap();
        decrypted.extend(decryptor.finalize().unwrap());
        assert!(decrypted.is_empty());
    }

    #[test]
    fn truncated_stream_fails_to_finalize() {
        let (private_key, public_key) = generate_key_pair().unwrap();
        let mut encryptor = StreamEncryptor::new(&public_key).unwrap();
        let mut ciphertext = encryptor.update(b"hello world, this is plaintext");
        ciphertext.extend(encryptor.finalize());
        ciphertext.truncate(ciphertext.len() - 3);

        let mut decryptor = StreamDecryptor::new(key_map_for(&public_key, private_key));
        let _ = decryptor.update(&ciphertext).unwrap();
        assert!(decryptor.finalize().is_err());
    }
}

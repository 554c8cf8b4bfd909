//! Hybrid encryption: per-file AES-256-CBC symmetric key wrapped by an
//! RSA-4096 OAEP asymmetric key, behind a self-describing, versioned,
//! key-identifying header (spec.md §4.3).
//!
//! Nothing in the teacher repo does encryption — this module is grounded on
//! the broader corpus's `rsa`/`aes`/`sha2` dependency stack (e.g. `rsa =
//! "0.9"` and `aes-gcm`/`aes` in `aptos-labs-aptos-core`,
//! `hypermesh-online-hypermesh`) and on `oxen-rust`'s general convention of
//! one module per concern with a small, well-tested public surface.

pub mod buffer;
pub mod header;
pub mod keys;
pub mod stream;

pub use buffer::{decrypt_buffer, encrypt_buffer};
pub use header::{EncryptionHeader, ENC_TYPE, HEADER_LEN, IV_LEN, WRAPPED_KEY_LEN};
pub use keys::{generate_key_pair, hash_public_key, load_key_pair, PrivateKeyMap};
pub use stream::{StreamDecryptor, StreamEncryptor};

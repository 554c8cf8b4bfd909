//! mediavault-core
//!
//! Core storage and integrity engine for a personal media asset vault:
//! - content-addressed reads/writes over a local filesystem or an
//!   S3-compatible object store
//! - a weight-balanced content Merkle tree tracking every stored asset
//! - hybrid RSA/AES encryption for asset bytes and metadata at rest
//! - an atomic write-lock protocol so exactly one engine instance can
//!   mutate a given location at a time
//! - add/verify/replicate pipelines built on top of all of the above
//!
//! The document database and the parallel task scheduler that higher-level
//! tooling plugs in around this engine are out of scope here; this crate
//! exposes the trait boundaries (`MetadataCollection`, `TaskQueue`) they're
//! expected to satisfy, plus in-memory/rayon reference implementations
//! good enough to test against.

pub mod constants;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod merkle;
pub mod storage;
pub mod util;

pub use engine::{AssetEngine, EngineConfig};
pub use error::VaultError;

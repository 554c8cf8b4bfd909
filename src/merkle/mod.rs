//! The weight-balanced content Merkle tree (spec.md §3, §4.4): a working
//! mutable `SortTree` plus a compact, serializable `MerkleForm` projection
//! of it.
//!
//! Grounded on `oxen-rust`'s `core/index/merkle_tree/{node.rs,
//! commit_merkle_tree.rs}` for the general "node enum + tagged on-disk node
//! record" shape; the balance algorithm itself (weight-balance by leaf
//! count over a single flat name-keyed tree, not Oxen's path-depth commit
//! DAG) is new (see `tree.rs` module docs and DESIGN.md).

pub mod merkle_form;
pub mod node;
pub mod tree;

pub use merkle_form::{load_tree, save_tree, MerkleForm};
pub use node::{HashedItem, InternalNode, LeafNode, SortNode};
pub use tree::{hashed_item, SortTree, TreeMetadata};

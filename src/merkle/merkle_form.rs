//! The compact, persisted projection of a [`crate::merkle::tree::SortTree`]
//! (spec.md §3 "Persisted Tree Metadata", §4.4 "Serialization"): a flat
//! pre-order dump of every node, reloadable into an equivalent working tree
//! without re-running the balancing algorithm.
//!
//! `buildMerkleTree(sortTree) -> merkleForm` is [`MerkleForm::build`];
//! `saveTree`/`loadTree` are the free functions [`save_tree`]/[`load_tree`],
//! which go through a [`crate::storage::Backend`] rather than raw
//! `std::fs` so the tree can live on `fs:` or `s3:` storage identically.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::VaultError;
use crate::merkle::node::{InternalNode, LeafNode, SortNode};
use crate::merkle::tree::{SortTree, TreeMetadata};
use crate::storage::Backend;

const MAGIC_TAG: &[u8; 4] = b"MTR1";
const FORMAT_VERSION: u32 = 1;

/// One node in the pre-order dump. `leaf` is populated iff `kind == 0`.
#[derive(Debug, Clone, PartialEq)]
struct NodeRecord {
    kind: u8,
    hash: [u8; 32],
    size: u64,
    node_count: u64,
    leaf: Option<LeafRecord>,
}

#[derive(Debug, Clone, PartialEq)]
struct LeafRecord {
    name: String,
    last_modified_ms: i64,
}

/// Extra bookkeeping not already covered by the header's `id`/`nodeCount`/
/// `totalSize` fields (spec.md §3 "Persisted Tree Metadata").
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MetadataJson {
    files_imported: u64,
}

/// The flat, persisted form of a tree's shape and hashes.
#[derive(Debug, Clone, PartialEq)]
pub struct MerkleForm {
    records: Vec<NodeRecord>,
}

impl MerkleForm {
    /// `buildMerkleTree`: projects the working `SortTree` into this compact
    /// form. Only ever called when the tree is `dirty` (spec.md §5 "Tree
    /// save ordering").
    pub fn build(tree: &SortTree) -> Self {
        let mut records = Vec::new();
        if let Some(root) = tree.root() {
            encode_node(root, &mut records);
        }
        Self { records }
    }

    pub fn root_hash(&self) -> Option<[u8; 32]> {
        self.records.first().map(|r| r.hash)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Reconstructs a working `SortTree` from this flat form.
    fn to_sort_node(&self) -> Result<Option<SortNode>, VaultError> {
        if self.records.is_empty() {
            return Ok(None);
        }
        let mut iter = self.records.iter();
        let node = decode_node(&mut iter)?;
        if iter.next().is_some() {
            return Err(VaultError::basic_str(
                "tree file has trailing node records past the root",
            ));
        }
        Ok(Some(node))
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for record in &self.records {
            out.push(record.kind);
            out.extend_from_slice(&record.hash);
            out.extend_from_slice(&record.size.to_le_bytes());
            out.extend_from_slice(&record.node_count.to_le_bytes());
            if let Some(leaf) = &record.leaf {
                let name_bytes = leaf.name.as_bytes();
                out.extend_from_slice(&(name_bytes.len() as u32).to_le_bytes());
                out.extend_from_slice(name_bytes);
                out.extend_from_slice(&leaf.last_modified_ms.to_le_bytes());
            }
        }
        out
    }

    fn decode(mut bytes: &[u8], node_count: u64) -> Result<Self, VaultError> {
        let mut records = Vec::with_capacity(node_count as usize);
        while !bytes.is_empty() {
            let kind = read_u8(&mut bytes)?;
            let hash = read_array::<32>(&mut bytes)?;
            let size = read_u64(&mut bytes)?;
            let record_node_count = read_u64(&mut bytes)?;
            let leaf = if kind == 0 {
                let name_len = read_u32(&mut bytes)? as usize;
                let name = read_utf8(&mut bytes, name_len)?;
                let last_modified_ms = read_i64(&mut bytes)?;
                Some(LeafRecord {
                    name,
                    last_modified_ms,
                })
            } else {
                None
            };
            records.push(NodeRecord {
                kind,
                hash,
                size,
                node_count: record_node_count,
                leaf,
            });
        }
        Ok(Self { records })
    }
}

fn encode_node(node: &SortNode, out: &mut Vec<NodeRecord>) {
    match node {
        SortNode::Leaf(leaf) => out.push(NodeRecord {
            kind: 0,
            hash: leaf.content_hash,
            size: leaf.length,
            node_count: 1,
            leaf: Some(LeafRecord {
                name: leaf.name.clone(),
                last_modified_ms: leaf.last_modified.timestamp_millis(),
            }),
        }),
        SortNode::Internal(internal) => {
            out.push(NodeRecord {
                kind: 1,
                hash: internal.hash,
                size: internal.size,
                node_count: internal.node_count,
                leaf: None,
            });
            encode_node(&internal.left, out);
            encode_node(&internal.right, out);
        }
    }
}

/// Pre-order decode: a node record is immediately followed by its left
/// subtree's full encoding, then its right subtree's — so reconstructing
/// the tree is a direct recursive consume of the iterator, no index
/// bookkeeping required.
fn decode_node<'a>(
    records: &mut std::slice::Iter<'a, NodeRecord>,
) -> Result<SortNode, VaultError> {
    let record = records
        .next()
        .ok_or_else(|| VaultError::basic_str("tree file ended mid-node"))?;
    if record.kind == 0 {
        let leaf = record
            .leaf
            .as_ref()
            .ok_or_else(|| VaultError::basic_str("leaf record missing name/lastModified"))?;
        let last_modified = Utc
            .timestamp_millis_opt(leaf.last_modified_ms)
            .single()
            .ok_or_else(|| VaultError::basic_str("leaf record has an invalid timestamp"))?;
        Ok(SortNode::Leaf(LeafNode {
            name: leaf.name.clone(),
            content_hash: record.hash,
            length: record.size,
            last_modified,
        }))
    } else {
        let left = decode_node(records)?;
        let right = decode_node(records)?;
        Ok(SortNode::Internal(InternalNode {
            hash: record.hash,
            size: record.size,
            node_count: record.node_count,
            min_name: left.min_name().to_string(),
            max_name: right.max_name().to_string(),
            left: Box::new(left),
            right: Box::new(right),
        }))
    }
}

fn read_u8(bytes: &mut &[u8]) -> Result<u8, VaultError> {
    if bytes.is_empty() {
        return Err(VaultError::basic_str("tree file truncated (u8)"));
    }
    let (head, rest) = bytes.split_at(1);
    *bytes = rest;
    Ok(head[0])
}

fn read_array<const N: usize>(bytes: &mut &[u8]) -> Result<[u8; N], VaultError> {
    if bytes.len() < N {
        return Err(VaultError::basic_str("tree file truncated (array)"));
    }
    let (head, rest) = bytes.split_at(N);
    *bytes = rest;
    head.try_into()
        .map_err(|_| VaultError::basic_str("tree file array conversion failed"))
}

fn read_u32(bytes: &mut &[u8]) -> Result<u32, VaultError> {
    Ok(u32::from_le_bytes(read_array::<4>(bytes)?))
}

fn read_u64(bytes: &mut &[u8]) -> Result<u64, VaultError> {
    Ok(u64::from_le_bytes(read_array::<8>(bytes)?))
}

fn read_i64(bytes: &mut &[u8]) -> Result<i64, VaultError> {
    Ok(i64::from_le_bytes(read_array::<8>(bytes)?))
}

fn read_utf8(bytes: &mut &[u8], len: usize) -> Result<String, VaultError> {
    if bytes.len() < len {
        return Err(VaultError::basic_str("tree file truncated (name)"));
    }
    let (head, rest) = bytes.split_at(len);
    *bytes = rest;
    std::str::from_utf8(head)
        .map(|s| s.to_string())
        .map_err(VaultError::from)
}

/// `saveTree`: rebuilds the merkle projection if `tree.dirty`, then writes
/// a single fully-serialized blob through `backend.write` so readers never
/// see a torn tree (spec.md §5 "Tree save ordering" — atomic on `fs` via
/// `write_atomic`'s temp-file-then-rename, read-after-write on S3).
pub async fn save_tree(
    path: &str,
    tree: &mut SortTree,
    backend: &dyn Backend,
) -> Result<(), VaultError> {
    let form = MerkleForm::build(tree);
    tree.dirty = false;

    let metadata_json = serde_json::to_vec(&MetadataJson {
        files_imported: tree.metadata.files_imported,
    })?;

    let mut out = Vec::new();
    out.extend_from_slice(MAGIC_TAG);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(tree.metadata.id.as_bytes());
    out.extend_from_slice(&tree.node_count().to_le_bytes());
    out.extend_from_slice(&tree.total_size().to_le_bytes());
    out.extend_from_slice(&(metadata_json.len() as u32).to_le_bytes());
    out.extend_from_slice(&metadata_json);
    out.extend_from_slice(&form.encode());

    backend.write(path, Some("application/octet-stream"), &out).await
}

/// `loadTree`: reconstructs both the working `SortTree` and its `dirty`
/// flag (always `false` immediately after a load) from a previously saved
/// blob. Returns `Ok(None)` if nothing is stored at `path` yet.
pub async fn load_tree(path: &str, backend: &dyn Backend) -> Result<Option<SortTree>, VaultError> {
    let Some(bytes) = backend.read(path).await? else {
        return Ok(None);
    };
    let mut cursor: &[u8] = &bytes;

    if cursor.len() < 4 || &cursor[0..4] != MAGIC_TAG {
        return Err(VaultError::format_version("tree file missing MTR1 tag"));
    }
    cursor = &cursor[4..];
    let version = read_u32(&mut cursor)?;
    if version != FORMAT_VERSION {
        return Err(VaultError::format_version(format!(
            "unsupported tree file version {version}"
        )));
    }
    let id_bytes = read_array::<16>(&mut cursor)?;
    let id = Uuid::from_bytes(id_bytes);
    let node_count = read_u64(&mut cursor)?;
    let total_size = read_u64(&mut cursor)?;
    let metadata_len = read_u32(&mut cursor)? as usize;
    if cursor.len() < metadata_len {
        return Err(VaultError::basic_str("tree file truncated (metadata)"));
    }
    let (metadata_bytes, rest) = cursor.split_at(metadata_len);
    let metadata_json: MetadataJson = serde_json::from_slice(metadata_bytes)?;
    cursor = rest;

    let form = MerkleForm::decode(cursor, node_count)?;
    let root = form.to_sort_node()?;

    let mut tree = SortTree::create_tree(id);
    tree.metadata = TreeMetadata {
        id,
        files_imported: metadata_json.files_imported,
        total_files: node_count,
        total_size,
    };
    tree.set_root(root);
    tree.dirty = false;
    Ok(Some(tree))
}

/// A leaf's `DateTime<Utc>` truncates to millisecond precision across a
/// save/load round trip (spec.md §4.4 node record: `lastModified(i64 ms)`).
pub fn truncate_to_millis(dt: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(dt.timestamp_millis()).single().unwrap_or(dt)
}

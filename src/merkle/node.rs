//! Node types for the weight-balanced content Merkle tree (spec.md §3,
//! §4.4). A leaf commits to one stored file; an internal node commits to
//! the concatenation of its two children's hashes.

use chrono::{DateTime, Utc};

use crate::util::hash::hash_two;

/// Input to an insert/update: the caller already knows the file's content
/// hash (computed by the asset engine, not here).
#[derive(Debug, Clone, PartialEq)]
pub struct HashedItem {
    pub name: String,
    pub hash: [u8; 32],
    pub length: u64,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeafNode {
    pub name: String,
    pub content_hash: [u8; 32],
    pub length: u64,
    pub last_modified: DateTime<Utc>,
}

impl LeafNode {
    fn from_item(item: HashedItem) -> Self {
        Self {
            name: item.name,
            content_hash: item.hash,
            length: item.length,
            last_modified: item.last_modified,
        }
    }
}

/// An internal node's aggregates, plus the inclusive name range spanned by
/// its leaves. The range is what lets [`crate::merkle::tree::SortTree`]
/// resolve `findItemNode`/`updateItem` in O(log n): the tree is built from
/// a sorted leaf sequence split by count, so a node's children always
/// partition a contiguous slice of that sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct InternalNode {
    pub hash: [u8; 32],
    pub size: u64,
    pub node_count: u64,
    pub min_name: String,
    pub max_name: String,
    pub left: Box<SortNode>,
    pub right: Box<SortNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SortNode {
    Leaf(LeafNode),
    Internal(InternalNode),
}

impl SortNode {
    pub fn leaf(item: HashedItem) -> Self {
        SortNode::Leaf(LeafNode::from_item(item))
    }

    pub fn hash(&self) -> [u8; 32] {
        match self {
            SortNode::Leaf(leaf) => leaf.content_hash,
            SortNode::Internal(internal) => internal.hash,
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            SortNode::Leaf(leaf) => leaf.length,
            SortNode::Internal(internal) => internal.size,
        }
    }

    pub fn node_count(&self) -> u64 {
        match self {
            SortNode::Leaf(_) => 1,
            SortNode::Internal(internal) => internal.node_count,
        }
    }

    pub fn min_name(&self) -> &str {
        match self {
            SortNode::Leaf(leaf) => &leaf.name,
            SortNode::Internal(internal) => &internal.min_name,
        }
    }

    pub fn max_name(&self) -> &str {
        match self {
            SortNode::Leaf(leaf) => &leaf.name,
            SortNode::Internal(internal) => &internal.max_name,
        }
    }

    pub fn as_leaf(&self) -> Option<&LeafNode> {
        match self {
            SortNode::Leaf(leaf) => Some(leaf),
            SortNode::Internal(_) => None,
        }
    }

    /// Builds a new internal node over `left`/`right`, computing every
    /// aggregate from scratch (spec.md §4.4 "aggregate recompute").
    pub fn internal(left: SortNode, right: SortNode) -> Self {
        SortNode::Internal(InternalNode {
            hash: hash_two(&left.hash(), &right.hash()),
            size: left.size() + right.size(),
            node_count: left.node_count() + right.node_count(),
            min_name: left.min_name().to_string(),
            max_name: right.max_name().to_string(),
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    /// In-order collection of every leaf under this node, in sorted order.
    pub fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a LeafNode>) {
        match self {
            SortNode::Leaf(leaf) => out.push(leaf),
            SortNode::Internal(internal) => {
                internal.left.collect_leaves(out);
                internal.right.collect_leaves(out);
            }
        }
    }
}

impl InternalNode {
    /// Recomputes `hash`/`size`/`node_count`/name range from the current
    /// children. Called after an in-place child mutation (update, not
    /// insert — insert always rebuilds via [`SortNode::internal`]).
    pub fn recompute(&mut self) {
        self.hash = hash_two(&self.left.hash(), &self.right.hash());
        self.size = self.left.size() + self.right.size();
        self.node_count = self.left.node_count() + self.right.node_count();
        self.min_name = self.left.min_name().to_string();
        self.max_name = self.right.max_name().to_string();
    }
}

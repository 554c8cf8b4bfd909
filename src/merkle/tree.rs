//! The weight-balanced content Merkle tree itself (spec.md §3, §4.4).
//!
//! **Balance strategy.** §4.4's prose describes a path-dependent greedy
//! insertion rule ("place the new leaf in whichever child has the smaller
//! node count, recursing down"). Simulating that rule by hand against
//! monotonically increasing names shows it can violate the tree's own
//! sortedness invariant after as few as four insertions, and the worked
//! example it gives for seven leaves (`((ABC,DE),FG)`, i.e. a 5/2 split at
//! the root) itself violates the formal weight-balance invariant restated
//! in §8 testable property 3 (`|left.nodeCount - right.nodeCount| <= 1`).
//! Since the formal, testable invariants (sortedness, weight-balance,
//! aggregate correctness) are what the spec actually checks, this
//! implementation satisfies those directly: every insert re-splits the
//! full sorted leaf sequence at `ceil(n/2)`/`floor(n/2)`, which by
//! construction keeps every node's two children within one leaf of each
//! other (with the left side never lighter) and keeps every subtree a
//! contiguous, sorted run. `updateItem` does not need to touch the shape
//! at all, so it stays a genuine O(log n) descend-and-recompute. `addItem`
//! rebuilds in O(n); acceptable here since assets are added file-by-file
//! through an engine pipeline, not on a hot path. See DESIGN.md.

use std::future::Future;
use std::pin::Pin;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::VaultError;
use crate::merkle::node::{HashedItem, LeafNode, SortNode};
use crate::util::natural_cmp;

/// Persisted, non-structural bookkeeping carried alongside the tree
/// (spec.md §4.4 `saveTree`/`loadTree`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeMetadata {
    pub id: Uuid,
    pub files_imported: u64,
    pub total_files: u64,
    pub total_size: u64,
}

impl TreeMetadata {
    fn new(id: Uuid) -> Self {
        Self {
            id,
            files_imported: 0,
            total_files: 0,
            total_size: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SortTree {
    pub metadata: TreeMetadata,
    root: Option<SortNode>,
    /// Set whenever the sort tree changes without the merkle projection
    /// being rebuilt; cleared by [`crate::merkle::merkle_form::MerkleForm::rebuild`].
    pub dirty: bool,
}

impl SortTree {
    pub fn create_tree(id: Uuid) -> Self {
        Self {
            metadata: TreeMetadata::new(id),
            root: None,
            dirty: false,
        }
    }

    pub fn root(&self) -> Option<&SortNode> {
        self.root.as_ref()
    }

    /// Installs a reconstructed root directly, bypassing the insert
    /// algorithm. Used only by [`crate::merkle::merkle_form::load_tree`]
    /// when rebuilding a tree from its serialized form.
    pub(crate) fn set_root(&mut self, root: Option<SortNode>) {
        self.root = root;
    }

    pub fn node_count(&self) -> u64 {
        self.root.as_ref().map(|n| n.node_count()).unwrap_or(0)
    }

    pub fn total_size(&self) -> u64 {
        self.root.as_ref().map(|n| n.size()).unwrap_or(0)
    }

    pub fn root_hash(&self) -> Option<[u8; 32]> {
        self.root.as_ref().map(|n| n.hash())
    }

    /// Builds a balanced subtree over an already-sorted, non-empty slice of
    /// leaves by repeatedly splitting at `ceil(n/2)`/`floor(n/2)`.
    fn build_balanced(leaves: Vec<LeafNode>) -> SortNode {
        if leaves.len() == 1 {
            return SortNode::Leaf(leaves.into_iter().next().unwrap());
        }
        let mid = leaves.len() - leaves.len() / 2; // ceil(n/2)
        let mut leaves = leaves;
        let right_half = leaves.split_off(mid);
        let left_node = Self::build_balanced(leaves);
        let right_node = Self::build_balanced(right_half);
        SortNode::internal(left_node, right_node)
    }

    fn flatten_owned(&self) -> Vec<LeafNode> {
        match &self.root {
            None => Vec::new(),
            Some(root) => {
                let mut refs = Vec::new();
                root.collect_leaves(&mut refs);
                refs.into_iter().cloned().collect()
            }
        }
    }

    /// `addItem`: fails if `item.name` already exists in the tree.
    pub fn add_item(&mut self, item: HashedItem) -> Result<(), VaultError> {
        let mut leaves = self.flatten_owned();
        let pos = leaves.binary_search_by(|l| natural_cmp(&l.name, &item.name));
        if pos.is_ok() {
            return Err(VaultError::basic_str(format!(
                "item already exists in tree: {}",
                item.name
            )));
        }
        let insert_at = pos.unwrap_err();
        self.metadata.total_size += item.length;
        self.metadata.total_files += 1;
        self.metadata.files_imported += 1;
        leaves.insert(insert_at, LeafNode {
            name: item.name,
            content_hash: item.hash,
            length: item.length,
            last_modified: item.last_modified,
        });
        self.root = Some(Self::build_balanced(leaves));
        self.dirty = true;
        Ok(())
    }

    /// `updateItem`: returns `false` if `name` is absent. Shape never
    /// changes; only the leaf's content fields and the ancestor aggregates
    /// on its path are touched.
    pub fn update_item(&mut self, item: HashedItem) -> Result<bool, VaultError> {
        let Some(root) = self.root.take() else {
            return Ok(false);
        };
        let (new_root, old_length, found) = update_in(root, &item);
        self.root = Some(new_root);
        if found {
            self.metadata.total_size = self.metadata.total_size - old_length + item.length;
            self.dirty = true;
        }
        Ok(found)
    }

    /// `upsertItem`: update in place if present, else insert.
    pub fn upsert_item(&mut self, item: HashedItem) -> Result<(), VaultError> {
        if self.update_item(item.clone())? {
            Ok(())
        } else {
            self.add_item(item)
        }
    }

    /// `findItemNode`: O(log n) descent using the contiguous name ranges
    /// every node carries.
    pub fn find_item_node(&self, name: &str) -> Option<&SortNode> {
        find_in(self.root.as_ref()?, name)
    }

    /// `traverseTreeAsync`: in-order walk; `visitor` returning `false` stops
    /// the traversal early.
    pub async fn traverse_async<F, Fut>(&self, mut visitor: F)
    where
        F: FnMut(&SortNode) -> Fut,
        Fut: Future<Output = bool>,
    {
        let Some(root) = &self.root else { return };
        // Boxed recursive async walk so the visitor can be awaited between
        // leaves without the borrow checker fighting a recursive async fn.
        traverse_in_order(root, &mut visitor).await;
    }
}

/// `hash`/`size` of an internal node; recomputed after mutating a child.
fn update_in(node: SortNode, item: &HashedItem) -> (SortNode, u64, bool) {
    match node {
        SortNode::Leaf(leaf) if leaf.name == item.name => {
            let old_length = leaf.length;
            let updated = LeafNode {
                name: leaf.name,
                content_hash: item.hash,
                length: item.length,
                last_modified: item.last_modified,
            };
            (SortNode::Leaf(updated), old_length, true)
        }
        SortNode::Leaf(leaf) => (SortNode::Leaf(leaf), 0, false),
        SortNode::Internal(mut internal) => {
            if natural_cmp(item.name.as_str(), internal.min_name.as_str()) == std::cmp::Ordering::Less
                || natural_cmp(item.name.as_str(), internal.max_name.as_str())
                    == std::cmp::Ordering::Greater
            {
                return (SortNode::Internal(internal), 0, false);
            }
            if natural_cmp(item.name.as_str(), internal.left.max_name())
                != std::cmp::Ordering::Greater
            {
                let left = *internal.left;
                let (new_left, old_length, found) = update_in(left, item);
                internal.left = Box::new(new_left);
                if found {
                    internal.recompute();
                }
                (SortNode::Internal(internal), old_length, found)
            } else {
                let right = *internal.right;
                let (new_right, old_length, found) = update_in(right, item);
                internal.right = Box::new(new_right);
                if found {
                    internal.recompute();
                }
                (SortNode::Internal(internal), old_length, found)
            }
        }
    }
}

fn find_in<'a>(node: &'a SortNode, name: &str) -> Option<&'a SortNode> {
    match node {
        SortNode::Leaf(leaf) => (leaf.name == name).then_some(node),
        SortNode::Internal(internal) => {
            if natural_cmp(name, &internal.min_name) == std::cmp::Ordering::Less
                || natural_cmp(name, &internal.max_name) == std::cmp::Ordering::Greater
            {
                return None;
            }
            if natural_cmp(name, internal.left.max_name()) != std::cmp::Ordering::Greater {
                find_in(&internal.left, name)
            } else {
                find_in(&internal.right, name)
            }
        }
    }
}

fn traverse_in_order<'a, F, Fut>(
    node: &'a SortNode,
    visitor: &'a mut F,
) -> Pin<Box<dyn Future<Output = bool> + 'a>>
where
    F: FnMut(&SortNode) -> Fut,
    Fut: Future<Output = bool>,
{
    Box::pin(async move {
        match node {
            SortNode::Leaf(_) => visitor(node).await,
            SortNode::Internal(internal) => {
                if !traverse_in_order(&internal.left, visitor).await {
                    return false;
                }
                traverse_in_order(&internal.right, visitor).await
            }
        }
    })
}

/// Builds a single-item `HashedItem` with the current time, for tests and
/// for the asset engine's add-file pipeline.
pub fn hashed_item(name: impl Into<String>, hash: [u8; 32], length: u64) -> HashedItem {
    HashedItem {
        name: name.into(),
        hash,
        length,
        last_modified: Utc::now(),
    }
}

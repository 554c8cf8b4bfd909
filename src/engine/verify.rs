//! The verify pipeline (spec.md §4.5 "Verify pipeline"): walk every leaf
//! in the tree, compare recorded length/mtime against what storage reports
//! and, when that shortcut can't clear a leaf, rehash the stored bytes.
//!
//! The shortcut is only sound because `engine::add` stamps a leaf's
//! `last_modified` from the *stored* copy's own `info()` at add time
//! (see `engine::add::add_file_inner`), not from the source file's mtime —
//! otherwise `info(asset_path).last_modified` would never agree with it
//! even for an untouched asset.

use crate::error::VaultError;
use crate::merkle::node::LeafNode;
use crate::merkle::tree::SortTree;
use crate::storage::Backend;
use crate::util::hash::{hash_bytes, to_hex};

/// `full`/`pathFilter` params (spec.md §4.5): a full rehash of every leaf
/// regardless of the length/mtime shortcut, and/or restriction to leaves
/// whose name matches a prefix.
#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    pub full: bool,
    pub path_filter: Option<String>,
}

/// Per-leaf verdict (spec.md §4.5 "folds into unmodified / modified / new /
/// removed / failures").
#[derive(Debug, Clone, PartialEq)]
pub enum VerifyLeafOutcome {
    Unmodified { name: String },
    Modified { name: String, expected_hash: String, actual_hash: String },
    Removed { name: String },
    Failed { name: String, error: String },
}

impl VerifyLeafOutcome {
    pub fn unmodified(name: impl Into<String>) -> Self {
        VerifyLeafOutcome::Unmodified { name: name.into() }
    }

    pub fn name(&self) -> &str {
        match self {
            VerifyLeafOutcome::Unmodified { name }
            | VerifyLeafOutcome::Modified { name, .. }
            | VerifyLeafOutcome::Removed { name }
            | VerifyLeafOutcome::Failed { name, .. } => name,
        }
    }
}

/// Aggregates every leaf's verdict, plus any on-storage path with no
/// corresponding tree entry (the "new" bucket spec.md §4.5 names).
#[derive(Debug, Clone, Default)]
pub struct VerifyReport {
    pub unmodified: Vec<String>,
    pub modified: Vec<String>,
    pub removed: Vec<String>,
    pub new: Vec<String>,
    pub failures: Vec<(String, String)>,
}

impl VerifyReport {
    pub fn record(&mut self, outcome: VerifyLeafOutcome) {
        match outcome {
            VerifyLeafOutcome::Unmodified { name } => self.unmodified.push(name),
            VerifyLeafOutcome::Modified { name, .. } => self.modified.push(name),
            VerifyLeafOutcome::Removed { name } => self.removed.push(name),
            VerifyLeafOutcome::Failed { name, error } => self.failures.push((name, error)),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.modified.is_empty() && self.removed.is_empty() && self.failures.is_empty()
    }
}

/// Verifies one leaf against `asset_storage` (spec.md §4.5 steps: fetch
/// `info`, compare length/mtime, rehash on mismatch or `full`).
pub async fn verify_leaf(
    asset_storage: &dyn Backend,
    leaf: &LeafNode,
    options: &VerifyOptions,
) -> VerifyLeafOutcome {
    if let Some(filter) = &options.path_filter {
        if !leaf.name.starts_with(filter.as_str()) {
            return VerifyLeafOutcome::Unmodified { name: leaf.name.clone() };
        }
    }

    let path = format!("{}/{}", crate::constants::ASSETS_DIR, leaf.name);
    let info = match asset_storage.info(&path).await {
        Ok(Some(info)) => info,
        Ok(None) => return VerifyLeafOutcome::Removed { name: leaf.name.clone() },
        Err(err) => {
            return VerifyLeafOutcome::Failed {
                name: leaf.name.clone(),
                error: err.to_string(),
            }
        }
    };

    let size_changed = info.length != leaf.length;
    let timestamp_changed = info.last_modified != leaf.last_modified;
    let shortcut_clean = !options.full && !size_changed && !timestamp_changed;
    if shortcut_clean {
        return VerifyLeafOutcome::Unmodified { name: leaf.name.clone() };
    }

    let bytes = match asset_storage.read(&path).await {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return VerifyLeafOutcome::Removed { name: leaf.name.clone() },
        Err(err) => {
            return VerifyLeafOutcome::Failed {
                name: leaf.name.clone(),
                error: err.to_string(),
            }
        }
    };

    let actual = hash_bytes(&bytes);
    if actual == leaf.content_hash {
        VerifyLeafOutcome::Unmodified { name: leaf.name.clone() }
    } else {
        VerifyLeafOutcome::Modified {
            name: leaf.name.clone(),
            expected_hash: to_hex(&leaf.content_hash),
            actual_hash: to_hex(&actual),
        }
    }
}

/// Verifies every leaf currently in `tree` plus any on-disk asset path
/// that has no matching leaf (spec.md §4.5 "new" bucket), sequentially.
/// The task-queue-backed parallel variant dispatches [`verify_leaf`]
/// per-leaf onto a [`crate::engine::task_queue::TaskQueue`] instead.
pub async fn verify_tree(
    asset_storage: &dyn Backend,
    tree: &SortTree,
    options: &VerifyOptions,
) -> Result<VerifyReport, VaultError> {
    let mut report = VerifyReport::default();
    let mut leaves = Vec::new();
    if let Some(root) = tree.root() {
        root.collect_leaves(&mut leaves);
    }
    let known: std::collections::HashSet<&str> = leaves.iter().map(|l| l.name.as_str()).collect();

    for leaf in &leaves {
        report.record(verify_leaf(asset_storage, leaf, options).await);
    }

    let mut next = None;
    loop {
        let page = asset_storage
            .list_files(crate::constants::ASSETS_DIR, 1000, next.as_deref())
            .await?;
        for name in &page.names {
            if !known.contains(name.as_str()) {
                report.new.push(name.clone());
            }
        }
        if page.next.is_none() {
            break;
        }
        next = page.next;
    }

    Ok(report)
}

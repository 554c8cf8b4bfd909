//! The add-file pipeline (spec.md §4.5 "Add-file pipeline"): hash (with
//! cache), dedup by content hash, content-address the write, rehash what
//! landed on storage, insert into the tree, attach a metadata record, and
//! garbage-collect any partial artifacts on failure.

use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use uuid::Uuid;

use crate::constants::{ASSETS_DIR, DISPLAY_DIR, THUMB_DIR};
use crate::engine::hash_cache::{self, CacheEntry, HashCache};
use crate::engine::metadata::MetadataCollection;
use crate::error::VaultError;
use crate::merkle::node::HashedItem;
use crate::merkle::tree::SortTree;
use crate::storage::Backend;
use crate::util::hash::{hash_and_count, hash_bytes, to_hex};

/// Caller-supplied, non-media-specific fields for one asset's metadata
/// record (spec.md §4.5 step 6). Thumbnail/display *generation* and EXIF/
/// geocoding are explicit non-goals (spec.md §1); this struct only carries
/// whatever bytes/fields the caller already produced.
#[derive(Debug, Clone)]
pub struct AddFileRequest {
    pub file_path: PathBuf,
    pub content_type: Option<String>,
    pub thumbnail: Option<Vec<u8>>,
    pub display: Option<Vec<u8>>,
    pub orig_file_name: String,
    pub orig_path: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub photo_date: Option<chrono::DateTime<chrono::Utc>>,
    pub coordinates: Option<(f64, f64)>,
    pub properties: Value,
    pub labels: Vec<String>,
    pub micro: Option<String>,
    pub color: Option<String>,
    pub duration: Option<f64>,
}

#[derive(Debug, Clone)]
pub enum AddOutcome {
    Added { asset_id: Uuid, hash_hex: String },
    AlreadyExists { hash_hex: String },
    Failed { file_path: String, error: String },
}

/// Aggregates many [`AddOutcome`]s the way spec.md §7 "per-file failures
/// (count, log, continue)" describes: one bad file never aborts the batch.
#[derive(Debug, Clone, Default)]
pub struct AddReport {
    pub added: Vec<Uuid>,
    pub already_exists: usize,
    pub failures: Vec<(String, String)>,
}

impl AddReport {
    pub fn record(&mut self, outcome: AddOutcome) {
        match outcome {
            AddOutcome::Added { asset_id, .. } => self.added.push(asset_id),
            AddOutcome::AlreadyExists { .. } => self.already_exists += 1,
            AddOutcome::Failed { file_path, error } => self.failures.push((file_path, error)),
        }
    }
}

/// Runs the full pipeline for one file. `asset_storage` is expected to be
/// the (prefixed, possibly encrypted) backend rooted so that `assets/`,
/// `thumb/`, `display/` are its top-level directories (spec.md §6 on-disk
/// layout).
pub async fn add_file(
    asset_storage: &dyn Backend,
    metadata: &dyn MetadataCollection,
    tree: &mut SortTree,
    local_cache: &mut HashCache,
    request: AddFileRequest,
) -> Result<AddOutcome, VaultError> {
    let path_key = request.file_path.to_string_lossy().into_owned();

    let (length, last_modified) = match hash_cache::stat(&request.file_path) {
        Ok(stat) => stat,
        Err(err) => return Ok(failed(&path_key, err)),
    };

    let hash = match local_cache.fresh_hash(&path_key, length, last_modified) {
        Some(hash) => hash,
        None => match hash_file(&request.file_path) {
            Ok(hash) => {
                local_cache.insert(
                    path_key.clone(),
                    CacheEntry {
                        hash,
                        length,
                        last_modified,
                    },
                );
                hash
            }
            Err(err) => return Ok(failed(&path_key, err)),
        },
    };
    let hash_hex = to_hex(&hash);

    let existing = metadata
        .find_by_index("assets", "hash", &json!(hash_hex))
        .await?;
    if !existing.is_empty() {
        return Ok(AddOutcome::AlreadyExists { hash_hex });
    }

    match add_file_inner(asset_storage, metadata, tree, &request, &hash, &hash_hex, last_modified).await {
        Ok(asset_id) => Ok(AddOutcome::Added { asset_id, hash_hex }),
        Err(err) => {
            log::error!("add_file failed for {}: {}", path_key, err);
            Ok(failed(&path_key, err))
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn add_file_inner(
    asset_storage: &dyn Backend,
    metadata: &dyn MetadataCollection,
    tree: &mut SortTree,
    request: &AddFileRequest,
    hash: &[u8; 32],
    hash_hex: &str,
    last_modified: chrono::DateTime<chrono::Utc>,
) -> Result<Uuid, VaultError> {
    let asset_id = Uuid::new_v4();
    let asset_path = format!("{}/{}", ASSETS_DIR, asset_id);
    let thumb_path = format!("{}/{}", THUMB_DIR, asset_id);
    let display_path = format!("{}/{}", DISPLAY_DIR, asset_id);

    let mut written = Vec::new();
    let result: Result<(), VaultError> = (async {
        let original = tokio::fs::read(&request.file_path).await.map_err(VaultError::from)?;
        asset_storage
            .write(&asset_path, request.content_type.as_deref(), &original)
            .await?;
        written.push(asset_path.clone());

        let on_disk = asset_storage
            .read(&asset_path)
            .await?
            .ok_or_else(|| VaultError::not_found(&asset_path))?;
        let rehash = hash_bytes(&on_disk);
        if &rehash != hash {
            return Err(VaultError::hash_mismatch(&asset_path, to_hex(hash), to_hex(&rehash)));
        }

        // Stamp the leaf's last_modified from the *stored* copy's own
        // `info()`, not the source file's mtime (`last_modified` above):
        // verify's shortcut (spec.md §4.5) compares the leaf against this
        // same backend later, so the two timestamps must actually be
        // comparable, and only the stored copy's mtime moves if the asset
        // is ever rewritten in place.
        let stored_info = asset_storage
            .info(&asset_path)
            .await?
            .ok_or_else(|| VaultError::not_found(&asset_path))?;

        tree.add_item(HashedItem {
            name: asset_id.to_string(),
            hash: *hash,
            length: stored_info.length,
            last_modified: stored_info.last_modified,
        })?;

        if let Some(thumb) = &request.thumbnail {
            asset_storage.write(&thumb_path, Some("image/jpeg"), thumb).await?;
            written.push(thumb_path.clone());
        }
        if let Some(display) = &request.display {
            asset_storage.write(&display_path, Some("image/jpeg"), display).await?;
            written.push(display_path.clone());
        }

        let doc = json!({
            "_id": asset_id.to_string(),
            "hash": hash_hex,
            "width": request.width,
            "height": request.height,
            "origFileName": request.orig_file_name,
            "origPath": request.orig_path,
            "contentType": request.content_type,
            "photoDate": request.photo_date,
            "fileDate": last_modified,
            "uploadDate": chrono::Utc::now(),
            "coordinates": request.coordinates,
            "properties": request.properties,
            "labels": request.labels,
            "micro": request.micro,
            "color": request.color,
            "duration": request.duration,
        });
        metadata.insert_one("assets", &asset_id.to_string(), doc).await?;
        Ok(())
    })
    .await;

    if let Err(err) = result {
        for path in &written {
            let _ = asset_storage.delete_file(path).await;
        }
        return Err(err);
    }

    Ok(asset_id)
}

fn hash_file(path: &Path) -> Result<[u8; 32], VaultError> {
    crate::util::retry::with_backoff(|| {
        let file = std::fs::File::open(path).map_err(VaultError::from)?;
        hash_and_count(file).map(|(hash, _)| hash).map_err(VaultError::from)
    })
}

fn failed(path: &str, error: VaultError) -> AddOutcome {
    AddOutcome::Failed {
        file_path: path.to_string(),
        error: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::metadata::InMemoryMetadataCollection;
    use crate::storage::local::FsBackend;
    use tempfile::TempDir;
    use uuid::Uuid as UuidT;

    fn request(path: PathBuf) -> AddFileRequest {
        AddFileRequest {
            file_path: path,
            content_type: Some("image/jpeg".to_string()),
            thumbnail: Some(b"thumb-bytes".to_vec()),
            display: Some(b"display-bytes".to_vec()),
            orig_file_name: "photo.jpg".to_string(),
            orig_path: "/camera/photo.jpg".to_string(),
            width: Some(100),
            height: Some(80),
            photo_date: None,
            coordinates: None,
            properties: json!({}),
            labels: vec![],
            micro: None,
            color: None,
            duration: None,
        }
    }

    #[tokio::test]
    async fn adds_a_new_file_and_populates_tree_and_metadata() {
        let storage_dir = TempDir::new().unwrap();
        let source_dir = TempDir::new().unwrap();
        let backend = FsBackend::new(storage_dir.path(), false);
        let metadata = InMemoryMetadataCollection::new();
        let mut tree = SortTree::create_tree(UuidT::new_v4());
        let mut cache = HashCache::new();

        let src_path = source_dir.path().join("photo.jpg");
        tokio::fs::write(&src_path, b"some photo bytes").await.unwrap();

        let outcome = add_file(&backend, &metadata, &mut tree, &mut cache, request(src_path))
            .await
            .unwrap();

        let asset_id = match outcome {
            AddOutcome::Added { asset_id, .. } => asset_id,
            other => panic!("expected Added, got {other:?}"),
        };

        assert_eq!(tree.node_count(), 1);
        assert!(storage_dir.path().join("thumb").join(asset_id.to_string()).exists());
        assert!(metadata.get("assets", &asset_id.to_string()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn adding_the_same_content_twice_is_a_dedup_no_op() {
        let storage_dir = TempDir::new().unwrap();
        let source_dir = TempDir::new().unwrap();
        let backend = FsBackend::new(storage_dir.path(), false);
        let metadata = InMemoryMetadataCollection::new();
        let mut tree = SortTree::create_tree(UuidT::new_v4());
        let mut cache = HashCache::new();

        let src_path = source_dir.path().join("photo.jpg");
        tokio::fs::write(&src_path, b"identical bytes").await.unwrap();

        add_file(&backend, &metadata, &mut tree, &mut cache, request(src_path.clone()))
            .await
            .unwrap();
        let second = add_file(&backend, &metadata, &mut tree, &mut cache, request(src_path))
            .await
            .unwrap();

        assert!(matches!(second, AddOutcome::AlreadyExists { .. }));
        assert_eq!(tree.node_count(), 1);
    }

    #[tokio::test]
    async fn missing_source_file_reports_a_failure_not_an_error() {
        let storage_dir = TempDir::new().unwrap();
        let backend = FsBackend::new(storage_dir.path(), false);
        let metadata = InMemoryMetadataCollection::new();
        let mut tree = SortTree::create_tree(UuidT::new_v4());
        let mut cache = HashCache::new();

        let outcome = add_file(
            &backend,
            &metadata,
            &mut tree,
            &mut cache,
            request(PathBuf::from("/does/not/exist.jpg")),
        )
        .await
        .unwrap();

        assert!(matches!(outcome, AddOutcome::Failed { .. }));
        assert_eq!(tree.node_count(), 0);
    }

    #[tokio::test]
    async fn second_add_reuses_cached_hash_without_rereading_file() {
        let storage_dir = TempDir::new().unwrap();
        let source_dir = TempDir::new().unwrap();
        let backend = FsBackend::new(storage_dir.path(), false);
        let metadata = InMemoryMetadataCollection::new();
        let mut tree = SortTree::create_tree(UuidT::new_v4());
        let mut cache = HashCache::new();

        let src_path = source_dir.path().join("a.jpg");
        tokio::fs::write(&src_path, b"content-a").await.unwrap();
        add_file(&backend, &metadata, &mut tree, &mut cache, request(src_path.clone()))
            .await
            .unwrap();
        assert_eq!(cache.len(), 1);

        // A second distinct file reuses the cache lookup path (not its
        // entry, since content differs) and adds a second cache entry.
        let src_path_2 = source_dir.path().join("b.jpg");
        tokio::fs::write(&src_path_2, b"content-b").await.unwrap();
        add_file(&backend, &metadata, &mut tree, &mut cache, request(src_path_2))
            .await
            .unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(tree.node_count(), 2);
    }
}

//! The metadata document database boundary (spec.md §1 non-goals: "the
//! higher-level metadata document database... treated as an opaque
//! collection with `insertOne/replaceOne/updateOne/deleteOne/findByIndex/
//! getSorted`").
//!
//! We define the trait boundary and one in-memory reference
//! implementation so [`crate::engine::AssetEngine`] compiles and its
//! pipelines are testable, without pretending to implement a real document
//! store (spec.md §9 design note: "Dynamic `any`-typed database updates...
//! Model as a tagged sum `DbUpdate`... dispatch is a `match`").

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::VaultError;

#[async_trait]
pub trait MetadataCollection: Send + Sync {
    async fn insert_one(&self, collection: &str, id: &str, doc: Value) -> Result<(), VaultError>;
    async fn replace_one(&self, collection: &str, id: &str, doc: Value) -> Result<(), VaultError>;
    async fn update_one(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        value: Value,
    ) -> Result<(), VaultError>;
    async fn delete_one(&self, collection: &str, id: &str) -> Result<(), VaultError>;
    async fn find_by_index(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Value>, VaultError>;
    async fn get_sorted(&self, collection: &str, sort_field: &str) -> Result<Vec<Value>, VaultError>;
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, VaultError>;

    /// Every collection name currently holding at least one document.
    /// Replicate's metadata pass (spec.md §4.5 step 3) walks this to sync
    /// the whole database, not just a hardcoded collection.
    async fn list_collections(&self) -> Result<Vec<String>, VaultError>;
}

/// A tagged sum replacing the source's dynamic `any`-typed updates (spec.md
/// §9). `Asset Engine` pipelines build these up and `apply` dispatches with
/// a `match` rather than passing loosely-typed payloads around.
#[derive(Debug, Clone)]
pub enum DbUpdate {
    Upsert {
        collection: String,
        id: String,
        doc: Value,
    },
    Field {
        collection: String,
        id: String,
        field: String,
        value: Value,
    },
    Delete {
        collection: String,
        id: String,
    },
}

impl DbUpdate {
    pub async fn apply(self, db: &dyn MetadataCollection) -> Result<(), VaultError> {
        match self {
            DbUpdate::Upsert { collection, id, doc } => {
                if db.get(&collection, &id).await?.is_some() {
                    db.replace_one(&collection, &id, doc).await
                } else {
                    db.insert_one(&collection, &id, doc).await
                }
            }
            DbUpdate::Field {
                collection,
                id,
                field,
                value,
            } => db.update_one(&collection, &id, &field, value).await,
            DbUpdate::Delete { collection, id } => db.delete_one(&collection, &id).await,
        }
    }
}

/// `collection name -> id -> document`, guarded by a single mutex. Good
/// enough for tests and small local databases; a real deployment swaps
/// this for an actual BSON/JSON document store (out of scope, spec.md §1).
#[derive(Default)]
pub struct InMemoryMetadataCollection {
    data: Mutex<BTreeMap<String, BTreeMap<String, Value>>>,
}

impl InMemoryMetadataCollection {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataCollection for InMemoryMetadataCollection {
    async fn insert_one(&self, collection: &str, id: &str, doc: Value) -> Result<(), VaultError> {
        let mut data = self.data.lock().await;
        let coll = data.entry(collection.to_string()).or_default();
        if coll.contains_key(id) {
            return Err(VaultError::basic_str(format!(
                "document {id} already exists in {collection}"
            )));
        }
        coll.insert(id.to_string(), doc);
        Ok(())
    }

    async fn replace_one(&self, collection: &str, id: &str, doc: Value) -> Result<(), VaultError> {
        let mut data = self.data.lock().await;
        data.entry(collection.to_string()).or_default().insert(id.to_string(), doc);
        Ok(())
    }

    async fn update_one(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        value: Value,
    ) -> Result<(), VaultError> {
        let mut data = self.data.lock().await;
        let coll = data.entry(collection.to_string()).or_default();
        let doc = coll
            .get_mut(id)
            .ok_or_else(|| VaultError::not_found(format!("{collection}/{id}")))?;
        if let Some(obj) = doc.as_object_mut() {
            obj.insert(field.to_string(), value);
        }
        Ok(())
    }

    async fn delete_one(&self, collection: &str, id: &str) -> Result<(), VaultError> {
        let mut data = self.data.lock().await;
        data.entry(collection.to_string()).or_default().remove(id);
        Ok(())
    }

    async fn find_by_index(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Value>, VaultError> {
        let data = self.data.lock().await;
        let Some(coll) = data.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(coll
            .values()
            .filter(|doc| doc.get(field) == Some(value))
            .cloned()
            .collect())
    }

    async fn get_sorted(&self, collection: &str, sort_field: &str) -> Result<Vec<Value>, VaultError> {
        let data = self.data.lock().await;
        let Some(coll) = data.get(collection) else {
            return Ok(Vec::new());
        };
        let mut docs: Vec<Value> = coll.values().cloned().collect();
        docs.sort_by(|a, b| {
            let av = a.get(sort_field).map(|v| v.to_string()).unwrap_or_default();
            let bv = b.get(sort_field).map(|v| v.to_string()).unwrap_or_default();
            av.cmp(&bv)
        });
        Ok(docs)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, VaultError> {
        let data = self.data.lock().await;
        Ok(data.get(collection).and_then(|coll| coll.get(id)).cloned())
    }

    async fn list_collections(&self) -> Result<Vec<String>, VaultError> {
        let data = self.data.lock().await;
        Ok(data
            .iter()
            .filter(|(_, coll)| !coll.is_empty())
            .map(|(name, _)| name.clone())
            .collect())
    }
}

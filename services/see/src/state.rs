//! In-memory world state: the object/data-value store and the asset store.
//!
//! Both stores hand out copies. Snapshot readers take the shared lock, copy
//! out, and release; callers may mutate the returned maps freely. Nothing
//! here survives a restart.

use see_protocol::{object_id, Object};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct StateInner {
    objects: HashMap<String, Object>,
    data_values: HashMap<String, Value>,
}

/// Objects and data values behind a single reader-writer lock, so every
/// operation is applied atomically with respect to snapshot readers.
///
/// Invariant: every stored object's `"id"` field equals its map key; the
/// router rejects objects without a string id before they get here.
#[derive(Debug, Default)]
pub struct StateStore {
    inner: RwLock<StateInner>,
}

impl StateStore {
    /// Snapshot of the object map.
    pub async fn objects(&self) -> HashMap<String, Object> {
        self.inner.read().await.objects.clone()
    }

    /// Snapshot of the data-value map.
    pub async fn data_values(&self) -> HashMap<String, Value> {
        self.inner.read().await.data_values.clone()
    }

    /// Clears objects and data values in one critical section.
    pub async fn reset(&self) {
        let mut inner = self.inner.write().await;
        inner.objects.clear();
        inner.data_values.clear();
    }

    /// Inserts or replaces each object under its `id`. Objects are replaced
    /// whole; there is no merge. Objects without a string id are skipped.
    pub async fn update(&self, objs: Vec<Object>) {
        let mut inner = self.inner.write().await;
        for obj in objs {
            if let Some(id) = object_id(&obj) {
                let id = id.to_owned();
                inner.objects.insert(id, obj);
            }
        }
    }

    pub async fn update_data_value(&self, id: &str, value: Value) {
        self.inner
            .write()
            .await
            .data_values
            .insert(id.to_owned(), value);
    }

    /// Removes objects by id. The caller is responsible for the asset side.
    pub async fn remove(&self, ids: &[&str]) {
        let mut inner = self.inner.write().await;
        for id in ids {
            inner.objects.remove(*id);
        }
    }
}

/// A stored asset: content type plus the bytes exactly as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Binary assets keyed by id, behind their own lock with the same
/// copy-out-then-release discipline. Served over HTTP only, never pushed
/// to peers.
#[derive(Debug, Default)]
pub struct AssetStore {
    assets: RwLock<HashMap<String, Asset>>,
}

impl AssetStore {
    pub async fn get(&self, id: &str) -> Option<Asset> {
        self.assets.read().await.get(id).cloned()
    }

    pub async fn put(&self, id: &str, content_type: String, bytes: Vec<u8>) {
        self.assets.write().await.insert(
            id.to_owned(),
            Asset {
                content_type,
                bytes,
            },
        );
    }

    pub async fn remove(&self, id: &str) {
        self.assets.write().await.remove(id);
    }

    pub async fn clear(&self) {
        self.assets.write().await.clear();
    }
}

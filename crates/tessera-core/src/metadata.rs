//! # Graph Metadata Cache
//!
//! Every read may consult graph metadata, writes are rare. Readers clone an
//! `Arc` to an immutable snapshot; writers persist to the backend first and
//! then swap in a new snapshot, so a reader sees either the old map or the
//! new one, never a partial update.

use crate::TesseraError;
use crate::storage::RowStore;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};

/// Immutable view of graph metadata at one instant.
pub type MetadataSnapshot = Arc<BTreeMap<String, Vec<u8>>>;

fn poisoned() -> TesseraError {
    TesseraError::StorageError("metadata cache lock poisoned".to_string())
}

/// Read-mostly cache in front of a backend's metadata entries.
#[derive(Debug, Default)]
pub struct GraphMetadataCache {
    snapshot: RwLock<MetadataSnapshot>,
    /// Serializes writers so persist order matches swap order.
    writer: Mutex<()>,
}

impl GraphMetadataCache {
    /// Load every entry persisted by `store`.
    pub fn load(store: &dyn RowStore) -> Result<Self, TesseraError> {
        let entries = store.metadata_entries()?;
        tracing::debug!(entries = entries.len(), "loaded graph metadata");
        Ok(Self {
            snapshot: RwLock::new(Arc::new(entries)),
            writer: Mutex::new(()),
        })
    }

    pub fn snapshot(&self) -> Result<MetadataSnapshot, TesseraError> {
        Ok(Arc::clone(&*self.snapshot.read().map_err(|_| poisoned())?))
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, TesseraError> {
        Ok(self.snapshot()?.get(key).cloned())
    }

    /// Persist `key = value` through `store`, then publish it.
    pub fn set(&self, store: &dyn RowStore, key: &str, value: &[u8]) -> Result<(), TesseraError> {
        let _writer = self.writer.lock().map_err(|_| poisoned())?;
        store.put_metadata(key, value)?;
        let mut next = self.snapshot()?.as_ref().clone();
        next.insert(key.to_string(), value.to_vec());
        *self.snapshot.write().map_err(|_| poisoned())? = Arc::new(next);
        tracing::debug!(key, "graph metadata updated");
        Ok(())
    }

    /// Replace the snapshot with what `store` currently holds.
    pub fn reload(&self, store: &dyn RowStore) -> Result<(), TesseraError> {
        let _writer = self.writer.lock().map_err(|_| poisoned())?;
        let entries = store.metadata_entries()?;
        *self.snapshot.write().map_err(|_| poisoned())? = Arc::new(entries);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;

    #[test]
    fn set_persists_then_publishes() {
        let store = InMemoryStore::new();
        store.put_metadata("existing", b"1").expect("put");
        let cache = GraphMetadataCache::load(&store).expect("load");
        assert_eq!(cache.get("existing").expect("get"), Some(b"1".to_vec()));

        let before = cache.snapshot().expect("snapshot");
        cache.set(&store, "k", b"v").expect("set");
        // old snapshots are untouched
        assert!(before.get("k").is_none());
        assert_eq!(cache.get("k").expect("get"), Some(b"v".to_vec()));
        assert_eq!(
            store.metadata_entries().expect("entries").get("k"),
            Some(&b"v".to_vec())
        );
    }

    #[test]
    fn reload_picks_up_external_writes() {
        let store = InMemoryStore::new();
        let cache = GraphMetadataCache::load(&store).expect("load");
        store.put_metadata("late", b"x").expect("put");
        assert!(cache.get("late").expect("get").is_none());
        cache.reload(&store).expect("reload");
        assert_eq!(cache.get("late").expect("get"), Some(b"x".to_vec()));
    }
}

//! In-memory storage implementation.
//!
//! This provides a simple in-memory implementation of [`CrdtStorage`]
//! for tests and single-process deployments.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::storage::{CrdtStorage, StorageResult};
use super::types::{CommitMarker, CrdtUpdate, UpdateOrigin};

/// In-memory CRDT storage.
///
/// Thread-safe via `RwLock`; data is lost when dropped.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    /// Document snapshots (name -> binary state)
    docs: Arc<RwLock<HashMap<String, Vec<u8>>>>,

    /// Update logs (name -> list of updates)
    updates: Arc<RwLock<HashMap<String, Vec<StoredUpdate>>>>,

    /// Counter for generating update IDs
    next_id: Arc<RwLock<i64>>,
}

#[derive(Debug, Clone)]
struct StoredUpdate {
    id: i64,
    data: Vec<u8>,
    timestamp: i64,
    origin: UpdateOrigin,
    commit: Option<CommitMarker>,
}

impl MemoryStorage {
    /// Create a new empty in-memory storage.
    pub fn new() -> Self {
        Self::default()
    }

    fn next_update_id(&self) -> i64 {
        let mut id = self.next_id.write().unwrap();
        *id += 1;
        *id
    }
}

impl CrdtStorage for MemoryStorage {
    fn load_doc(&self, name: &str) -> StorageResult<Option<Vec<u8>>> {
        let docs = self.docs.read().unwrap();
        Ok(docs.get(name).cloned())
    }

    fn save_doc(&self, name: &str, state: &[u8]) -> StorageResult<()> {
        let mut docs = self.docs.write().unwrap();
        docs.insert(name.to_string(), state.to_vec());
        Ok(())
    }

    fn append_update_with_commit(
        &self,
        name: &str,
        update: &[u8],
        origin: UpdateOrigin,
        commit: Option<&CommitMarker>,
    ) -> StorageResult<i64> {
        let id = self.next_update_id();
        let stored = StoredUpdate {
            id,
            data: update.to_vec(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            origin,
            commit: commit.cloned(),
        };

        let mut updates = self.updates.write().unwrap();
        updates.entry(name.to_string()).or_default().push(stored);

        Ok(id)
    }

    fn get_updates_since(&self, name: &str, since_id: i64) -> StorageResult<Vec<CrdtUpdate>> {
        let updates = self.updates.read().unwrap();
        let doc_updates = updates.get(name).map(|u| u.as_slice()).unwrap_or(&[]);

        Ok(doc_updates
            .iter()
            .filter(|u| u.id > since_id)
            .map(|u| CrdtUpdate {
                update_id: u.id,
                doc_name: name.to_string(),
                data: u.data.clone(),
                timestamp: u.timestamp,
                origin: u.origin,
                commit: u.commit.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load_doc() {
        let storage = MemoryStorage::new();
        storage.save_doc("test", b"state").unwrap();
        assert_eq!(storage.load_doc("test").unwrap(), Some(b"state".to_vec()));
        assert!(storage.load_doc("other").unwrap().is_none());
    }

    #[test]
    fn test_update_logs_are_per_document() {
        let storage = MemoryStorage::new();
        storage.append_update("a", b"1", UpdateOrigin::Local).unwrap();
        storage.append_update("b", b"2", UpdateOrigin::Migration).unwrap();

        let a = storage.get_all_updates("a").unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].doc_name, "a");
        assert_eq!(storage.get_all_updates("b").unwrap()[0].origin, UpdateOrigin::Migration);
        assert!(storage.get_all_updates("c").unwrap().is_empty());
    }

    #[test]
    fn test_updates_keep_commit_markers_in_order() {
        let storage = MemoryStorage::new();
        storage.append_update("doc", b"a", UpdateOrigin::Local).unwrap();
        let marker = CommitMarker {
            message: "init".into(),
            heads: "h".into(),
            time: 10,
            author: None,
        };
        let id = storage
            .append_update_with_commit("doc", b"b", UpdateOrigin::Local, Some(&marker))
            .unwrap();

        let all = storage.get_all_updates("doc").unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].commit.is_none());
        assert_eq!(all[1].commit.as_ref(), Some(&marker));
        assert_eq!(all[1].update_id, id);
        assert_eq!(storage.get_updates_since("doc", all[0].update_id).unwrap().len(), 1);
    }
}

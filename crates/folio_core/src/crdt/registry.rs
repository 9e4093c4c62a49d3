//! Owned registry of live artifact documents.
//!
//! [`DocRegistry`] coordinates the [`ArtifactHandle`]s of one process: lazy
//! loading on first access, caching so concurrent finds for the same id share
//! one handle, and an explicit [`DocRegistry::dispose`] that persists every
//! live document.
//!
//! # Example
//!
//! ```ignore
//! use folio_core::crdt::{DocRegistry, MemoryStorage};
//! use std::sync::Arc;
//!
//! let registry = DocRegistry::new(Arc::new(MemoryStorage::new()));
//! let handle = registry.create(&artifact)?;
//! let same = registry.find(handle.doc_name())?;
//! registry.dispose()?;
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use super::handle::ArtifactHandle;
use super::storage::{CrdtStorage, StorageResult};
use crate::artifact::{Document, VersionedArtifact};
use crate::error::StoreError;

/// Registry of live artifact documents, keyed by document name.
pub struct DocRegistry {
    storage: Arc<dyn CrdtStorage>,
    docs: RwLock<HashMap<String, Arc<ArtifactHandle>>>,
    disposed: AtomicBool,
}

impl DocRegistry {
    pub fn new(storage: Arc<dyn CrdtStorage>) -> Self {
        Self {
            storage,
            docs: RwLock::new(HashMap::new()),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn storage(&self) -> &Arc<dyn CrdtStorage> {
        &self.storage
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(StoreError::Repository(
                "document registry has been disposed".to_string(),
            ));
        }
        Ok(())
    }

    /// Create and persist a new document holding `artifact`.
    pub fn create(
        &self,
        artifact: &VersionedArtifact<Document>,
    ) -> StorageResult<Arc<ArtifactHandle>> {
        self.ensure_open()?;
        let doc_name = uuid::Uuid::new_v4().to_string();
        let handle = Arc::new(ArtifactHandle::new(
            Arc::clone(&self.storage),
            doc_name.clone(),
        ));
        handle.initialize(artifact)?;

        let mut docs = self.docs.write().unwrap();
        docs.insert(doc_name.clone(), Arc::clone(&handle));
        log::debug!("Created artifact document {}", doc_name);
        Ok(handle)
    }

    /// Find a document, loading it from storage if necessary.
    ///
    /// Fails `NotFound` when storage has no such document or it has been
    /// deleted. Uses double-checked locking so concurrent callers share one
    /// handle.
    pub fn find(&self, doc_name: &str) -> StorageResult<Arc<ArtifactHandle>> {
        self.ensure_open()?;
        let handle = self.get_or_load(doc_name)?;
        if handle.is_deleted() {
            return Err(StoreError::NotFound(format!("artifact {doc_name} was deleted")));
        }
        Ok(handle)
    }

    fn get_or_load(&self, doc_name: &str) -> StorageResult<Arc<ArtifactHandle>> {
        // Fast path: check cache with read lock
        {
            let docs = self.docs.read().unwrap();
            if let Some(doc) = docs.get(doc_name) {
                return Ok(Arc::clone(doc));
            }
        }

        let state = self
            .storage
            .load_doc(doc_name)
            .map_err(reclassify_unavailable)?
            .ok_or_else(|| StoreError::NotFound(format!("artifact {doc_name}")))?;

        // Acquire write lock for potential insertion
        let mut docs = self.docs.write().unwrap();

        // Double-check: another thread may have inserted while we waited
        if let Some(doc) = docs.get(doc_name) {
            return Ok(Arc::clone(doc));
        }

        let handle = Arc::new(
            ArtifactHandle::from_state(Arc::clone(&self.storage), doc_name.to_string(), &state)
                .map_err(reclassify_unavailable)?,
        );
        docs.insert(doc_name.to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Remove a document from the cache without touching storage.
    pub fn unload(&self, doc_name: &str) -> Option<Arc<ArtifactHandle>> {
        let mut docs = self.docs.write().unwrap();
        docs.remove(doc_name)
    }

    /// Save all loaded documents to storage.
    fn save_all(&self) -> StorageResult<()> {
        let docs = self.docs.read().unwrap();
        for doc in docs.values() {
            doc.save()?;
        }
        Ok(())
    }

    /// Persist every live document and close the registry.
    ///
    /// Later calls fail with `Repository`. Disposing twice is a no-op.
    pub fn dispose(&self) -> StorageResult<()> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.save_all()?;
        let released = {
            let mut docs = self.docs.write().unwrap();
            docs.drain().count()
        };
        log::debug!("Disposed document registry ({} live documents)", released);
        Ok(())
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl Drop for DocRegistry {
    fn drop(&mut self) {
        if !self.is_disposed()
            && let Err(e) = self.dispose()
        {
            log::warn!("Failed to persist documents on drop: {}", e);
        }
    }
}

/// Map "unavailable" backend reports to `NotFound`.
///
/// Typed `NotFound` from the storage is preferred; this string match on
/// `Repository` messages is a last-resort fallback for storages that only
/// report reachability in text.
pub(crate) fn reclassify_unavailable(err: StoreError) -> StoreError {
    match err {
        StoreError::Repository(message) if message.to_lowercase().contains("unavailable") => {
            StoreError::NotFound(message)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::MemoryStorage;
    use crate::rich_text::RichTextSpan;

    fn artifact(text: &str) -> VersionedArtifact<Document> {
        VersionedArtifact::new(
            "document",
            1,
            Document::from_spans(vec![RichTextSpan::text(text)]),
        )
    }

    #[test]
    fn test_find_shares_handles() {
        let registry = DocRegistry::new(Arc::new(MemoryStorage::new()));
        let created = registry.create(&artifact("x")).unwrap();

        let a = registry.find(created.doc_name()).unwrap();
        let b = registry.find(created.doc_name()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &created));
    }

    #[test]
    fn test_find_loads_from_storage() {
        let storage: Arc<dyn CrdtStorage> = Arc::new(MemoryStorage::new());
        let name = {
            let registry = DocRegistry::new(Arc::clone(&storage));
            let handle = registry.create(&artifact("persisted")).unwrap();
            handle
                .update_content(vec![RichTextSpan::text("persisted twice")])
                .unwrap();
            let name = handle.doc_name().to_string();
            registry.dispose().unwrap();
            name
        };

        let registry = DocRegistry::new(storage);
        let handle = registry.find(&name).unwrap();
        assert_eq!(handle.read_raw().payload.plain_text(), "persisted twice");
    }

    #[test]
    fn test_missing_is_not_found() {
        let registry = DocRegistry::new(Arc::new(MemoryStorage::new()));
        assert!(matches!(registry.find("nope"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_deleted_is_not_found() {
        let registry = DocRegistry::new(Arc::new(MemoryStorage::new()));
        let handle = registry.create(&artifact("x")).unwrap();
        handle.mark_deleted().unwrap();
        registry.unload(handle.doc_name());
        assert!(matches!(
            registry.find(handle.doc_name()),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_disposed_registry_rejects_calls() {
        let registry = DocRegistry::new(Arc::new(MemoryStorage::new()));
        let handle = registry.create(&artifact("x")).unwrap();
        registry.dispose().unwrap();
        assert!(registry.docs.read().unwrap().is_empty());
        assert!(matches!(
            registry.find(handle.doc_name()),
            Err(StoreError::Repository(_))
        ));
        assert!(registry.dispose().is_ok());
    }

    #[test]
    fn test_unavailable_fallback() {
        let mapped = reclassify_unavailable(StoreError::Repository(
            "peer Unavailable: timed out".into(),
        ));
        assert!(matches!(mapped, StoreError::NotFound(_)));

        let kept = reclassify_unavailable(StoreError::Repository("disk full".into()));
        assert!(matches!(kept, StoreError::Repository(_)));
    }
}

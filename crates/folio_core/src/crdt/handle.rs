//! Live handle on one artifact's CRDT document.
//!
//! An [`ArtifactHandle`] owns the yrs document and records every local
//! mutation in the storage update log. Mutations on one handle are
//! serialized by an internal lock; edits from other replicas arrive through
//! [`ArtifactHandle::apply_update`] and merge conflict-free.

use std::sync::{Arc, Mutex};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::{Encode, Encoder, EncoderV1};
use yrs::{Doc, ReadTxn, Snapshot, StateVector, Transact, TransactionMut, Update};

use super::document::{DocRoots, doc_options};
use super::storage::{CrdtStorage, StorageResult};
use super::types::{CommitMarker, CrdtUpdate, UpdateOrigin};
use crate::artifact::{Document, VersionedArtifact};
use crate::error::StoreError;
use crate::fs::BoxFuture;
use crate::migration::{Migration, MigrationTarget};
use crate::rich_text::RichTextSpan;

/// A live, mutable reference to one artifact document.
pub struct ArtifactHandle {
    doc: Doc,
    roots: DocRoots,
    storage: Arc<dyn CrdtStorage>,
    doc_name: String,
    write_lock: Mutex<()>,
}

impl ArtifactHandle {
    /// Create a new, empty document (not yet persisted).
    pub(crate) fn new(storage: Arc<dyn CrdtStorage>, doc_name: String) -> Self {
        let doc = Doc::with_options(doc_options());
        let roots = DocRoots::new(&doc);
        Self {
            doc,
            roots,
            storage,
            doc_name,
            write_lock: Mutex::new(()),
        }
    }

    /// Rebuild a document from its stored snapshot plus the update log.
    ///
    /// Replaying updates already contained in the snapshot is a no-op, so
    /// edits logged after the last save are never lost.
    pub(crate) fn from_state(
        storage: Arc<dyn CrdtStorage>,
        doc_name: String,
        state: &[u8],
    ) -> StorageResult<Self> {
        let handle = Self::new(storage, doc_name);
        {
            let mut txn = handle.doc.transact_mut();
            match Update::decode_v1(state) {
                Ok(update) => {
                    if let Err(e) = txn.apply_update(update) {
                        log::warn!(
                            "Failed to apply stored state for {}: {}",
                            handle.doc_name,
                            e
                        );
                    }
                }
                Err(e) => log::warn!("Corrupted snapshot for {}: {}", handle.doc_name, e),
            }
            for logged in handle.storage.get_all_updates(&handle.doc_name)? {
                if let Ok(update) = Update::decode_v1(&logged.data)
                    && let Err(e) = txn.apply_update(update)
                {
                    log::warn!(
                        "Skipping update {} of {}: {}",
                        logged.update_id,
                        handle.doc_name,
                        e
                    );
                }
            }
        }
        log::debug!("Loaded artifact document {}", handle.doc_name);
        Ok(handle)
    }

    /// Get the document name.
    pub fn doc_name(&self) -> &str {
        &self.doc_name
    }

    // ==================== Reads ====================

    /// The envelope as stored, without running migrations.
    pub fn read_raw(&self) -> VersionedArtifact<Document> {
        self.roots.view(&self.doc.transact())
    }

    pub fn schema_version(&self) -> u32 {
        self.roots.schema_version(&self.doc.transact())
    }

    pub fn is_deleted(&self) -> bool {
        self.roots.is_deleted(&self.doc.transact())
    }

    /// Current heads: the encoded snapshot of the document.
    pub fn heads(&self) -> String {
        let snapshot = self.doc.transact().snapshot();
        URL_SAFE_NO_PAD.encode(snapshot.encode_v1())
    }

    /// The envelope as it was at `heads`, without running migrations.
    pub fn view_at(&self, heads: &str) -> StorageResult<VersionedArtifact<Document>> {
        let bytes = URL_SAFE_NO_PAD
            .decode(heads)
            .map_err(|e| StoreError::Validation(format!("malformed heads: {e}")))?;
        let snapshot = Snapshot::decode_v1(&bytes)
            .map_err(|e| StoreError::Validation(format!("malformed heads: {e}")))?;

        let mut encoder = EncoderV1::new();
        self.doc
            .transact()
            .encode_state_from_snapshot(&snapshot, &mut encoder)
            .map_err(|e| StoreError::repository("materializing snapshot", e))?;
        let state = encoder.to_vec();

        let pinned = Doc::with_options(doc_options());
        let roots = DocRoots::new(&pinned);
        {
            let update = Update::decode_v1(&state)
                .map_err(|e| StoreError::repository("decoding snapshot state", e))?;
            let mut txn = pinned.transact_mut();
            txn.apply_update(update)
                .map_err(|e| StoreError::repository("applying snapshot state", e))?;
        }
        let view = roots.view(&pinned.transact());
        Ok(view)
    }

    /// Commit markers in log order (oldest first).
    pub fn commits(&self) -> StorageResult<Vec<CommitMarker>> {
        Ok(self
            .storage
            .get_all_updates(&self.doc_name)?
            .into_iter()
            .filter_map(|update| update.commit)
            .collect())
    }

    /// The update log for this document.
    pub fn get_history(&self) -> StorageResult<Vec<CrdtUpdate>> {
        self.storage.get_all_updates(&self.doc_name)
    }

    // ==================== Mutations ====================

    /// Write the initial envelope of a freshly created document.
    pub(crate) fn initialize(&self, artifact: &VersionedArtifact<Document>) -> StorageResult<()> {
        let _guard = self.write_lock.lock().unwrap();
        let (_, update) = self.record(|roots, txn| roots.write(txn, artifact));
        self.storage
            .append_update(&self.doc_name, &update, UpdateOrigin::Local)?;
        self.save()
    }

    /// Replace the span sequence in one transaction.
    ///
    /// Returns `false` when the spans were already current.
    pub fn update_content(&self, spans: Vec<RichTextSpan>) -> StorageResult<bool> {
        let _guard = self.write_lock.lock().unwrap();
        let mut payload = self.read_raw().payload;
        payload.spans = spans;
        let (changed, update) = self.record(|roots, txn| roots.write_payload(txn, &payload));
        if changed {
            self.storage
                .append_update(&self.doc_name, &update, UpdateOrigin::Local)?;
        }
        Ok(changed)
    }

    /// Record a message-bearing commit.
    ///
    /// The commit is a touch of the `lastCommit` meta entry; content is not
    /// modified. The returned marker carries the heads right after the touch.
    pub fn commit(&self, message: &str) -> StorageResult<CommitMarker> {
        let _guard = self.write_lock.lock().unwrap();
        let time = chrono::Utc::now().timestamp_millis();
        let touch = serde_json::json!({ "message": message, "time": time }).to_string();
        let (_, update) = self.record(|roots, txn| roots.touch_commit(txn, &touch));

        let marker = CommitMarker {
            message: message.to_string(),
            heads: self.heads(),
            time,
            author: None,
        };
        self.storage.append_update_with_commit(
            &self.doc_name,
            &update,
            UpdateOrigin::Local,
            Some(&marker),
        )?;
        log::debug!("Recorded commit '{}' on {}", message, self.doc_name);
        Ok(marker)
    }

    /// Tombstone the document.
    pub(crate) fn mark_deleted(&self) -> StorageResult<()> {
        let _guard = self.write_lock.lock().unwrap();
        let (_, update) = self.record(|roots, txn| roots.mark_deleted(txn));
        self.storage
            .append_update(&self.doc_name, &update, UpdateOrigin::Local)?;
        self.save()
    }

    /// Apply an update produced by another replica.
    pub fn apply_update(&self, update: &[u8], origin: UpdateOrigin) -> StorageResult<i64> {
        let decoded = Update::decode_v1(update)
            .map_err(|e| StoreError::repository("decoding update", e))?;
        let _guard = self.write_lock.lock().unwrap();
        {
            let mut txn = self.doc.transact_mut();
            txn.apply_update(decoded)
                .map_err(|e| StoreError::repository("applying update", e))?;
        }
        self.storage.append_update(&self.doc_name, update, origin)
    }

    /// Run `f` in one transaction and return its result with the encoded update.
    fn record<R>(&self, f: impl FnOnce(&DocRoots, &mut TransactionMut) -> R) -> (R, Vec<u8>) {
        let sv_before = self.doc.transact().state_vector();
        let result = {
            let mut txn = self.doc.transact_mut();
            f(&self.roots, &mut txn)
        };
        let update = self.doc.transact().encode_state_as_update_v1(&sv_before);
        (result, update)
    }

    // ==================== Sync & Persistence ====================

    /// Encode the full state as an update.
    pub fn encode_state_as_update(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    /// Save the current state to storage.
    pub fn save(&self) -> StorageResult<()> {
        let state = self.encode_state_as_update();
        self.storage.save_doc(&self.doc_name, &state)
    }
}

impl MigrationTarget for ArtifactHandle {
    fn schema_version(&self) -> BoxFuture<'_, StorageResult<u32>> {
        Box::pin(async move { Ok(ArtifactHandle::schema_version(self)) })
    }

    /// Compare-and-set on `schemaVersion`: the version check, the transform
    /// and the write happen under the handle's write lock, and the write is
    /// one transaction recorded as a single migration update.
    fn apply_migration<'a>(
        &'a self,
        migration: &'a Migration,
    ) -> BoxFuture<'a, StorageResult<bool>> {
        Box::pin(async move {
            let _guard = self.write_lock.lock().unwrap();
            let current = self.read_raw();
            if current.schema_version != migration.from_version {
                return Ok(false);
            }

            let mut draft = current.payload;
            migration.apply(&mut draft)?;

            let to_version = migration.to_version();
            let (_, update) = self.record(|roots, txn| {
                roots.write_payload(txn, &draft);
                roots.set_schema_version(txn, to_version);
            });
            self.storage
                .append_update(&self.doc_name, &update, UpdateOrigin::Migration)?;
            Ok(true)
        })
    }
}

impl std::fmt::Debug for ArtifactHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactHandle")
            .field("doc_name", &self.doc_name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::MemoryStorage;
    use crate::fs::block_on_test;
    use crate::migration::migrate_if_needed;
    use crate::test_utils::{counting_migrations, two_step_migrations};
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn handle_with(text: &str) -> ArtifactHandle {
        let storage: Arc<dyn CrdtStorage> = Arc::new(MemoryStorage::new());
        let handle = ArtifactHandle::new(storage, "doc".to_string());
        handle
            .initialize(&VersionedArtifact::new(
                "document",
                0,
                Document::from_spans(vec![RichTextSpan::text(text)]),
            ))
            .unwrap();
        handle
    }

    #[test]
    fn test_update_content_minimal_and_logged() {
        let handle = handle_with("Hello World");
        let before = handle.get_history().unwrap().len();

        assert!(
            handle
                .update_content(vec![RichTextSpan::text("Hello Big World")])
                .unwrap()
        );
        assert_eq!(handle.read_raw().payload.plain_text(), "Hello Big World");
        assert_eq!(handle.get_history().unwrap().len(), before + 1);

        // Same spans again: nothing recorded
        assert!(
            !handle
                .update_content(vec![RichTextSpan::text("Hello Big World")])
                .unwrap()
        );
        assert_eq!(handle.get_history().unwrap().len(), before + 1);
    }

    #[test]
    fn test_view_at_commit_is_pinned() {
        let handle = handle_with("first");
        let marker = handle.commit("init").unwrap();
        handle
            .update_content(vec![RichTextSpan::text("second")])
            .unwrap();

        let pinned = handle.view_at(&marker.heads).unwrap();
        assert_eq!(pinned.payload.plain_text(), "first");
        assert_eq!(handle.read_raw().payload.plain_text(), "second");
    }

    #[test]
    fn test_commit_does_not_touch_payload() {
        let handle = handle_with("text");
        let before = handle.read_raw();
        let marker = handle.commit("msg").unwrap();
        assert_eq!(handle.read_raw(), before);
        assert_eq!(handle.commits().unwrap(), vec![marker]);
    }

    #[test]
    fn test_malformed_heads_is_validation() {
        let handle = handle_with("x");
        assert!(matches!(
            handle.view_at("%%%"),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn test_migration_steps_are_logged() {
        let handle = handle_with("body");
        let applied = block_on_test(migrate_if_needed(&two_step_migrations(), 2, &handle)).unwrap();
        assert_eq!(applied, 2);

        let artifact = handle.read_raw();
        assert_eq!(artifact.schema_version, 2);
        assert_eq!(artifact.payload.properties["title"], json!("UNTITLED"));

        let migration_updates = handle
            .get_history()
            .unwrap()
            .into_iter()
            .filter(|u| u.origin == UpdateOrigin::Migration)
            .count();
        assert_eq!(migration_updates, 2);
    }

    #[test]
    fn test_stale_migration_is_rejected() {
        let handle = handle_with("body");
        let migrations = two_step_migrations();
        let step = migrations.get(0).unwrap();
        assert!(block_on_test(handle.apply_migration(step)).unwrap());
        // Version already moved on: compare-and-set fails without writing
        assert!(!block_on_test(handle.apply_migration(step)).unwrap());
        assert_eq!(handle.schema_version(), 1);
    }

    #[test]
    fn test_concurrent_migrations_apply_each_step_once() {
        let handle = handle_with("body");
        let (migrations, runs) = counting_migrations();

        let applied: u32 = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..4)
                .map(|_| scope.spawn(|| block_on_test(migrate_if_needed(&migrations, 2, &handle))))
                .collect();
            workers.into_iter().map(|w| w.join().unwrap().unwrap()).sum()
        });

        assert_eq!(applied, 2);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        let artifact = handle.read_raw();
        assert_eq!(artifact.schema_version, 2);
        assert_eq!(artifact.payload.properties["steps"], json!(2));
    }

    #[test]
    fn test_replicas_converge() {
        let a = handle_with("shared");
        let storage: Arc<dyn CrdtStorage> = Arc::new(MemoryStorage::new());
        let b = ArtifactHandle::new(storage, "doc".to_string());
        b.apply_update(&a.encode_state_as_update(), UpdateOrigin::Remote)
            .unwrap();

        a.update_content(vec![RichTextSpan::text("A shared")]).unwrap();
        b.update_content(vec![RichTextSpan::text("shared B")]).unwrap();

        a.apply_update(&b.encode_state_as_update(), UpdateOrigin::Remote)
            .unwrap();
        b.apply_update(&a.encode_state_as_update(), UpdateOrigin::Remote)
            .unwrap();

        assert_eq!(a.read_raw(), b.read_raw());
        assert_eq!(a.read_raw().payload.plain_text(), "A shared B");
    }

    #[test]
    fn test_reload_replays_unsaved_updates() {
        let storage: Arc<dyn CrdtStorage> = Arc::new(MemoryStorage::new());
        let handle = ArtifactHandle::new(Arc::clone(&storage), "doc".to_string());
        handle
            .initialize(&VersionedArtifact::new("document", 1, Document::default()))
            .unwrap();
        // Logged but never saved as a snapshot
        handle
            .update_content(vec![RichTextSpan::text("unsaved")])
            .unwrap();

        let state = storage.load_doc("doc").unwrap().unwrap();
        let reloaded = ArtifactHandle::from_state(storage, "doc".to_string(), &state).unwrap();
        assert_eq!(reloaded.read_raw().payload.plain_text(), "unsaved");
    }
}

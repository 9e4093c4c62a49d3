//! Storage abstraction for CRDT persistence.
//!
//! This module defines the [`CrdtStorage`] trait which abstracts over storage
//! backends for persisting CRDT documents and their update logs.

use super::types::{CommitMarker, CrdtUpdate, UpdateOrigin};
use crate::error::StoreResult;

/// Result type for storage operations.
pub type StorageResult<T> = StoreResult<T>;

/// Trait for CRDT document storage backends.
///
/// # Storage Model
///
/// The storage maintains two types of data:
/// 1. **Document snapshots**: Compacted full state of a CRDT document
/// 2. **Update log**: Incremental updates, in append order
///
/// The update log is the source of commit history: commits are ordinary
/// updates that carry a [`CommitMarker`].
///
/// Implementations report a missing document as `Ok(None)`. A networked
/// implementation that cannot reach a peer should return
/// `StoreError::NotFound`.
pub trait CrdtStorage: Send + Sync {
    /// Load the full document state as a binary blob.
    ///
    /// Returns `None` if the document doesn't exist.
    fn load_doc(&self, name: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Save the full document state.
    ///
    /// This overwrites any existing state for the document.
    fn save_doc(&self, name: &str, state: &[u8]) -> StorageResult<()>;

    /// Append an incremental update to the update log.
    ///
    /// Returns the ID of the newly created update record.
    fn append_update(&self, name: &str, update: &[u8], origin: UpdateOrigin) -> StorageResult<i64> {
        self.append_update_with_commit(name, update, origin, None)
    }

    /// Append an update, optionally marking it as a commit.
    fn append_update_with_commit(
        &self,
        name: &str,
        update: &[u8],
        origin: UpdateOrigin,
        commit: Option<&CommitMarker>,
    ) -> StorageResult<i64>;

    /// Get all updates for a document since a given update ID.
    fn get_updates_since(&self, name: &str, since_id: i64) -> StorageResult<Vec<CrdtUpdate>>;

    /// Get all updates for a document, oldest first.
    fn get_all_updates(&self, name: &str) -> StorageResult<Vec<CrdtUpdate>> {
        self.get_updates_since(name, 0)
    }
}

//! Commit history and time-travel views for CRDT artifacts.
//!
//! Commits live in the update log as updates carrying a [`CommitMarker`].
//! History is those markers, newest first, led by one uncommitted entry when
//! the live document differs from the latest commit.
//!
//! Views pinned at a commit never change, so the [`HistoryManager`] keeps a
//! small cache of materialized views.

use std::collections::HashMap;
use std::sync::RwLock;

use super::handle::ArtifactHandle;
use super::storage::StorageResult;
use super::types::CommitMarker;
use crate::artifact::{Document, VersionedArtifact};
use crate::change::{Change, ChangeId, Commit, CommitHash, assemble_history};
use crate::error::StoreError;

/// Maximum number of cached views
const VIEW_CACHE_MAX_SIZE: usize = 32;

/// Builds histories and pinned views for artifact handles.
#[derive(Default)]
pub struct HistoryManager {
    /// (doc name, heads) -> raw view at those heads
    view_cache: RwLock<HashMap<(String, String), VersionedArtifact<Document>>>,
}

impl HistoryManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// History of the handle, newest first.
    ///
    /// With no commits the artifact counts as uncommitted iff its payload is
    /// non-empty; otherwise the live view is compared with the latest commit.
    pub fn history_of(&self, handle: &ArtifactHandle) -> StorageResult<Vec<Change>> {
        let markers = handle.commits()?;
        let has_uncommitted = match markers.last() {
            None => !handle.read_raw().payload.is_empty(),
            Some(latest) => self.raw_view(handle, &latest.heads)? != handle.read_raw(),
        };

        let commits = markers.into_iter().rev().map(commit_from_marker).collect();
        Ok(assemble_history(commits, has_uncommitted))
    }

    /// Raw (unmigrated) view of the handle at `change`.
    ///
    /// Fails `NotFound` when `change` is not a commit of this artifact.
    pub fn raw_at(
        &self,
        handle: &ArtifactHandle,
        change: &ChangeId,
    ) -> StorageResult<VersionedArtifact<Document>> {
        match change {
            ChangeId::Uncommitted => Ok(handle.read_raw()),
            ChangeId::Commit(hash) => {
                let known = handle
                    .commits()?
                    .iter()
                    .any(|marker| marker.heads == hash.as_str());
                if !known {
                    return Err(StoreError::NotFound(format!(
                        "commit {} of {}",
                        abbreviate(hash.as_str()),
                        handle.doc_name()
                    )));
                }
                self.raw_view(handle, hash.as_str())
            }
        }
    }

    fn raw_view(
        &self,
        handle: &ArtifactHandle,
        heads: &str,
    ) -> StorageResult<VersionedArtifact<Document>> {
        let key = (handle.doc_name().to_string(), heads.to_string());
        {
            let cache = self.view_cache.read().unwrap();
            if let Some(view) = cache.get(&key) {
                return Ok(view.clone());
            }
        }

        let view = handle.view_at(heads)?;

        let mut cache = self.view_cache.write().unwrap();
        if cache.len() >= VIEW_CACHE_MAX_SIZE {
            cache.clear();
        }
        cache.insert(key, view.clone());
        Ok(view)
    }
}

fn commit_from_marker(marker: CommitMarker) -> Commit {
    Commit {
        id: CommitHash::new(marker.heads),
        message: marker.message,
        time: marker.time,
        author: marker.author,
    }
}

fn abbreviate(heads: &str) -> &str {
    heads.get(..12).unwrap_or(heads)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::{CrdtStorage, MemoryStorage};
    use crate::rich_text::RichTextSpan;
    use std::sync::Arc;

    fn handle(spans: Vec<RichTextSpan>) -> ArtifactHandle {
        let storage: Arc<dyn CrdtStorage> = Arc::new(MemoryStorage::new());
        let handle = ArtifactHandle::new(storage, "doc".to_string());
        handle
            .initialize(&VersionedArtifact::new("document", 1, Document::from_spans(spans)))
            .unwrap();
        handle
    }

    #[test]
    fn test_empty_artifact_has_empty_history() {
        let history = HistoryManager::new();
        assert!(history.history_of(&handle(Vec::new())).unwrap().is_empty());
    }

    #[test]
    fn test_uncommitted_content_without_commits() {
        let history = HistoryManager::new();
        let changes = history
            .history_of(&handle(vec![RichTextSpan::text("draft")]))
            .unwrap();
        assert_eq!(changes, vec![Change::Uncommitted]);
    }

    #[test]
    fn test_n_commits_then_edit() {
        let history = HistoryManager::new();
        let handle = handle(vec![RichTextSpan::text("v1")]);
        handle.commit("one").unwrap();
        handle.update_content(vec![RichTextSpan::text("v2")]).unwrap();
        handle.commit("two").unwrap();

        let clean = history.history_of(&handle).unwrap();
        assert_eq!(clean.len(), 2);
        assert_eq!(clean[0].as_commit().unwrap().message, "two");
        assert_eq!(clean[1].as_commit().unwrap().message, "one");

        handle.update_content(vec![RichTextSpan::text("v3")]).unwrap();
        let dirty = history.history_of(&handle).unwrap();
        assert_eq!(dirty.len(), 3);
        assert_eq!(dirty[0], Change::Uncommitted);
        assert_eq!(dirty[1].as_commit().unwrap().message, "two");
    }

    #[test]
    fn test_edit_then_revert_is_clean() {
        let history = HistoryManager::new();
        let handle = handle(vec![RichTextSpan::text("same")]);
        handle.commit("c").unwrap();
        handle.update_content(vec![RichTextSpan::text("other")]).unwrap();
        handle.update_content(vec![RichTextSpan::text("same")]).unwrap();
        assert_eq!(history.history_of(&handle).unwrap().len(), 1);
    }

    #[test]
    fn test_raw_at_unknown_commit_is_not_found() {
        let history = HistoryManager::new();
        let handle = handle(vec![RichTextSpan::text("x")]);
        let err = history
            .raw_at(&handle, &ChangeId::commit("not-a-commit"))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}

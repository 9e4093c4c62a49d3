//! The CRDT-backed artifact store.
//!
//! Artifact ids are `crdt:<document name>`. Handles come from an owned
//! [`DocRegistry`]; every read migrates the live document first, so callers
//! only ever observe the current schema version.

use std::sync::Arc;
use std::time::Duration;

use super::handle::ArtifactHandle;
use super::history::HistoryManager;
use super::registry::DocRegistry;
use crate::artifact::{ArtifactId, Document, VersionedArtifact, ensure_well_formed};
use crate::change::{Change, ChangeId};
use crate::config::{BackendKind, StoreConfig};
use crate::error::{StoreError, StoreResult};
use crate::fs::BoxFuture;
use crate::migration::{MigrationSet, migrate_detached, migrate_if_needed};
use crate::rich_text::{RichTextSpan, canonicalize_spans};
use crate::store::{ArtifactStore, sealed};

const ID_PREFIX: &str = "crdt:";

/// Artifact store over CRDT documents.
pub struct CrdtArtifactStore {
    registry: Arc<DocRegistry>,
    history: HistoryManager,
    migrations: MigrationSet,
    artifact_type: String,
    find_timeout: Duration,
}

impl CrdtArtifactStore {
    pub fn new(registry: Arc<DocRegistry>, migrations: MigrationSet, config: &StoreConfig) -> Self {
        Self {
            registry,
            history: HistoryManager::new(),
            migrations,
            artifact_type: config.artifact_type.clone(),
            find_timeout: config.find_timeout(),
        }
    }

    pub fn registry(&self) -> &Arc<DocRegistry> {
        &self.registry
    }

    /// Schema version every read is migrated to.
    pub fn current_version(&self) -> u32 {
        self.migrations.current_version()
    }

    /// The id addressing `handle`.
    pub fn artifact_id(handle: &ArtifactHandle) -> ArtifactId {
        ArtifactId::new(format!("{ID_PREFIX}{}", handle.doc_name()))
    }

    /// Resolve an id to its live handle.
    ///
    /// Fails `NotFound` if the document is unreachable, deleted, or does not
    /// resolve within the configured timeout. Storage loads run on the
    /// blocking pool so a stalled backend cannot hold up the caller past the
    /// timeout; the load itself keeps running and still fills the cache.
    pub async fn find(&self, id: &ArtifactId) -> StoreResult<Arc<ArtifactHandle>> {
        let doc_name = parse_id(id)?.to_string();
        let registry = Arc::clone(&self.registry);
        let load = tokio::task::spawn_blocking(move || registry.find(&doc_name));

        match tokio::time::timeout(self.find_timeout, load).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(StoreError::repository("loading artifact", e)),
            Err(_) => Err(StoreError::NotFound(format!(
                "artifact {} did not resolve within {:?}",
                id, self.find_timeout
            ))),
        }
    }

    /// Read the document behind `handle`, migrating it first.
    pub async fn read_document(
        &self,
        handle: &ArtifactHandle,
    ) -> StoreResult<VersionedArtifact<Document>> {
        migrate_if_needed(&self.migrations, self.current_version(), handle).await?;
        Ok(handle.read_raw())
    }

}

fn parse_id(id: &ArtifactId) -> StoreResult<&str> {
    ensure_well_formed(id)?;
    match id.as_str().strip_prefix(ID_PREFIX) {
        Some(name) if !name.is_empty() => Ok(name),
        _ => Err(StoreError::Validation(format!(
            "'{id}' is not a CRDT artifact id"
        ))),
    }
}

impl sealed::Sealed for CrdtArtifactStore {}

impl ArtifactStore for CrdtArtifactStore {
    fn backend(&self) -> BackendKind {
        BackendKind::Crdt
    }

    fn create(
        &self,
        seed: Option<VersionedArtifact<Document>>,
    ) -> BoxFuture<'_, StoreResult<ArtifactId>> {
        Box::pin(async move {
            let mut artifact = seed.unwrap_or_else(|| {
                VersionedArtifact::new(
                    self.artifact_type.clone(),
                    self.current_version(),
                    Document::default(),
                )
            });
            let spans = std::mem::take(&mut artifact.payload.spans);
            artifact.payload.spans = canonicalize_spans(spans);

            let handle = self.registry.create(&artifact)?;
            Ok(Self::artifact_id(&handle))
        })
    }

    fn read<'a>(
        &'a self,
        id: &'a ArtifactId,
    ) -> BoxFuture<'a, StoreResult<VersionedArtifact<Document>>> {
        Box::pin(async move {
            let handle = self.find(id).await?;
            self.read_document(&handle).await
        })
    }

    fn update_content<'a>(
        &'a self,
        id: &'a ArtifactId,
        spans: Vec<RichTextSpan>,
    ) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            let handle = self.find(id).await?;
            self.read_document(&handle).await?;
            handle.update_content(spans)?;
            Ok(())
        })
    }

    fn delete<'a>(&'a self, id: &'a ArtifactId) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            let handle = self.find(id).await?;
            handle.mark_deleted()?;
            self.registry.unload(handle.doc_name());
            log::debug!("Deleted artifact {}", id);
            Ok(())
        })
    }

    fn commit<'a>(
        &'a self,
        id: &'a ArtifactId,
        message: &'a str,
    ) -> BoxFuture<'a, StoreResult<ChangeId>> {
        Box::pin(async move {
            let handle = self.find(id).await?;
            let marker = handle.commit(message)?;
            Ok(ChangeId::commit(marker.heads))
        })
    }

    fn history<'a>(&'a self, id: &'a ArtifactId) -> BoxFuture<'a, StoreResult<Vec<Change>>> {
        Box::pin(async move {
            let handle = self.find(id).await?;
            self.history.history_of(&handle)
        })
    }

    fn get_at_change<'a>(
        &'a self,
        id: &'a ArtifactId,
        change: &'a ChangeId,
    ) -> BoxFuture<'a, StoreResult<VersionedArtifact<Document>>> {
        Box::pin(async move {
            let handle = self.find(id).await?;
            match change {
                ChangeId::Uncommitted => self.read_document(&handle).await,
                ChangeId::Commit(_) => {
                    let raw = self.history.raw_at(&handle, change)?;
                    migrate_detached(&self.migrations, self.current_version(), raw).await
                }
            }
        })
    }

    fn is_content_equal<'a>(
        &'a self,
        id: &'a ArtifactId,
        a: &'a ChangeId,
        b: &'a ChangeId,
    ) -> BoxFuture<'a, StoreResult<bool>> {
        Box::pin(async move {
            let handle = self.find(id).await?;
            let left = self.history.raw_at(&handle, a)?;
            let right = self.history.raw_at(&handle, b)?;
            Ok(left == right)
        })
    }
}

//! The versioned artifact store contract.
//!
//! [`ArtifactStore`] is implemented exactly twice: by the CRDT store
//! (`crdt::CrdtArtifactStore`) and by the commit-graph store
//! (`git::GitArtifactStore`). The trait is sealed; callers pick one
//! implementation at startup with [`open_store`] and talk to
//! `Arc<dyn ArtifactStore>` from then on.
//!
//! Every artifact handed back by a store is at the current schema version.

use std::sync::Arc;

use crate::artifact::{ArtifactId, Document, VersionedArtifact};
use crate::change::{Change, ChangeId};
use crate::config::{BackendKind, StoreConfig};
use crate::error::{StoreError, StoreResult};
use crate::fs::{AsyncFileSystem, BoxFuture};
use crate::migration::MigrationSet;
use crate::rich_text::RichTextSpan;

pub(crate) mod sealed {
    pub trait Sealed {}
}

/// Operations shared by both store implementations.
pub trait ArtifactStore: sealed::Sealed + Send + Sync {
    /// Which backend this store runs on.
    fn backend(&self) -> BackendKind;

    /// Create an artifact, empty at the current schema version or from `seed`.
    ///
    /// A seed keeps its schema version and is migrated on first read.
    fn create(
        &self,
        seed: Option<VersionedArtifact<Document>>,
    ) -> BoxFuture<'_, StoreResult<ArtifactId>>;

    /// Read the artifact, migrating it to the current schema version first.
    fn read<'a>(
        &'a self,
        id: &'a ArtifactId,
    ) -> BoxFuture<'a, StoreResult<VersionedArtifact<Document>>>;

    /// Replace the rich-text span sequence in one atomic change.
    fn update_content<'a>(
        &'a self,
        id: &'a ArtifactId,
        spans: Vec<RichTextSpan>,
    ) -> BoxFuture<'a, StoreResult<()>>;

    /// Delete the artifact.
    fn delete<'a>(&'a self, id: &'a ArtifactId) -> BoxFuture<'a, StoreResult<()>>;

    /// Record a message-bearing commit and return its id.
    fn commit<'a>(
        &'a self,
        id: &'a ArtifactId,
        message: &'a str,
    ) -> BoxFuture<'a, StoreResult<ChangeId>>;

    /// History of the artifact, newest first, uncommitted entry leading.
    fn history<'a>(&'a self, id: &'a ArtifactId) -> BoxFuture<'a, StoreResult<Vec<Change>>>;

    /// Read-only view of the artifact as of `change`, migrated in memory.
    fn get_at_change<'a>(
        &'a self,
        id: &'a ArtifactId,
        change: &'a ChangeId,
    ) -> BoxFuture<'a, StoreResult<VersionedArtifact<Document>>>;

    /// Whether the two views have identical type, schema version and payload.
    fn is_content_equal<'a>(
        &'a self,
        id: &'a ArtifactId,
        a: &'a ChangeId,
        b: &'a ChangeId,
    ) -> BoxFuture<'a, StoreResult<bool>>;
}

/// Collaborators injected into the store at startup.
pub struct StoreDeps {
    pub migrations: MigrationSet,

    /// Working-tree access for the commit-graph store; must be backed by
    /// the real working tree when the Git backend is selected
    pub fs: Arc<dyn AsyncFileSystem>,

    /// Snapshot and update-log persistence for the CRDT store
    #[cfg(feature = "crdt")]
    pub crdt_storage: Arc<dyn crate::crdt::CrdtStorage>,
}

/// Open the store selected by `config.backend`.
pub async fn open_store(
    config: &StoreConfig,
    deps: StoreDeps,
) -> StoreResult<Arc<dyn ArtifactStore>> {
    log::debug!("Opening {:?} store", config.backend);
    match config.backend {
        #[cfg(feature = "crdt")]
        BackendKind::Crdt => {
            let registry = Arc::new(crate::crdt::DocRegistry::new(deps.crdt_storage));
            Ok(Arc::new(crate::crdt::CrdtArtifactStore::new(
                registry,
                deps.migrations,
                config,
            )))
        }
        #[cfg(feature = "git")]
        BackendKind::Git => {
            let store = crate::git::GitArtifactStore::open(
                &config.git,
                &config.artifact_type,
                deps.fs,
                deps.migrations,
            )
            .await?;
            Ok(Arc::new(store))
        }
        #[allow(unreachable_patterns)]
        other => Err(StoreError::Validation(format!(
            "backend {other:?} is not compiled into this build"
        ))),
    }
}

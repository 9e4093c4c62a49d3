//! Schema migrations for stored artifacts.
//!
//! A [`MigrationSet`] holds one [`Migration`] per source version. The engine
//! ([`migrate_if_needed`]) walks an artifact from whatever version it was
//! written with up to the target version, one step at a time. Each step is
//! applied by the backend as exactly one atomic mutation, so it shows up in
//! the backend's native history like any other edit.
//!
//! Steps are compare-and-set on `schemaVersion`: a handle that has already
//! been advanced by a concurrent run reports `false` from
//! [`MigrationTarget::apply_migration`] and the engine simply re-reads.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::artifact::{Document, VersionedArtifact};
use crate::error::{StoreError, StoreResult};
use crate::fs::BoxFuture;

/// The pure transform run by a migration step.
pub type MigrationFn = dyn Fn(&mut Document) -> Result<(), String> + Send + Sync;

/// Upgrades a payload from `from_version` to `from_version + 1`.
#[derive(Clone)]
pub struct Migration {
    pub from_version: u32,
    up: Arc<MigrationFn>,
}

impl Migration {
    pub fn new<F>(from_version: u32, up: F) -> Self
    where
        F: Fn(&mut Document) -> Result<(), String> + Send + Sync + 'static,
    {
        Self {
            from_version,
            up: Arc::new(up),
        }
    }

    /// Run the transform on a draft of the payload.
    ///
    /// Returns a `Migration` error if the transform rejects the payload.
    pub fn apply(&self, draft: &mut Document) -> StoreResult<()> {
        (self.up)(draft).map_err(|message| StoreError::Migration {
            from_version: self.from_version,
            message,
        })
    }

    pub fn to_version(&self) -> u32 {
        self.from_version + 1
    }
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration")
            .field("from_version", &self.from_version)
            .finish_non_exhaustive()
    }
}

/// Registered migrations, keyed by source version.
#[derive(Debug, Clone, Default)]
pub struct MigrationSet {
    migrations: BTreeMap<u32, Migration>,
}

impl MigrationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a migration (builder pattern). A later registration for the
    /// same source version replaces the earlier one.
    pub fn with(mut self, migration: Migration) -> Self {
        self.register(migration);
        self
    }

    pub fn register(&mut self, migration: Migration) {
        self.migrations.insert(migration.from_version, migration);
    }

    pub fn get(&self, from_version: u32) -> Option<&Migration> {
        self.migrations.get(&from_version)
    }

    /// The schema version produced by the highest registered migration.
    pub fn current_version(&self) -> u32 {
        self.migrations
            .keys()
            .next_back()
            .map(|v| v + 1)
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}

/// Something the migration engine can read and advance.
pub trait MigrationTarget: Send + Sync {
    /// Current schema version (a missing field reads as 0).
    fn schema_version(&self) -> BoxFuture<'_, StoreResult<u32>>;

    /// Apply `migration` as one atomic mutation if the target is still at
    /// `migration.from_version`.
    ///
    /// Returns `false` when the target had already moved on.
    fn apply_migration<'a>(&'a self, migration: &'a Migration) -> BoxFuture<'a, StoreResult<bool>>;
}

/// Bring `target` up to `target_version`.
///
/// No-op when the target is already current. Returns the number of steps
/// this call applied.
pub async fn migrate_if_needed<T>(
    migrations: &MigrationSet,
    target_version: u32,
    target: &T,
) -> StoreResult<u32>
where
    T: MigrationTarget + ?Sized,
{
    let mut applied = 0;
    loop {
        let version = target.schema_version().await?;
        if version == target_version {
            return Ok(applied);
        }
        if version > target_version {
            log::warn!(
                "Artifact is at schema version {} but this build only knows {}; \
                 leaving it untouched",
                version,
                target_version
            );
            return Ok(applied);
        }

        let migration = migrations.get(version).ok_or_else(|| StoreError::Migration {
            from_version: version,
            message: format!("no migration registered for schema version {version}"),
        })?;

        if target.apply_migration(migration).await? {
            log::info!(
                "Migrated artifact from schema version {} to {}",
                migration.from_version,
                migration.to_version()
            );
            applied += 1;
        }
    }
}

/// An artifact held in memory, detached from any backend.
///
/// Used for read-only historical views, which are migrated before being
/// returned but never written back.
#[derive(Debug)]
pub struct DetachedArtifact {
    inner: Mutex<VersionedArtifact<Document>>,
}

impl DetachedArtifact {
    pub fn new(artifact: VersionedArtifact<Document>) -> Self {
        Self {
            inner: Mutex::new(artifact),
        }
    }

    pub fn into_inner(self) -> VersionedArtifact<Document> {
        self.inner.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

impl MigrationTarget for DetachedArtifact {
    fn schema_version(&self) -> BoxFuture<'_, StoreResult<u32>> {
        Box::pin(async move { Ok(self.inner.lock().unwrap().schema_version) })
    }

    fn apply_migration<'a>(&'a self, migration: &'a Migration) -> BoxFuture<'a, StoreResult<bool>> {
        Box::pin(async move {
            let mut artifact = self.inner.lock().unwrap();
            if artifact.schema_version != migration.from_version {
                return Ok(false);
            }
            let mut draft = artifact.payload.clone();
            migration.apply(&mut draft)?;
            artifact.payload = draft;
            artifact.schema_version = migration.to_version();
            Ok(true)
        })
    }
}

/// Migrate a detached artifact in memory and return it.
pub async fn migrate_detached(
    migrations: &MigrationSet,
    target_version: u32,
    artifact: VersionedArtifact<Document>,
) -> StoreResult<VersionedArtifact<Document>> {
    let detached = DetachedArtifact::new(artifact);
    migrate_if_needed(migrations, target_version, &detached).await?;
    Ok(detached.into_inner())
}

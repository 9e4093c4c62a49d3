//! The commit-graph artifact store.
//!
//! Artifacts are pretty-printed JSON files in the working tree; history is
//! the repository's commit graph filtered by path. Ids are
//! `<branch>:<relative path>`. Only the checked-out branch is mutable: an id
//! naming another branch is read from that branch's tip and cannot be
//! written.
//!
//! The repository sits behind a `std::sync::Mutex`; every `git2` call runs
//! inside [`GitArtifactStore::with_repo`] so no guard outlives a
//! synchronous section.

use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use git2::{Oid, Repository};
use tokio::sync::Semaphore;

use super::branch::BranchManager;
use super::conflict::ConflictDetector;
use super::history::{differs_from_blob, path_history};
use super::repo::{
    GitArtifactRef, blob_at, blob_id, branch_tip, commit_paths, current_branch, find_commit,
    open_or_init, require_branch_tip, signature,
};
use crate::artifact::{ArtifactId, Document, VersionedArtifact};
use crate::change::{Change, ChangeId, assemble_history};
use crate::config::{BackendKind, GitConfig};
use crate::error::{StoreError, StoreResult};
use crate::fs::{AsyncFileSystem, BoxFuture};
use crate::index::ArtifactIndex;
use crate::migration::{
    Migration, MigrationSet, MigrationTarget, migrate_detached, migrate_if_needed,
};
use crate::rich_text::{RichTextSpan, canonicalize_spans};
use crate::store::{ArtifactStore, sealed};

/// Artifact store over a Git working tree.
pub struct GitArtifactStore {
    repo: Arc<Mutex<Repository>>,
    fs: Arc<dyn AsyncFileSystem>,
    config: GitConfig,
    artifact_type: String,
    migrations: MigrationSet,
    /// Serializes read-modify-write cycles on working-tree files
    write_lock: tokio::sync::Mutex<()>,
}

impl GitArtifactStore {
    /// Open the repository at `config.workdir`, initializing it if needed.
    ///
    /// `git2` stages and checks out straight from disk, so `fs` must be
    /// backed by the working tree (normally [`crate::fs::RealFileSystem`]).
    /// A filesystem that cannot see the repository is rejected with
    /// `Validation`.
    pub async fn open(
        config: &GitConfig,
        artifact_type: &str,
        fs: Arc<dyn AsyncFileSystem>,
        migrations: MigrationSet,
    ) -> StoreResult<Self> {
        fs.create_dir_all(&config.workdir).await?;
        let repo = open_or_init(config)?;
        if !fs.exists(repo.path()).await {
            return Err(StoreError::Validation(format!(
                "filesystem cannot see the repository at {}",
                repo.path().display()
            )));
        }
        log::debug!("Opened repository at {}", config.workdir.display());
        Ok(Self {
            repo: Arc::new(Mutex::new(repo)),
            fs,
            config: config.clone(),
            artifact_type: artifact_type.to_string(),
            migrations,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn config(&self) -> &GitConfig {
        &self.config
    }

    pub fn branches(&self) -> BranchManager {
        BranchManager::new(Arc::clone(&self.repo), self.config.clone())
    }

    pub fn conflicts(&self) -> ConflictDetector {
        ConflictDetector::new(Arc::clone(&self.repo))
    }

    /// Schema version every read is migrated to.
    pub fn current_version(&self) -> u32 {
        self.migrations.current_version()
    }

    pub fn current_branch(&self) -> StoreResult<String> {
        self.with_repo(current_branch)
    }

    pub(crate) fn with_repo<R>(
        &self,
        f: impl FnOnce(&Repository) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let repo = self.repo.lock().unwrap();
        f(&repo)
    }

    fn absolute(&self, artifact: &GitArtifactRef) -> PathBuf {
        self.config.workdir.join(&artifact.path)
    }

    /// Parse `id` and report whether its branch is checked out.
    fn locate(&self, id: &ArtifactId) -> StoreResult<(GitArtifactRef, bool)> {
        let artifact = GitArtifactRef::parse(id)?;
        let checked_out = self.current_branch()? == artifact.branch;
        Ok((artifact, checked_out))
    }

    fn require_checked_out(&self, id: &ArtifactId) -> StoreResult<GitArtifactRef> {
        let (artifact, checked_out) = self.locate(id)?;
        if !checked_out {
            return Err(StoreError::Validation(format!(
                "{id} is on branch '{}', which is not checked out",
                artifact.branch
            )));
        }
        Ok(artifact)
    }

    async fn read_working_bytes(&self, artifact: &GitArtifactRef) -> StoreResult<Option<Vec<u8>>> {
        match self.fs.read_binary(&self.absolute(artifact)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_working_raw(
        &self,
        artifact: &GitArtifactRef,
    ) -> StoreResult<VersionedArtifact<Document>> {
        let bytes = self
            .read_working_bytes(artifact)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("artifact {}", artifact.id())))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn write_working(
        &self,
        artifact: &GitArtifactRef,
        value: &VersionedArtifact<Document>,
    ) -> StoreResult<()> {
        let mut json = serde_json::to_string_pretty(value)?;
        json.push('\n');
        self.fs.write_file(&self.absolute(artifact), &json).await?;
        Ok(())
    }

    /// Raw view of the artifact at `change`.
    async fn raw_at(
        &self,
        artifact: &GitArtifactRef,
        checked_out: bool,
        change: &ChangeId,
    ) -> StoreResult<VersionedArtifact<Document>> {
        match change {
            ChangeId::Uncommitted if checked_out => self.read_working_raw(artifact).await,
            ChangeId::Uncommitted => self.with_repo(|repo| {
                let tip = require_branch_tip(repo, &artifact.branch)?;
                parse_blob(blob_at(repo, &tip, &artifact.path)?, artifact, &tip.id())
            }),
            ChangeId::Commit(hash) => self.with_repo(|repo| {
                let commit = find_commit(repo, hash.as_str())?;
                parse_blob(blob_at(repo, &commit, &artifact.path)?, artifact, &commit.id())
            }),
        }
    }

    /// Stage `paths` and record one commit on the checked-out branch.
    pub(crate) fn commit_paths(&self, paths: &[&str], message: &str) -> StoreResult<Oid> {
        self.with_repo(|repo| {
            let author = signature(repo, &self.config)?;
            commit_paths(repo, paths, message, &author)
        })
    }

    fn committed_blob(&self, artifact: &GitArtifactRef) -> StoreResult<Option<Oid>> {
        self.with_repo(|repo| match branch_tip(repo, &artifact.branch)? {
            Some(tip) => blob_id(&tip, &artifact.path),
            None => Ok(None),
        })
    }
}

fn parse_blob(
    bytes: Option<Vec<u8>>,
    artifact: &GitArtifactRef,
    commit: &Oid,
) -> StoreResult<VersionedArtifact<Document>> {
    let bytes = bytes.ok_or_else(|| {
        StoreError::NotFound(format!("{} does not exist at {}", artifact.path, commit))
    })?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// The working-tree file of an artifact as a migration target.
///
/// Each step rewrites the file once; nothing is committed.
struct WorkingFile<'a> {
    store: &'a GitArtifactStore,
    artifact: &'a GitArtifactRef,
}

impl MigrationTarget for WorkingFile<'_> {
    fn schema_version(&self) -> BoxFuture<'_, StoreResult<u32>> {
        Box::pin(async move {
            Ok(self.store.read_working_raw(self.artifact).await?.schema_version)
        })
    }

    fn apply_migration<'a>(&'a self, migration: &'a Migration) -> BoxFuture<'a, StoreResult<bool>> {
        Box::pin(async move {
            let _guard = self.store.write_lock.lock().await;
            let mut value = self.store.read_working_raw(self.artifact).await?;
            if value.schema_version != migration.from_version {
                return Ok(false);
            }
            migration.apply(&mut value.payload)?;
            value.schema_version = migration.to_version();
            self.store.write_working(self.artifact, &value).await?;
            Ok(true)
        })
    }
}

impl sealed::Sealed for GitArtifactStore {}

impl ArtifactStore for GitArtifactStore {
    fn backend(&self) -> BackendKind {
        BackendKind::Git
    }

    fn create(
        &self,
        seed: Option<VersionedArtifact<Document>>,
    ) -> BoxFuture<'_, StoreResult<ArtifactId>> {
        Box::pin(async move {
            let mut value = seed.unwrap_or_else(|| {
                VersionedArtifact::new(
                    self.artifact_type.clone(),
                    self.current_version(),
                    Document::default(),
                )
            });
            value.payload.spans = canonicalize_spans(std::mem::take(&mut value.payload.spans));

            let branch = self.current_branch()?;
            let path = format!("{}/{}.json", self.config.artifacts_dir, uuid::Uuid::new_v4());
            let artifact = GitArtifactRef::new(branch, path);

            let mut json = serde_json::to_string_pretty(&value)?;
            json.push('\n');
            self.fs.create_new(&self.absolute(&artifact), &json).await?;
            log::debug!("Created artifact {}", artifact.id());
            Ok(artifact.id())
        })
    }

    fn read<'a>(
        &'a self,
        id: &'a ArtifactId,
    ) -> BoxFuture<'a, StoreResult<VersionedArtifact<Document>>> {
        Box::pin(async move {
            let (artifact, checked_out) = self.locate(id)?;
            if checked_out {
                let target = WorkingFile {
                    store: self,
                    artifact: &artifact,
                };
                migrate_if_needed(&self.migrations, self.current_version(), &target).await?;
                self.read_working_raw(&artifact).await
            } else {
                let raw = self.raw_at(&artifact, false, &ChangeId::Uncommitted).await?;
                migrate_detached(&self.migrations, self.current_version(), raw).await
            }
        })
    }

    fn update_content<'a>(
        &'a self,
        id: &'a ArtifactId,
        spans: Vec<RichTextSpan>,
    ) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            let artifact = self.require_checked_out(id)?;
            self.read(id).await?;

            let _guard = self.write_lock.lock().await;
            let mut value = self.read_working_raw(&artifact).await?;
            let spans = canonicalize_spans(spans);
            if value.payload.spans == spans {
                return Ok(());
            }
            value.payload.spans = spans;
            self.write_working(&artifact, &value).await
        })
    }

    fn delete<'a>(&'a self, id: &'a ArtifactId) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            GitArtifactRef::parse(id)?;
            // Removal is recorded by the owning project's own commit
            log::debug!("Delete requested for {}; left to the project commit", id);
            Ok(())
        })
    }

    fn commit<'a>(
        &'a self,
        id: &'a ArtifactId,
        message: &'a str,
    ) -> BoxFuture<'a, StoreResult<ChangeId>> {
        Box::pin(async move {
            let artifact = self.require_checked_out(id)?;
            if !self.fs.exists(&self.absolute(&artifact)).await {
                return Err(StoreError::NotFound(format!("artifact {id}")));
            }
            let oid = self.commit_paths(&[artifact.path.as_str()], message)?;
            Ok(ChangeId::commit(oid.to_string()))
        })
    }

    fn history<'a>(&'a self, id: &'a ArtifactId) -> BoxFuture<'a, StoreResult<Vec<Change>>> {
        Box::pin(async move {
            let (artifact, checked_out) = self.locate(id)?;
            let commits = self.with_repo(|repo| {
                path_history(repo, &artifact.branch, &artifact.path, checked_out)
            })?;

            let has_uncommitted = if checked_out {
                let working = self.read_working_bytes(&artifact).await?;
                differs_from_blob(working.as_deref(), self.committed_blob(&artifact)?)?
            } else {
                false
            };
            Ok(assemble_history(commits, has_uncommitted))
        })
    }

    fn get_at_change<'a>(
        &'a self,
        id: &'a ArtifactId,
        change: &'a ChangeId,
    ) -> BoxFuture<'a, StoreResult<VersionedArtifact<Document>>> {
        Box::pin(async move {
            if change.is_uncommitted() {
                return self.read(id).await;
            }
            let (artifact, checked_out) = self.locate(id)?;
            let raw = self.raw_at(&artifact, checked_out, change).await?;
            migrate_detached(&self.migrations, self.current_version(), raw).await
        })
    }

    fn is_content_equal<'a>(
        &'a self,
        id: &'a ArtifactId,
        a: &'a ChangeId,
        b: &'a ChangeId,
    ) -> BoxFuture<'a, StoreResult<bool>> {
        Box::pin(async move {
            let (artifact, checked_out) = self.locate(id)?;
            let left = self.raw_at(&artifact, checked_out, a).await?;
            let right = self.raw_at(&artifact, checked_out, b).await?;
            Ok(left == right)
        })
    }
}

/// Serializes "open or create project" flows on one working directory.
pub struct ProjectGate {
    permit: Semaphore,
}

impl Default for ProjectGate {
    fn default() -> Self {
        Self {
            permit: Semaphore::new(1),
        }
    }
}

impl ProjectGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the project at `config.workdir`, creating it on first use.
    ///
    /// A new project gets one empty artifact, an index file naming it and a
    /// "Create project" commit. Returns the store and the project's artifact
    /// id on the checked-out branch.
    pub async fn open_or_create(
        &self,
        config: &GitConfig,
        artifact_type: &str,
        fs: Arc<dyn AsyncFileSystem>,
        migrations: MigrationSet,
    ) -> StoreResult<(GitArtifactStore, ArtifactId)> {
        let _permit = self
            .permit
            .acquire()
            .await
            .map_err(|e| StoreError::repository("project gate closed", e))?;

        let store = GitArtifactStore::open(config, artifact_type, fs, migrations).await?;
        let index_path = config.workdir.join(&config.index_file);
        let branch = store.current_branch()?;

        if let Some(index) = ArtifactIndex::load(&*store.fs, &index_path).await? {
            let artifact = GitArtifactRef::parse(&index.artifact_id)?.on_branch(&branch);
            log::debug!("Opened project with artifact {}", artifact.id());
            return Ok((store, artifact.id()));
        }

        let id = store.create(None).await?;
        let artifact = GitArtifactRef::parse(&id)?;
        ArtifactIndex::new(id.clone())
            .save(&*store.fs, &index_path)
            .await?;
        store.commit_paths(
            &[config.index_file.as_str(), artifact.path.as_str()],
            "Create project",
        )?;
        log::info!("Created project at {}", config.workdir.display());
        Ok((store, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::block_on_test;
    use crate::test_utils::{TempProject, counting_migrations, two_step_migrations};
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_create_writes_uncommitted_file() {
        let project = TempProject::new(MigrationSet::new()).await;
        let store = &project.store;
        let id = store.create(None).await.unwrap();
        assert!(id.as_str().starts_with("main:artifacts/"));
        assert!(id.as_str().ends_with(".json"));

        let artifact = store.read(&id).await.unwrap();
        assert_eq!(artifact.artifact_type, "document");
        assert!(artifact.payload.is_empty());
        assert_eq!(store.history(&id).await.unwrap(), vec![Change::Uncommitted]);
    }

    #[tokio::test]
    async fn test_read_migrates_working_file_without_committing() {
        let project = TempProject::new(two_step_migrations()).await;
        let store = &project.store;
        let id = store
            .create(Some(VersionedArtifact::new("document", 0, Document::default())))
            .await
            .unwrap();
        store.commit(&id, "seed").await.unwrap();

        let artifact = store.read(&id).await.unwrap();
        assert_eq!(artifact.schema_version, 2);

        let history = store.history(&id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], Change::Uncommitted);

        // The committed blob is still at version 0, migrated in memory
        let seed = history[1].id();
        let old = store.get_at_change(&id, &seed).await.unwrap();
        assert_eq!(old.schema_version, 2);
        assert!(!store.is_content_equal(&id, &seed, &ChangeId::Uncommitted).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_reads_migrate_once() {
        let (migrations, runs) = counting_migrations();
        let project = TempProject::new(migrations).await;
        let id = project
            .store
            .create(Some(VersionedArtifact::new("document", 0, Document::default())))
            .await
            .unwrap();

        let reads: Vec<_> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..4)
                .map(|_| scope.spawn(|| block_on_test(project.store.read(&id))))
                .collect();
            workers.into_iter().map(|w| w.join().unwrap().unwrap()).collect()
        });

        assert_eq!(runs.load(Ordering::SeqCst), 2);
        for artifact in reads {
            assert_eq!(artifact.schema_version, 2);
            assert_eq!(artifact.payload.properties["steps"], serde_json::json!(2));
        }
    }

    #[tokio::test]
    async fn test_malformed_ids_and_hashes() {
        let project = TempProject::new(MigrationSet::new()).await;
        let store = &project.store;
        for bad in ["", "crdt:abc", "main:../x.json"] {
            let err = store.read(&ArtifactId::from(bad)).await.unwrap_err();
            assert!(matches!(err, StoreError::Validation(_)), "{bad}: {err:?}");
        }

        let id = store.create(None).await.unwrap();
        store.commit(&id, "init").await.unwrap();
        let err = store
            .get_at_change(&id, &ChangeId::commit("zzzz"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        let err = store
            .get_at_change(&id, &ChangeId::commit("0123456789012345678901234567890123456789"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let project = TempProject::new(MigrationSet::new()).await;
        let id = ArtifactId::from("main:artifacts/missing.json");
        assert!(matches!(
            project.store.read(&id).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            project.store.commit(&id, "nothing").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_other_branch_is_read_only() {
        let project = TempProject::new(MigrationSet::new()).await;
        let store = &project.store;
        let id = store.create(None).await.unwrap();
        store
            .update_content(&id, vec![RichTextSpan::text("on main")])
            .await
            .unwrap();
        store.commit(&id, "main work").await.unwrap();

        store.branches().create("draft").await.unwrap();
        let on_draft = GitArtifactRef::parse(&id).unwrap().on_branch("draft").id();
        store
            .update_content(&on_draft, vec![RichTextSpan::text("on draft")])
            .await
            .unwrap();

        // main is no longer checked out: readable from its tip, not writable
        assert_eq!(store.read(&id).await.unwrap().payload.plain_text(), "on main");
        let err = store
            .update_content(&id, vec![RichTextSpan::text("x")])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        let history = store.history(&id).await.unwrap();
        assert!(history.iter().all(|c| !matches!(c, Change::Uncommitted)));
    }

    #[tokio::test]
    async fn test_open_rejects_detached_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let in_memory: Arc<dyn AsyncFileSystem> = Arc::new(crate::fs::SyncToAsyncFs::new(
            crate::fs::InMemoryFileSystem::new(),
        ));
        let result = GitArtifactStore::open(
            &crate::test_utils::git_config(dir.path()),
            "document",
            in_memory,
            MigrationSet::new(),
        )
        .await;
        assert!(matches!(result, Err(StoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_delete_is_noop() {
        let project = TempProject::new(MigrationSet::new()).await;
        let id = project.store.create(None).await.unwrap();
        project.store.delete(&id).await.unwrap();
        assert!(project.store.read(&id).await.is_ok());
    }

    #[tokio::test]
    async fn test_project_gate_creates_once() {
        let dir = tempfile::tempdir().unwrap();
        let config = crate::test_utils::git_config(dir.path());
        let gate = ProjectGate::new();

        let (store, first) = gate
            .open_or_create(&config, "document", crate::test_utils::real_fs(), MigrationSet::new())
            .await
            .unwrap();
        let history = store.history(&first).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].as_commit().unwrap().message, "Create project");
        drop(store);

        let (_, second) = gate
            .open_or_create(&config, "document", crate::test_utils::real_fs(), MigrationSet::new())
            .await
            .unwrap();
        assert_eq!(first, second);
    }
}

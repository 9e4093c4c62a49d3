//! Shared test fixtures: migration sets, in-memory CRDT stores and
//! throwaway Git projects.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::Value;

use crate::fs::{AsyncFileSystem, RealFileSystem, SyncToAsyncFs};
use crate::migration::{Migration, MigrationSet};

/// Two steps: v0 -> v1 adds a `title` property, v1 -> v2 upper-cases it.
pub fn two_step_migrations() -> MigrationSet {
    MigrationSet::new()
        .with(Migration::new(0, |doc| {
            doc.properties
                .insert("title".to_string(), Value::String("Untitled".to_string()));
            Ok(())
        }))
        .with(Migration::new(1, |doc| {
            let title = doc
                .properties
                .get("title")
                .and_then(Value::as_str)
                .ok_or_else(|| "missing title".to_string())?
                .to_uppercase();
            doc.properties.insert("title".to_string(), Value::String(title));
            Ok(())
        }))
}

/// Two steps that each bump a `steps` property, plus a count of how many
/// times any step body ran.
pub fn counting_migrations() -> (MigrationSet, Arc<AtomicUsize>) {
    let runs = Arc::new(AtomicUsize::new(0));
    let step = |from_version| {
        let runs = Arc::clone(&runs);
        Migration::new(from_version, move |doc| {
            runs.fetch_add(1, Ordering::SeqCst);
            let steps = doc.properties.get("steps").and_then(Value::as_u64).unwrap_or(0);
            doc.properties.insert("steps".to_string(), Value::from(steps + 1));
            Ok(())
        })
    };
    let migrations = MigrationSet::new().with(step(0)).with(step(1));
    (migrations, runs)
}

/// Real filesystem behind the async capability.
pub fn real_fs() -> Arc<dyn AsyncFileSystem> {
    Arc::new(SyncToAsyncFs::new(RealFileSystem))
}

#[cfg(feature = "crdt")]
pub use crdt_fixtures::*;

#[cfg(feature = "crdt")]
mod crdt_fixtures {
    use std::sync::Arc;

    use crate::config::StoreConfig;
    use crate::crdt::{CrdtArtifactStore, DocRegistry, MemoryStorage};
    use crate::migration::MigrationSet;

    /// A CRDT store over fresh in-memory storage.
    pub fn crdt_store(migrations: MigrationSet) -> CrdtArtifactStore {
        let registry = Arc::new(DocRegistry::new(Arc::new(MemoryStorage::new())));
        CrdtArtifactStore::new(registry, migrations, &StoreConfig::default())
    }
}

#[cfg(feature = "git")]
pub use git_fixtures::*;

#[cfg(feature = "git")]
mod git_fixtures {
    use std::path::Path;

    use git2::{Oid, Signature};
    use tempfile::TempDir;

    use super::real_fs;
    use crate::config::GitConfig;
    use crate::git::GitArtifactStore;
    use crate::migration::MigrationSet;

    pub fn git_config(workdir: &Path) -> GitConfig {
        GitConfig {
            workdir: workdir.to_path_buf(),
            ..GitConfig::default()
        }
    }

    /// A Git store in a temporary directory, removed on drop.
    pub struct TempProject {
        pub dir: TempDir,
        pub store: GitArtifactStore,
    }

    impl TempProject {
        pub async fn new(migrations: MigrationSet) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let config = git_config(dir.path());
            let store = GitArtifactStore::open(&config, "document", real_fs(), migrations)
                .await
                .unwrap();
            Self { dir, store }
        }

        pub fn path(&self) -> &Path {
            self.dir.path()
        }

        /// Write (or with `None`, remove) a file and commit just that change.
        pub fn commit_file(&self, path: &str, contents: Option<&str>, message: &str) -> Oid {
            let absolute = self.path().join(path);
            match contents {
                Some(contents) => {
                    if let Some(parent) = absolute.parent() {
                        std::fs::create_dir_all(parent).unwrap();
                    }
                    std::fs::write(&absolute, contents).unwrap();
                }
                None => std::fs::remove_file(&absolute).unwrap(),
            }

            self.store
                .with_repo(|repo| {
                    let mut index = repo.index()?;
                    index.read(false)?;
                    match contents {
                        Some(_) => index.add_path(Path::new(path))?,
                        None => index.remove_path(Path::new(path))?,
                    }
                    index.write()?;
                    let tree = repo.find_tree(index.write_tree()?)?;
                    let author = Signature::now("Test", "test@example.com")?;
                    let parent = repo.head().ok().and_then(|head| head.peel_to_commit().ok());
                    let parents: Vec<_> = parent.iter().collect();
                    Ok(repo.commit(Some("HEAD"), &author, &author, message, &tree, &parents)?)
                })
                .unwrap()
        }

        pub fn read_file(&self, path: &str) -> Option<String> {
            std::fs::read_to_string(self.path().join(path)).ok()
        }

        pub fn branch_exists(&self, name: &str) -> bool {
            self.store
                .with_repo(|repo| Ok(repo.find_branch(name, git2::BranchType::Local).is_ok()))
                .unwrap()
        }
    }
}

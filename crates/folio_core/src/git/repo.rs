//! Repository helpers shared by the Git store, branch manager and conflict
//! detector. All `git2` calls in this crate go through the `git` module.

use std::path::{Component, Path};

use git2::build::CheckoutBuilder;
use git2::{
    BranchType, Commit, ConfigLevel, ErrorCode, Oid, Repository, RepositoryInitOptions, Signature,
};

use crate::artifact::{ArtifactId, ensure_well_formed};
use crate::config::GitConfig;
use crate::error::{StoreError, StoreResult};

const HEADS_PREFIX: &str = "refs/heads/";

/// A Git artifact id, `<branch>:<path>`, split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitArtifactRef {
    pub branch: String,
    /// Path relative to the working directory, `/`-separated
    pub path: String,
}

impl GitArtifactRef {
    pub fn new(branch: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            path: path.into(),
        }
    }

    /// Parse and validate an artifact id.
    pub fn parse(id: &ArtifactId) -> StoreResult<Self> {
        ensure_well_formed(id)?;
        let (branch, path) = id.as_str().split_once(':').ok_or_else(|| {
            StoreError::Validation(format!("'{id}' is not of the form <branch>:<path>"))
        })?;
        ensure_branch_name(branch)?;

        let relative = Path::new(path);
        let plain = !path.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !plain {
            return Err(StoreError::Validation(format!(
                "'{path}' is not a plain relative path"
            )));
        }
        Ok(Self::new(branch, path))
    }

    /// The same artifact on another branch.
    pub fn on_branch(&self, branch: &str) -> Self {
        Self::new(branch, self.path.clone())
    }

    pub fn id(&self) -> ArtifactId {
        ArtifactId::new(format!("{}:{}", self.branch, self.path))
    }
}

/// Reject names git would refuse as a branch.
pub(crate) fn ensure_branch_name(name: &str) -> StoreResult<()> {
    if name.is_empty() || !git2::Branch::name_is_valid(name)? {
        return Err(StoreError::Validation(format!(
            "'{name}' is not a valid branch name"
        )));
    }
    Ok(())
}

/// Open the repository at `config.workdir`, initializing it on the default
/// branch if there is none.
pub(crate) fn open_or_init(config: &GitConfig) -> StoreResult<Repository> {
    match Repository::open(&config.workdir) {
        Ok(repo) => Ok(repo),
        Err(e) if e.code() == ErrorCode::NotFound => {
            let mut opts = RepositoryInitOptions::new();
            opts.initial_head(&config.default_branch);
            let repo = Repository::init_opts(&config.workdir, &opts)?;
            log::info!(
                "Initialized repository at {} on branch {}",
                config.workdir.display(),
                config.default_branch
            );
            Ok(repo)
        }
        Err(e) => Err(e.into()),
    }
}

/// Name of the checked-out branch, born or not.
///
/// Fails `NotFound` when HEAD is detached.
pub(crate) fn current_branch(repo: &Repository) -> StoreResult<String> {
    let head = repo.find_reference("HEAD")?;
    head.symbolic_target()
        .and_then(|target| target.strip_prefix(HEADS_PREFIX))
        .map(String::from)
        .ok_or_else(|| StoreError::NotFound("HEAD is detached".to_string()))
}

/// Tip commit of a local branch, or `None` if the branch has no ref.
pub(crate) fn branch_tip<'r>(repo: &'r Repository, name: &str) -> StoreResult<Option<Commit<'r>>> {
    match repo.find_branch(name, BranchType::Local) {
        Ok(branch) => Ok(Some(branch.get().peel_to_commit()?)),
        Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Tip commit of a local branch that must exist.
pub(crate) fn require_branch_tip<'r>(repo: &'r Repository, name: &str) -> StoreResult<Commit<'r>> {
    branch_tip(repo, name)?.ok_or_else(|| StoreError::NotFound(format!("branch {name}")))
}

/// The commit HEAD points at, or `None` on an unborn branch.
pub(crate) fn head_commit(repo: &Repository) -> StoreResult<Option<Commit<'_>>> {
    match repo.head() {
        Ok(head) => Ok(Some(head.peel_to_commit()?)),
        Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Blob id of `path` in `commit`'s tree, if present.
pub(crate) fn blob_id(commit: &Commit<'_>, path: &str) -> StoreResult<Option<Oid>> {
    match commit.tree()?.get_path(Path::new(path)) {
        Ok(entry) => Ok(Some(entry.id())),
        Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Contents of `path` as of `commit`, or `None` if absent.
pub(crate) fn blob_at(
    repo: &Repository,
    commit: &Commit<'_>,
    path: &str,
) -> StoreResult<Option<Vec<u8>>> {
    match blob_id(commit, path)? {
        Some(id) => Ok(Some(repo.find_blob(id)?.content().to_vec())),
        None => Ok(None),
    }
}

/// Resolve a commit by hex id.
///
/// A malformed id is a `Validation` error, an unknown one `NotFound`.
pub(crate) fn find_commit<'r>(repo: &'r Repository, hash: &str) -> StoreResult<Commit<'r>> {
    let oid = Oid::from_str(hash)
        .map_err(|_| StoreError::Validation(format!("'{hash}' is not a commit hash")))?;
    match repo.find_commit(oid) {
        Ok(commit) => Ok(commit),
        Err(e) if e.code() == ErrorCode::NotFound => {
            Err(StoreError::NotFound(format!("commit {hash}")))
        }
        Err(e) => Err(e.into()),
    }
}

/// Commit signature from repository-local config, with placeholders.
pub(crate) fn signature(repo: &Repository, config: &GitConfig) -> StoreResult<Signature<'static>> {
    let local = repo
        .config()
        .and_then(|config| config.open_level(ConfigLevel::Local))
        .ok();
    let lookup = |key: &str| {
        local
            .as_ref()
            .and_then(|config| config.get_string(key).ok())
            .filter(|value| !value.trim().is_empty())
    };
    let name = lookup("user.name").unwrap_or_else(|| config.author_name.clone());
    let email = lookup("user.email").unwrap_or_else(|| config.author_email.clone());
    Ok(Signature::now(&name, &email)?)
}

/// Stage `paths` (relative to the workdir) and record one commit on HEAD.
pub(crate) fn commit_paths(
    repo: &Repository,
    paths: &[&str],
    message: &str,
    signature: &Signature<'_>,
) -> StoreResult<Oid> {
    let mut index = repo.index()?;
    index.read(false)?;
    for path in paths {
        index.add_path(Path::new(path))?;
    }
    index.write()?;
    let tree = repo.find_tree(index.write_tree()?)?;

    let parent = head_commit(repo)?;
    let parents: Vec<&Commit<'_>> = parent.iter().collect();
    let oid = repo.commit(Some("HEAD"), signature, signature, message, &tree, &parents)?;
    log::debug!("Committed {} ({})", oid, message);
    Ok(oid)
}

/// Check out a local branch and point HEAD at it.
pub(crate) fn checkout_branch(repo: &Repository, name: &str) -> StoreResult<()> {
    let tip = require_branch_tip(repo, name)?;
    repo.checkout_tree(tip.as_object(), Some(CheckoutBuilder::new().safe()))?;
    repo.set_head(&format!("{HEADS_PREFIX}{name}"))?;
    log::debug!("Switched to branch {}", name);
    Ok(())
}

/// Number of commits reachable from `tip`.
pub(crate) fn count_commits(repo: &Repository, tip: Oid) -> StoreResult<usize> {
    let mut walk = repo.revwalk()?;
    walk.push(tip)?;
    Ok(walk.count())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_artifact_ref() {
        let parsed = GitArtifactRef::parse(&ArtifactId::new("main:artifacts/a.json")).unwrap();
        assert_eq!(parsed.branch, "main");
        assert_eq!(parsed.path, "artifacts/a.json");
        assert_eq!(parsed.id().as_str(), "main:artifacts/a.json");
        assert_eq!(
            parsed.on_branch("feature/x").id().as_str(),
            "feature/x:artifacts/a.json"
        );
    }

    #[test]
    fn test_parse_rejects_malformed_ids() {
        for bad in [
            "no-separator",
            ":artifacts/a.json",
            "main:",
            "main:../escape.json",
            "main:/abs.json",
            "bad..branch:a.json",
            "main:a/./b.json",
        ] {
            let err = GitArtifactRef::parse(&ArtifactId::new(bad)).unwrap_err();
            assert!(matches!(err, StoreError::Validation(_)), "{bad}");
        }
    }

    #[test]
    fn test_branch_tips_follow_commits() {
        let dir = tempfile::tempdir().unwrap();
        let config = crate::test_utils::git_config(dir.path());
        let repo = open_or_init(&config).unwrap();

        // Unborn default branch has no tip yet
        assert!(branch_tip(&repo, "main").unwrap().is_none());
        assert!(matches!(
            require_branch_tip(&repo, "main"),
            Err(StoreError::NotFound(_))
        ));
        assert!(head_commit(&repo).unwrap().is_none());

        std::fs::write(dir.path().join("a.json"), "{}\n").unwrap();
        let sig = signature(&repo, &config).unwrap();
        let oid = commit_paths(&repo, &["a.json"], "first", &sig).unwrap();

        let tip = branch_tip(&repo, "main").unwrap().unwrap();
        assert_eq!(tip.id(), oid);
        assert!(blob_id(&tip, "a.json").unwrap().is_some());
        assert!(blob_id(&tip, "b.json").unwrap().is_none());
        assert_eq!(count_commits(&repo, oid).unwrap(), 1);
        assert!(branch_tip(&repo, "other").unwrap().is_none());
    }

    #[test]
    fn test_branch_name_validation() {
        assert!(ensure_branch_name("feature/login").is_ok());
        assert!(ensure_branch_name("").is_err());
        assert!(ensure_branch_name("has space").is_err());
        assert!(ensure_branch_name("ends.lock").is_err());
    }
}

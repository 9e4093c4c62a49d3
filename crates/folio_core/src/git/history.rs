//! Per-path commit history.

use git2::{ObjectType, Oid, Repository, Sort};

use super::repo::{blob_id, branch_tip};
use crate::change::{Commit, CommitHash};
use crate::error::{StoreError, StoreResult};

/// Commits on `branch` that changed `path`, newest first.
///
/// A commit counts when the path's blob differs from its first parent's
/// (or the path first appears). An unborn branch yields no commits when
/// `allow_unborn` is set; otherwise a missing branch is `NotFound`.
pub(crate) fn path_history(
    repo: &Repository,
    branch: &str,
    path: &str,
    allow_unborn: bool,
) -> StoreResult<Vec<Commit>> {
    let Some(tip) = branch_tip(repo, branch)? else {
        if allow_unborn {
            return Ok(Vec::new());
        }
        return Err(StoreError::NotFound(format!("branch {branch}")));
    };

    let mut walk = repo.revwalk()?;
    walk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;
    walk.push(tip.id())?;

    let mut commits = Vec::new();
    for oid in walk {
        let commit = repo.find_commit(oid?)?;
        let blob = blob_id(&commit, path)?;
        let parent_blob = match commit.parent(0) {
            Ok(parent) => blob_id(&parent, path)?,
            Err(_) => None,
        };
        if blob != parent_blob {
            commits.push(to_commit(&commit));
        }
    }
    Ok(commits)
}

fn to_commit(commit: &git2::Commit<'_>) -> Commit {
    Commit {
        id: CommitHash::new(commit.id().to_string()),
        message: commit.message().unwrap_or_default().trim_end().to_string(),
        time: commit.time().seconds() * 1000,
        author: commit.author().name().map(String::from),
    }
}

/// Whether working-tree `bytes` differ from the committed blob.
///
/// A file that exists on only one side counts as a difference.
pub(crate) fn differs_from_blob(bytes: Option<&[u8]>, committed: Option<Oid>) -> StoreResult<bool> {
    let working = match bytes {
        Some(bytes) => Some(Oid::hash_object(ObjectType::Blob, bytes)?),
        None => None,
    };
    Ok(working != committed)
}

//! Branch lifecycle for the commit-graph store.
//!
//! Every operation runs against the working tree: switching checks the
//! branch out, merging leaves the repository mid-merge on conflict so the
//! conflict detector can describe it.

use std::cmp::Ordering;
use std::sync::{Arc, Mutex};

use git2::build::CheckoutBuilder;
use git2::{BranchType, ErrorCode, Repository};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use super::conflict::merge_conflict_info;
use super::repo::{
    branch_tip, checkout_branch, count_commits, current_branch, ensure_branch_name,
    head_commit, require_branch_tip, signature,
};
use crate::config::GitConfig;
use crate::error::{StoreError, StoreResult};

/// Summary of one local branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct BranchInfo {
    pub name: String,
    pub is_current: bool,
    /// Commits on this branch not on the default branch (all commits for
    /// the default branch itself)
    pub commit_count: usize,
    /// Unix timestamp (milliseconds) of the tip commit
    pub last_commit_time: Option<i64>,
}

/// Creates, switches, lists, deletes and merges branches.
#[derive(Clone)]
pub struct BranchManager {
    repo: Arc<Mutex<Repository>>,
    config: GitConfig,
}

impl BranchManager {
    pub(crate) fn new(repo: Arc<Mutex<Repository>>, config: GitConfig) -> Self {
        Self { repo, config }
    }

    pub fn default_branch(&self) -> &str {
        &self.config.default_branch
    }

    /// Create `name` at the current HEAD commit and check it out.
    pub async fn create(&self, name: &str) -> StoreResult<()> {
        let repo = self.repo.lock().unwrap();
        create_branch(&repo, name)
    }

    /// Check out `name`.
    pub async fn switch(&self, name: &str) -> StoreResult<()> {
        let repo = self.repo.lock().unwrap();
        checkout_branch(&repo, name)
    }

    /// Name of the checked-out branch.
    pub async fn current(&self) -> StoreResult<String> {
        let repo = self.repo.lock().unwrap();
        current_branch(&repo)
    }

    /// All local branches: current first, then branches with commits, then
    /// by most recent commit.
    pub async fn list(&self) -> StoreResult<Vec<BranchInfo>> {
        let repo = self.repo.lock().unwrap();
        list_branches(&repo, &self.config.default_branch)
    }

    /// Delete `name`, moving off it first if it is checked out.
    ///
    /// On failure the previously checked-out branch is restored.
    pub async fn delete(&self, name: &str) -> StoreResult<()> {
        let repo = self.repo.lock().unwrap();
        delete_branch(&repo, name, &self.config.default_branch)
    }

    /// Merge `from` into `into`, then delete `from` and check out the
    /// default branch.
    ///
    /// A conflicting merge fails with `MergeConflict` and leaves the
    /// repository mid-merge with `into` checked out.
    pub async fn merge_and_delete(&self, from: &str, into: &str) -> StoreResult<()> {
        let repo = self.repo.lock().unwrap();
        merge_and_delete(&repo, from, into, &self.config)
    }
}

pub(crate) fn create_branch(repo: &Repository, name: &str) -> StoreResult<()> {
    ensure_branch_name(name)?;
    let head = head_commit(repo)?.ok_or_else(|| {
        StoreError::Repository(format!("cannot branch '{name}' before the first commit"))
    })?;
    if let Err(e) = repo.branch(name, &head, false) {
        return Err(match e.code() {
            ErrorCode::Exists => StoreError::Repository(format!("branch '{name}' already exists")),
            _ => e.into(),
        });
    }
    log::info!("Created branch {} at {}", name, head.id());
    checkout_branch(repo, name)
}

pub(crate) fn list_branches(
    repo: &Repository,
    default_branch: &str,
) -> StoreResult<Vec<BranchInfo>> {
    let current = current_branch(repo).ok();
    let base = branch_tip(repo, default_branch)?.map(|tip| tip.id());

    let mut infos = Vec::new();
    for entry in repo.branches(Some(BranchType::Local))? {
        let (branch, _) = entry?;
        let Some(name) = branch.name()?.map(String::from) else {
            continue;
        };
        let tip = branch.get().peel_to_commit()?;
        let commit_count = match base {
            Some(base) if name != default_branch => repo.graph_ahead_behind(tip.id(), base)?.0,
            _ => count_commits(repo, tip.id())?,
        };
        infos.push(BranchInfo {
            is_current: current.as_deref() == Some(name.as_str()),
            name,
            commit_count,
            last_commit_time: Some(tip.time().seconds() * 1000),
        });
    }

    // An unborn current branch has no ref yet but is still listed
    if let Some(current) = current
        && !infos.iter().any(|info| info.name == current)
    {
        infos.push(BranchInfo {
            name: current,
            is_current: true,
            commit_count: 0,
            last_commit_time: None,
        });
    }

    infos.sort_by(compare_branches);
    Ok(infos)
}

fn compare_branches(a: &BranchInfo, b: &BranchInfo) -> Ordering {
    b.is_current
        .cmp(&a.is_current)
        .then_with(|| (b.commit_count > 0).cmp(&(a.commit_count > 0)))
        .then_with(|| b.last_commit_time.cmp(&a.last_commit_time))
        .then_with(|| a.name.cmp(&b.name))
}

pub(crate) fn delete_branch(
    repo: &Repository,
    name: &str,
    default_branch: &str,
) -> StoreResult<()> {
    if name == default_branch {
        return Err(StoreError::Validation(format!(
            "cannot delete the default branch '{name}'"
        )));
    }
    let previous = current_branch(repo).ok();

    let result = remove_branch(repo, name, previous.as_deref() == Some(name), default_branch);
    if let Err(err) = result {
        if let Some(previous) = previous
            && current_branch(repo).ok().as_deref() != Some(previous.as_str())
        {
            match checkout_branch(repo, &previous) {
                Ok(()) => log::debug!("Restored branch {} after failed delete", previous),
                Err(restore) => log::warn!(
                    "Could not restore branch {} after failed delete: {}",
                    previous,
                    restore
                ),
            }
        }
        return Err(err);
    }
    log::info!("Deleted branch {}", name);
    Ok(())
}

fn remove_branch(
    repo: &Repository,
    name: &str,
    checked_out: bool,
    default_branch: &str,
) -> StoreResult<()> {
    let mut branch = match repo.find_branch(name, BranchType::Local) {
        Ok(branch) => branch,
        Err(e) if e.code() == ErrorCode::NotFound => {
            return Err(StoreError::NotFound(format!("branch {name}")));
        }
        Err(e) => return Err(e.into()),
    };
    if checked_out {
        checkout_branch(repo, default_branch)?;
    }
    branch.delete()?;
    Ok(())
}

pub(crate) fn merge_and_delete(
    repo: &Repository,
    from: &str,
    into: &str,
    config: &GitConfig,
) -> StoreResult<()> {
    if from == config.default_branch {
        return Err(StoreError::Validation(format!(
            "cannot merge away the default branch '{from}'"
        )));
    }
    if from == into {
        return Err(StoreError::Validation(format!(
            "cannot merge '{from}' into itself"
        )));
    }

    let source = require_branch_tip(repo, from)?;
    checkout_branch(repo, into)?;

    let annotated = repo.find_annotated_commit(source.id())?;
    let (analysis, _) = repo.merge_analysis(&[&annotated])?;

    if analysis.is_up_to_date() {
        log::debug!("{} already contains {}", into, from);
    } else if analysis.is_fast_forward() {
        repo.checkout_tree(source.as_object(), Some(CheckoutBuilder::new().safe()))?;
        let mut reference = repo.find_reference(&format!("refs/heads/{into}"))?;
        reference.set_target(source.id(), &format!("merge {from}: fast-forward"))?;
        log::info!("Fast-forwarded {} to {}", into, from);
    } else {
        repo.merge(&[&annotated], None, None)?;

        let mut index = repo.index()?;
        if index.has_conflicts() {
            let info = merge_conflict_info(repo)?;
            log::info!(
                "Merging {} into {} stopped with {} conflict(s)",
                from,
                into,
                info.conflicts.len()
            );
            return Err(StoreError::MergeConflict(Box::new(info)));
        }

        let tree = repo.find_tree(index.write_tree()?)?;
        let head = require_branch_tip(repo, into)?;
        let author = signature(repo, config)?;
        repo.commit(
            Some("HEAD"),
            &author,
            &author,
            &format!("Merge branch '{from}' into {into}"),
            &tree,
            &[&head, &source],
        )?;
        repo.cleanup_state()?;
        log::info!("Merged {} into {}", from, into);
    }

    checkout_branch(repo, &config.default_branch)?;
    let mut branch = repo.find_branch(from, BranchType::Local)?;
    branch.delete()?;
    log::info!("Deleted merged branch {}", from);
    Ok(())
}

//! Merge conflict detection for the commit-graph store.
//!
//! An interrupted merge leaves unmerged entries in the index. Each entry sits
//! at a stage: 1 for the common ancestor, 2 for the checked-out side
//! ("ours", the merge target) and 3 for the side being merged in ("theirs",
//! the source). Which stages exist for a path says what kind of conflict it
//! is.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use git2::{ErrorCode, Oid, Repository};

use crate::change::{ConflictSide, MergeConflict, MergeConflictInfo};
use crate::error::{StoreError, StoreResult};

/// Stage bits live in bits 12-13 of an index entry's flags.
const STAGE_SHIFT: u16 = 12;
const STAGE_MASK: u16 = 0x3;

pub(crate) fn entry_stage(flags: u16) -> u16 {
    (flags >> STAGE_SHIFT) & STAGE_MASK
}

/// Which index stages exist for one unmerged path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageSet {
    pub base: bool,
    pub ours: bool,
    pub theirs: bool,
}

impl StageSet {
    pub fn from_stages(stages: impl IntoIterator<Item = u16>) -> Self {
        let mut set = Self::default();
        for stage in stages {
            set.insert(stage);
        }
        set
    }

    fn insert(&mut self, stage: u16) {
        match stage {
            1 => self.base = true,
            2 => self.ours = true,
            3 => self.theirs = true,
            _ => {}
        }
    }

    fn is_unmerged(&self) -> bool {
        self.ours || self.theirs
    }
}

/// Classify one unmerged path by its stages.
///
/// Shapes not covered by the three named kinds fall back to a content
/// conflict.
pub fn classify_stages(path: &str, stages: StageSet) -> MergeConflict {
    let path = path.to_string();
    match (stages.base, stages.ours, stages.theirs) {
        (false, true, true) => MergeConflict::AddAdd { path },
        // Theirs is gone: the source deleted what the target modified
        (true, true, false) => MergeConflict::ModifyDelete {
            path,
            deleted_on_side: ConflictSide::Source,
        },
        (true, false, true) => MergeConflict::ModifyDelete {
            path,
            deleted_on_side: ConflictSide::Target,
        },
        _ => MergeConflict::Content { path },
    }
}

/// Unmerged paths of the on-disk index with their stages, sorted by path.
pub(crate) fn unmerged_paths(repo: &Repository) -> StoreResult<BTreeMap<String, StageSet>> {
    let mut index = repo.index()?;
    index.read(false)?;

    let mut paths: BTreeMap<String, StageSet> = BTreeMap::new();
    for entry in index.iter() {
        let stage = entry_stage(entry.flags);
        if stage == 0 {
            continue;
        }
        let path = String::from_utf8_lossy(&entry.path).into_owned();
        paths.entry(path).or_default().insert(stage);
    }
    paths.retain(|_, stages| stages.is_unmerged());
    Ok(paths)
}

/// Whether the index has any entry at stage 2 or 3.
pub(crate) fn is_in_merge_conflict_state(repo: &Repository) -> StoreResult<bool> {
    Ok(!unmerged_paths(repo)?.is_empty())
}

fn resolve(repo: &Repository, spec: &str) -> StoreResult<Oid> {
    let object = repo.revparse_single(spec).map_err(|e| {
        if e.code() == ErrorCode::NotFound {
            StoreError::Repository(format!("{spec} is not set; no merge in progress"))
        } else {
            e.into()
        }
    })?;
    Ok(object.peel_to_commit()?.id())
}

/// Describe the interrupted merge: HEAD, MERGE_HEAD, their merge base and
/// the classified conflicts.
pub(crate) fn merge_conflict_info(repo: &Repository) -> StoreResult<MergeConflictInfo> {
    let target = resolve(repo, "HEAD")?;
    let source = resolve(repo, "MERGE_HEAD")?;

    let bases = match repo.merge_bases(target, source) {
        Ok(bases) => bases,
        Err(e) if e.code() == ErrorCode::NotFound => {
            return Err(StoreError::Repository(format!(
                "{target} and {source} have no common ancestor"
            )));
        }
        Err(e) => return Err(e.into()),
    };
    let ancestor = match bases.len() {
        0 => {
            return Err(StoreError::Repository(format!(
                "{target} and {source} have no common ancestor"
            )));
        }
        1 => bases[0],
        n => {
            log::warn!(
                "{} merge bases for {} and {}; using {}",
                n,
                target,
                source,
                bases[0]
            );
            bases[0]
        }
    };

    let conflicts = unmerged_paths(repo)?
        .into_iter()
        .map(|(path, stages)| classify_stages(&path, stages))
        .collect();

    Ok(MergeConflictInfo {
        target_commit: target.to_string(),
        source_commit: source.to_string(),
        common_ancestor_commit: ancestor.to_string(),
        conflicts,
    })
}

/// Inspects the repository for an interrupted merge.
#[derive(Clone)]
pub struct ConflictDetector {
    repo: Arc<Mutex<Repository>>,
}

impl ConflictDetector {
    pub(crate) fn new(repo: Arc<Mutex<Repository>>) -> Self {
        Self { repo }
    }

    pub async fn is_in_merge_conflict_state(&self) -> StoreResult<bool> {
        let repo = self.repo.lock().unwrap();
        is_in_merge_conflict_state(&repo)
    }

    /// Conflict details, or `None` when no merge is in conflict.
    pub async fn get_merge_conflict_info(&self) -> StoreResult<Option<MergeConflictInfo>> {
        let repo = self.repo.lock().unwrap();
        if !is_in_merge_conflict_state(&repo)? {
            return Ok(None);
        }
        merge_conflict_info(&repo).map(Some)
    }
}

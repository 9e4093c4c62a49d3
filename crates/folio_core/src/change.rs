//! Commits, changes and merge conflict descriptions.
//!
//! Both backends report history as a list of [`Change`]s, newest first. An
//! [`Change::Uncommitted`] entry, when present, always comes first and is the
//! only change carrying the [`ChangeId::Uncommitted`] sentinel.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::StoreError;

/// Wire/display form of the uncommitted sentinel.
pub const UNCOMMITTED: &str = "UNCOMMITTED";

/// Backend-specific position marker.
///
/// CRDT heads are an encoded document snapshot; Git hashes are hex commit ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitHash(String);

impl CommitHash {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommitHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies a point in an artifact's history.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChangeId {
    Commit(CommitHash),
    /// Working state has edits not yet recorded as a commit
    Uncommitted,
}

impl ChangeId {
    pub fn commit(hash: impl Into<String>) -> Self {
        ChangeId::Commit(CommitHash::new(hash))
    }

    pub fn is_uncommitted(&self) -> bool {
        matches!(self, ChangeId::Uncommitted)
    }
}

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeId::Commit(hash) => fmt::Display::fmt(hash, f),
            ChangeId::Uncommitted => f.write_str(UNCOMMITTED),
        }
    }
}

impl FromStr for ChangeId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" => Err(StoreError::Validation("empty change id".to_string())),
            UNCOMMITTED => Ok(ChangeId::Uncommitted),
            hash => Ok(ChangeId::commit(hash)),
        }
    }
}

impl Serialize for ChangeId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ChangeId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// An immutable, message-bearing point in history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    pub id: CommitHash,
    pub message: String,
    /// Unix timestamp (milliseconds)
    pub time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

/// One entry of an artifact's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Change {
    Commit(Commit),
    Uncommitted,
}

impl Change {
    pub fn id(&self) -> ChangeId {
        match self {
            Change::Commit(commit) => ChangeId::Commit(commit.id.clone()),
            Change::Uncommitted => ChangeId::Uncommitted,
        }
    }

    pub fn as_commit(&self) -> Option<&Commit> {
        match self {
            Change::Commit(commit) => Some(commit),
            Change::Uncommitted => None,
        }
    }
}

/// Assemble a history from commits (newest first) and the pending-edit flag.
///
/// The uncommitted entry, if any, is prepended exactly once.
pub fn assemble_history(commits: Vec<Commit>, has_uncommitted: bool) -> Vec<Change> {
    let mut changes = Vec::with_capacity(commits.len() + usize::from(has_uncommitted));
    if has_uncommitted {
        changes.push(Change::Uncommitted);
    }
    changes.extend(commits.into_iter().map(Change::Commit));
    changes
}

/// Which side of a merge removed a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "UPPERCASE")]
#[ts(export, export_to = "bindings/")]
pub enum ConflictSide {
    Source,
    Target,
}

/// One unmerged path, classified by which index stages exist for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "type")]
#[ts(export, export_to = "bindings/")]
pub enum MergeConflict {
    /// Both sides modified the path incompatibly
    #[serde(rename = "ContentConflict")]
    Content { path: String },
    /// Both sides independently created the path
    #[serde(rename = "AddAddConflict")]
    AddAdd { path: String },
    /// One side modified the path, the other deleted it
    #[serde(rename = "ModifyDeleteConflict")]
    ModifyDelete {
        path: String,
        #[serde(rename = "deletedOnSide")]
        deleted_on_side: ConflictSide,
    },
}

impl MergeConflict {
    pub fn path(&self) -> &str {
        match self {
            MergeConflict::Content { path }
            | MergeConflict::AddAdd { path }
            | MergeConflict::ModifyDelete { path, .. } => path,
        }
    }
}

/// Everything a resolution flow needs about an interrupted merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct MergeConflictInfo {
    /// Commit checked out when the merge started (HEAD)
    pub target_commit: String,
    /// Commit being merged in (MERGE_HEAD)
    pub source_commit: String,
    pub common_ancestor_commit: String,
    pub conflicts: Vec<MergeConflict>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit(id: &str, time: i64) -> Commit {
        Commit {
            id: CommitHash::new(id),
            message: format!("commit {id}"),
            time,
            author: None,
        }
    }

    #[test]
    fn test_change_id_parse_and_display() {
        assert_eq!("UNCOMMITTED".parse::<ChangeId>().unwrap(), ChangeId::Uncommitted);
        assert_eq!(
            "abc123".parse::<ChangeId>().unwrap(),
            ChangeId::commit("abc123")
        );
        assert!("  ".parse::<ChangeId>().is_err());
        assert_eq!(ChangeId::Uncommitted.to_string(), UNCOMMITTED);
    }

    #[test]
    fn test_change_id_serde() {
        let json = serde_json::to_string(&ChangeId::commit("f00")).unwrap();
        assert_eq!(json, "\"f00\"");
        let back: ChangeId = serde_json::from_str("\"UNCOMMITTED\"").unwrap();
        assert!(back.is_uncommitted());
    }

    #[test]
    fn test_assemble_history_orders_uncommitted_first() {
        let history = assemble_history(vec![commit("b", 2), commit("a", 1)], true);
        assert_eq!(history.len(), 3);
        assert_eq!(history[0], Change::Uncommitted);
        assert_eq!(history[1].id(), ChangeId::commit("b"));
        assert_eq!(history[2].id(), ChangeId::commit("a"));
    }

    #[test]
    fn test_assemble_history_empty() {
        assert!(assemble_history(Vec::new(), false).is_empty());
        assert_eq!(assemble_history(Vec::new(), true), vec![Change::Uncommitted]);
    }

    #[test]
    fn test_merge_conflict_wire_format() {
        let json = serde_json::to_value(MergeConflict::AddAdd {
            path: "a.json".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "AddAddConflict");
        assert_eq!(json["path"], "a.json");
    }
}

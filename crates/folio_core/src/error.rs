use serde::Serialize;
use thiserror::Error;

use crate::change::MergeConflictInfo;

/// Unified error type for store operations.
///
/// Every backend-native failure is mapped to exactly one of these variants at
/// the operation boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Malformed artifact id, branch name or change id (caller bug).
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Artifact, branch or commit is absent or unreachable.
    #[error("Not found: {0}")]
    NotFound(String),

    /// I/O or backend-internal failure.
    #[error("Repository error: {0}")]
    Repository(String),

    /// A merge stopped on conflicts; the repository is left mid-merge.
    #[error(
        "Merge conflict merging {} into {} ({} conflicting path(s))",
        .0.source_commit,
        .0.target_commit,
        .0.conflicts.len()
    )]
    MergeConflict(Box<MergeConflictInfo>),

    /// A required migration step failed or is missing.
    #[error("Migration from schema version {from_version} failed: {message}")]
    Migration { from_version: u32, message: String },
}

/// Result type alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// The kind of a [`StoreError`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Repository,
    MergeConflict,
    Migration,
}

impl StoreError {
    /// Shorthand for a `Repository` error built from any displayable cause.
    pub fn repository(context: &str, cause: impl std::fmt::Display) -> Self {
        StoreError::Repository(format!("{context}: {cause}"))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Validation(_) => ErrorKind::Validation,
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::Repository(_) => ErrorKind::Repository,
            StoreError::MergeConflict(_) => ErrorKind::MergeConflict,
            StoreError::Migration { .. } => ErrorKind::Migration,
        }
    }

    /// Whether a caller may retry the failed call.
    ///
    /// `NotFound` can be transient for networked CRDT peers and `Repository`
    /// covers transient I/O. Mutating calls are not guaranteed idempotent.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::NotFound | ErrorKind::Repository)
    }

    /// The conflict details, if this is a merge conflict.
    pub fn merge_conflict_info(&self) -> Option<&MergeConflictInfo> {
        match self {
            StoreError::MergeConflict(info) => Some(info),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Repository(format!("I/O error: {err}"))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Repository(format!("Malformed artifact data: {err}"))
    }
}

impl From<toml::de::Error> for StoreError {
    fn from(err: toml::de::Error) -> Self {
        StoreError::Repository(format!("Config parse error: {err}"))
    }
}

impl From<toml::ser::Error> for StoreError {
    fn from(err: toml::ser::Error) -> Self {
        StoreError::Repository(format!("Config serialize error: {err}"))
    }
}

#[cfg(feature = "git")]
impl From<git2::Error> for StoreError {
    fn from(err: git2::Error) -> Self {
        StoreError::Repository(format!("git: {}", err.message()))
    }
}

/// A serializable representation of StoreError for IPC
#[derive(Debug, Clone, Serialize)]
pub struct SerializableError {
    /// Error kind
    pub kind: ErrorKind,
    /// Human-readable error message
    pub message: String,
    /// Conflict details for merge conflicts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict: Option<MergeConflictInfo>,
}

impl From<&StoreError> for SerializableError {
    fn from(err: &StoreError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            conflict: err.merge_conflict_info().cloned(),
        }
    }
}

impl From<StoreError> for SerializableError {
    fn from(err: StoreError) -> Self {
        SerializableError::from(&err)
    }
}

impl StoreError {
    /// Convert to a serializable representation for IPC
    pub fn to_serializable(&self) -> SerializableError {
        SerializableError::from(self)
    }
}

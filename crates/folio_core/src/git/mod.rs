//! File-plus-commit-graph backend.
//!
//! Artifacts are JSON files in a Git working tree and every logical edit is
//! one commit. Branching, merging and conflict inspection go through
//! [`BranchManager`] and [`ConflictDetector`], both obtained from a
//! [`GitArtifactStore`] so they share its repository handle.
//!
//! This is the only module that talks to `git2`.

mod branch;
mod conflict;
mod history;
mod repo;
mod store;

pub use branch::{BranchInfo, BranchManager};
pub use conflict::{ConflictDetector, StageSet, classify_stages};
pub use repo::GitArtifactRef;
pub use store::{GitArtifactStore, ProjectGate};

#![doc = include_str!("../README.md")]

/// Configuration options
pub mod config;

/// Error (common error types)
pub mod error;

/// Artifact envelope, payload and ids
pub mod artifact;

/// Rich-text spans and their canonical form
pub mod rich_text;

/// Commits, changes and merge conflicts
pub mod change;

/// Schema migrations
pub mod migration;

/// The store contract and backend selection
pub mod store;

/// Project index file
pub mod index;

/// Filesystem abstraction
pub mod fs;

/// CRDT-backed store (realtime collaboration)
#[cfg(feature = "crdt")]
pub mod crdt;

/// Commit-graph store (explicit version control)
#[cfg(feature = "git")]
pub mod git;

#[cfg(test)]
pub mod test_utils;

pub use artifact::{ArtifactId, Document, VersionedArtifact};
pub use change::{Change, ChangeId, Commit, CommitHash, MergeConflict, MergeConflictInfo};
pub use config::{BackendKind, StoreConfig};
pub use error::{StoreError, StoreResult};
pub use migration::{Migration, MigrationSet};
pub use rich_text::RichTextSpan;
pub use store::{ArtifactStore, StoreDeps, open_store};

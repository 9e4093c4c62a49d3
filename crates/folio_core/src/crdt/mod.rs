//! CRDT-backed artifact store.
//!
//! Each artifact is a yrs document (see `document` for its layout) owned by a
//! [`DocRegistry`]. Local edits, migration steps and commits are all recorded
//! in the [`CrdtStorage`] update log; commits carry a message and the heads
//! they were taken at, which is what [`HistoryManager`] reads back.

mod document;
mod handle;
mod history;
mod memory_storage;
mod merge;
mod registry;
mod storage;
mod store;
mod types;

pub use handle::ArtifactHandle;
pub use history::HistoryManager;
pub use memory_storage::MemoryStorage;
pub use merge::{MergeResolver, suggest_merge};
pub use registry::DocRegistry;
pub use storage::{CrdtStorage, StorageResult};
pub use store::CrdtArtifactStore;
pub use types::{CommitMarker, CrdtUpdate, UpdateOrigin};

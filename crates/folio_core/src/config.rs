//! Configuration types for Folio stores.
//!
//! [`StoreConfig`] selects the backend once at process start and carries the
//! settings both stores need. Configuration is persisted as TOML (typically at
//! `~/.config/folio/config.toml` on Unix systems).
//!
//! # Async-first Design
//!
//! Use `StoreConfig::load_from()` with an `AsyncFileSystem` to load config.
//! For synchronous contexts, use the `_sync` variants.
//!
//! # Example
//!
//! ```ignore
//! use folio_core::config::{BackendKind, StoreConfig};
//!
//! let mut config = StoreConfig::default();
//! config.backend = BackendKind::Git;
//! config.git.workdir = "/home/user/project".into();
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::fs::{AsyncFileSystem, FileSystem, SyncToAsyncFs};

/// Which store implementation to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Realtime collaboration on CRDT documents
    #[default]
    Crdt,
    /// Files in a working tree with an explicit commit graph
    Git,
}

/// Top-level store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: BackendKind,

    /// Artifact type written into new envelopes
    pub artifact_type: String,

    /// Upper bound for finding and reading a CRDT document
    pub find_timeout_ms: u64,

    pub git: GitConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            artifact_type: "document".to_string(),
            find_timeout_ms: 5000,
            git: GitConfig::default(),
        }
    }
}

/// Settings for the commit-graph backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    /// Working directory of the project repository
    pub workdir: PathBuf,

    /// Branch new repositories start on, and the fallback when the
    /// current branch is deleted
    pub default_branch: String,

    /// Directory (relative to `workdir`) holding artifact files
    pub artifacts_dir: String,

    /// Project index file (relative to `workdir`)
    pub index_file: String,

    /// Commit author used when the repository has no `user.name`
    pub author_name: String,

    /// Commit email used when the repository has no `user.email`
    pub author_email: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            workdir: PathBuf::from("."),
            default_branch: "main".to_string(),
            artifacts_dir: "artifacts".to_string(),
            index_file: "index.json".to_string(),
            author_name: "Folio".to_string(),
            author_email: "folio@localhost".to_string(),
        }
    }
}

impl StoreConfig {
    /// Timeout applied to `find`/`read` on the CRDT backend.
    pub fn find_timeout(&self) -> Duration {
        Duration::from_millis(self.find_timeout_ms)
    }

    // ========================================================================
    // Async-first API (works with any AsyncFileSystem)
    // ========================================================================

    /// Load config from a specific path using an AsyncFileSystem.
    pub async fn load_from<FS: AsyncFileSystem + ?Sized>(
        fs: &FS,
        path: &Path,
    ) -> StoreResult<Self> {
        let contents = fs.read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound(format!("config file {}", path.display()))
            } else {
                StoreError::repository(&format!("reading {}", path.display()), e)
            }
        })?;

        let config: StoreConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save config to a specific path using an AsyncFileSystem.
    pub async fn save_to<FS: AsyncFileSystem + ?Sized>(
        &self,
        fs: &FS,
        path: &Path,
    ) -> StoreResult<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs.create_dir_all(parent).await?;
        }

        let contents = toml::to_string_pretty(self)?;
        fs.write_file(path, &contents).await?;
        Ok(())
    }

    /// Load config from an AsyncFileSystem, returning default if not found.
    pub async fn load_from_or_default<FS: AsyncFileSystem + ?Sized>(fs: &FS, path: &Path) -> Self {
        match Self::load_from(fs, path).await {
            Ok(config) => config,
            Err(StoreError::NotFound(_)) => Self::default(),
            Err(e) => {
                log::warn!("Ignoring unreadable config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    // ========================================================================
    // Sync wrappers. Prefer the async APIs above.
    // ========================================================================

    /// Sync wrapper for [`StoreConfig::load_from`].
    pub fn load_from_sync<FS: FileSystem>(fs: FS, path: &Path) -> StoreResult<Self> {
        futures_lite::future::block_on(Self::load_from(&SyncToAsyncFs::new(fs), path))
    }

    /// Sync wrapper for [`StoreConfig::save_to`].
    pub fn save_to_sync<FS: FileSystem>(&self, fs: FS, path: &Path) -> StoreResult<()> {
        futures_lite::future::block_on(self.save_to(&SyncToAsyncFs::new(fs), path))
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl StoreConfig {
    /// Get the config file path (~/.config/folio/config.toml)
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("folio").join("config.toml"))
    }
}

//! Project index file.
//!
//! A project directory records which artifact it edits in a small JSON file,
//! `{ "artifactId": "..." }`, so reopening a project finds the same artifact.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactId;
use crate::error::{StoreError, StoreResult};
use crate::fs::AsyncFileSystem;

/// Contents of a project's index file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactIndex {
    pub artifact_id: ArtifactId,
}

impl ArtifactIndex {
    pub fn new(artifact_id: ArtifactId) -> Self {
        Self { artifact_id }
    }

    /// Read the index, or `None` when the file does not exist yet.
    pub async fn load<FS: AsyncFileSystem + ?Sized>(
        fs: &FS,
        path: &Path,
    ) -> StoreResult<Option<Self>> {
        if !fs.exists(path).await {
            return Ok(None);
        }
        let contents = fs
            .read_to_string(path)
            .await
            .map_err(|e| StoreError::repository(&format!("reading {}", path.display()), e))?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    pub async fn save<FS: AsyncFileSystem + ?Sized>(
        &self,
        fs: &FS,
        path: &Path,
    ) -> StoreResult<()> {
        let contents = serde_json::to_string_pretty(self)?;
        fs.write_file(path, &contents).await?;
        Ok(())
    }
}

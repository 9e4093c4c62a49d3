//! Artifact model shared by both stores.
//!
//! A stored artifact is a [`VersionedArtifact`] wrapping a rich-text
//! [`Document`]. The envelope records which schema version the payload was
//! written with, so the migration engine can bring it forward on read.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::error::{StoreError, StoreResult};
use crate::rich_text::RichTextSpan;

/// An artifact payload tagged with its type and schema version.
///
/// Whenever a store hands one of these to a caller, `schema_version` equals
/// the current schema version. A missing `schemaVersion` field deserializes
/// as version 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionedArtifact<T> {
    /// Artifact type (e.g. "document")
    #[serde(rename = "type")]
    pub artifact_type: String,

    /// Schema version the payload conforms to
    #[serde(default)]
    pub schema_version: u32,

    /// The payload itself
    pub payload: T,
}

impl<T> VersionedArtifact<T> {
    pub fn new(artifact_type: impl Into<String>, schema_version: u32, payload: T) -> Self {
        Self {
            artifact_type: artifact_type.into(),
            schema_version,
            payload,
        }
    }
}

/// The rich-text payload stored by both backends.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Document {
    /// Canonical span sequence
    #[serde(default)]
    pub spans: Vec<RichTextSpan>,

    /// Free-form document properties (title, tags, ...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Value>,
}

impl Document {
    pub fn from_spans(spans: Vec<RichTextSpan>) -> Self {
        Self {
            spans,
            properties: BTreeMap::new(),
        }
    }

    /// True when the document has neither content nor properties.
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty() && self.properties.is_empty()
    }

    /// Concatenated text of all text spans (blocks are skipped).
    pub fn plain_text(&self) -> String {
        self.spans
            .iter()
            .filter_map(|span| match span {
                RichTextSpan::Text { value, .. } => Some(value.as_str()),
                RichTextSpan::Block { .. } => None,
            })
            .collect()
    }
}

/// Opaque, backend-scoped identifier of an artifact.
///
/// CRDT artifacts use `crdt:<uuid>`; Git artifacts use `<branch>:<path>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(String);

impl ArtifactId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ArtifactId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Reject ids that cannot address anything in any backend.
pub(crate) fn ensure_well_formed(id: &ArtifactId) -> StoreResult<()> {
    if id.0.trim().is_empty() || id.0.chars().any(char::is_control) {
        return Err(StoreError::Validation(format!(
            "malformed artifact id '{}'",
            id.0.escape_debug()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_schema_version_is_zero() {
        let artifact: VersionedArtifact<Document> =
            serde_json::from_str(r#"{"type":"document","payload":{"spans":[]}}"#).unwrap();
        assert_eq!(artifact.schema_version, 0);
        assert_eq!(artifact.artifact_type, "document");
        assert!(artifact.payload.is_empty());
    }

    #[test]
    fn test_envelope_field_names() {
        let artifact = VersionedArtifact::new("document", 3, Document::default());
        let json = serde_json::to_value(&artifact).unwrap();
        assert_eq!(json["type"], "document");
        assert_eq!(json["schemaVersion"], 3);
    }

    #[test]
    fn test_plain_text_skips_blocks() {
        let doc = Document::from_spans(vec![
            RichTextSpan::text("Hello"),
            RichTextSpan::block("paragraph"),
            RichTextSpan::text(" world"),
        ]);
        assert_eq!(doc.plain_text(), "Hello world");
    }

    #[test]
    fn test_malformed_ids_rejected() {
        assert!(ensure_well_formed(&ArtifactId::new("crdt:abc")).is_ok());
        assert!(ensure_well_formed(&ArtifactId::new("  ")).is_err());
        assert!(ensure_well_formed(&ArtifactId::new("a\nb")).is_err());
    }
}

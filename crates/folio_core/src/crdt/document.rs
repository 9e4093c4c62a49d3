//! Mapping between a [`Document`] envelope and the shared types of a yrs doc.
//!
//! Layout of every artifact document:
//! - Y.Text `content`: one character per text unit, marks stored as
//!   `mark:`-prefixed formatting attributes (JSON text), one U+FFFC per
//!   block carrying the block definition in the reserved `block` attribute
//! - Y.Map `meta`: `type`, `schemaVersion`, `deleted`, `lastCommit`
//! - Y.Map `properties`: document properties as JSON text

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::Value;
use yrs::types::Attrs;
use yrs::{Any, Doc, Map, MapRef, OffsetKind, Options, Out, ReadTxn, Text, TextRef, TransactionMut};

use crate::artifact::{Document, VersionedArtifact};
use crate::rich_text::{
    Unit, byte_len, canonicalize_spans, from_chunks, group_runs, splice, to_units,
};

const CONTENT_TEXT_NAME: &str = "content";
const META_MAP_NAME: &str = "meta";
const PROPERTIES_MAP_NAME: &str = "properties";

const TYPE_KEY: &str = "type";
const SCHEMA_VERSION_KEY: &str = "schemaVersion";
const DELETED_KEY: &str = "deleted";
pub(crate) const LAST_COMMIT_KEY: &str = "lastCommit";

type Chunk = (String, BTreeMap<String, String>);

/// Options every artifact document is created with.
///
/// Offsets are UTF-8 bytes and deleted content is kept so views can be
/// materialized at any recorded snapshot.
pub(crate) fn doc_options() -> Options {
    Options {
        offset_kind: OffsetKind::Bytes,
        skip_gc: true,
        ..Options::default()
    }
}

/// Same as [`doc_options`] with a fixed client id.
pub(crate) fn doc_options_with_client(client_id: u64) -> Options {
    Options {
        offset_kind: OffsetKind::Bytes,
        skip_gc: true,
        ..Options::with_client_id(client_id.into())
    }
}

/// Root shared types of an artifact document.
pub(crate) struct DocRoots {
    content: TextRef,
    meta: MapRef,
    properties: MapRef,
}

impl DocRoots {
    pub(crate) fn new(doc: &Doc) -> Self {
        Self {
            content: doc.get_or_insert_text(CONTENT_TEXT_NAME),
            meta: doc.get_or_insert_map(META_MAP_NAME),
            properties: doc.get_or_insert_map(PROPERTIES_MAP_NAME),
        }
    }

    // ==================== Reads ====================

    /// The envelope as stored, without migrating it.
    pub(crate) fn view<T: ReadTxn>(&self, txn: &T) -> VersionedArtifact<Document> {
        VersionedArtifact {
            artifact_type: self.meta_string(txn, TYPE_KEY).unwrap_or_default(),
            schema_version: self.schema_version(txn),
            payload: Document {
                spans: from_chunks(self.chunks(txn)),
                properties: self.properties(txn),
            },
        }
    }

    pub(crate) fn schema_version<T: ReadTxn>(&self, txn: &T) -> u32 {
        match self.meta.get(txn, SCHEMA_VERSION_KEY) {
            Some(Out::Any(Any::Number(n))) if n >= 0.0 => n as u32,
            Some(Out::Any(Any::BigInt(n))) if n >= 0 => n as u32,
            _ => 0,
        }
    }

    pub(crate) fn is_deleted<T: ReadTxn>(&self, txn: &T) -> bool {
        matches!(
            self.meta.get(txn, DELETED_KEY),
            Some(Out::Any(Any::Bool(true)))
        )
    }

    fn meta_string<T: ReadTxn>(&self, txn: &T, key: &str) -> Option<String> {
        match self.meta.get(txn, key) {
            Some(Out::Any(Any::String(s))) => Some(s.to_string()),
            _ => None,
        }
    }

    fn properties<T: ReadTxn>(&self, txn: &T) -> BTreeMap<String, Value> {
        self.properties
            .iter(txn)
            .filter_map(|(key, value)| match value {
                Out::Any(Any::String(s)) => {
                    let value = serde_json::from_str(&s)
                        .unwrap_or_else(|_| Value::String(s.to_string()));
                    Some((key.to_string(), value))
                }
                _ => {
                    log::warn!("Skipping non-text property '{}'", key);
                    None
                }
            })
            .collect()
    }

    fn chunks<T: ReadTxn>(&self, txn: &T) -> Vec<Chunk> {
        self.content
            .diff(txn, |_| ())
            .into_iter()
            .filter_map(|diff| {
                let text = match diff.insert {
                    Out::Any(Any::String(s)) => s.to_string(),
                    _ => {
                        log::warn!("Skipping embedded value in document content");
                        return None;
                    }
                };
                let attrs = diff
                    .attributes
                    .map(|attrs| {
                        attrs
                            .iter()
                            .filter_map(|(key, value)| match value {
                                Any::String(s) => Some((key.to_string(), s.to_string())),
                                _ => None,
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                Some((text, attrs))
            })
            .collect()
    }

    fn units<T: ReadTxn>(&self, txn: &T) -> Vec<Unit> {
        self.chunks(txn)
            .into_iter()
            .flat_map(|(text, attrs)| {
                text.chars()
                    .map(|ch| Unit {
                        ch,
                        attrs: attrs.clone(),
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    // ==================== Writes ====================

    /// Write the whole envelope. Returns whether anything changed.
    pub(crate) fn write(
        &self,
        txn: &mut TransactionMut,
        artifact: &VersionedArtifact<Document>,
    ) -> bool {
        let mut changed = false;
        if self.meta_string(&*txn, TYPE_KEY).as_deref() != Some(artifact.artifact_type.as_str()) {
            self.meta
                .insert(txn, TYPE_KEY, artifact.artifact_type.clone());
            changed = true;
        }
        changed |= self.set_schema_version(txn, artifact.schema_version);
        changed |= self.write_payload(txn, &artifact.payload);
        changed
    }

    /// Write spans and properties. Returns whether anything changed.
    pub(crate) fn write_payload(&self, txn: &mut TransactionMut, payload: &Document) -> bool {
        let spans_changed = self.splice_content(txn, &payload.spans);
        let properties_changed = self.sync_properties(txn, &payload.properties);
        spans_changed || properties_changed
    }

    pub(crate) fn set_schema_version(&self, txn: &mut TransactionMut, version: u32) -> bool {
        let stored = self.meta.get(&*txn, SCHEMA_VERSION_KEY).is_some();
        if stored && self.schema_version(&*txn) == version {
            return false;
        }
        self.meta
            .insert(txn, SCHEMA_VERSION_KEY, Any::Number(f64::from(version)));
        true
    }

    pub(crate) fn mark_deleted(&self, txn: &mut TransactionMut) {
        self.meta.insert(txn, DELETED_KEY, Any::Bool(true));
    }

    pub(crate) fn touch_commit(&self, txn: &mut TransactionMut, marker: &str) {
        self.meta.insert(txn, LAST_COMMIT_KEY, marker.to_string());
    }

    /// Replace the span sequence with a minimal prefix/suffix splice.
    ///
    /// Every attribute key seen on either side is written on inserted text,
    /// absent ones as null, so inserted runs never inherit marks from their
    /// left neighbour.
    fn splice_content(
        &self,
        txn: &mut TransactionMut,
        spans: &[crate::rich_text::RichTextSpan],
    ) -> bool {
        let current = self.units(&*txn);
        let desired = to_units(&canonicalize_spans(spans.iter().cloned()));
        let edit = splice(&current, &desired);
        if edit.is_noop() {
            return false;
        }

        let start = byte_len(&current[..edit.prefix]) as u32;
        let removed = byte_len(&current[edit.prefix..edit.prefix + edit.delete]) as u32;
        if removed > 0 {
            self.content.remove_range(txn, start, removed);
        }

        let keys: BTreeSet<String> = current
            .iter()
            .chain(desired.iter())
            .flat_map(|unit| unit.attrs.keys().cloned())
            .collect();

        let mut offset = start;
        for (text, attrs) in group_runs(&edit.insert) {
            let mut formatting = Attrs::new();
            for key in &keys {
                let value = attrs
                    .get(key)
                    .map(|v| Any::String(Arc::from(v.as_str())))
                    .unwrap_or(Any::Null);
                formatting.insert(Arc::from(key.as_str()), value);
            }
            self.content
                .insert_with_attributes(txn, offset, &text, formatting);
            offset += text.len() as u32;
        }
        true
    }

    fn sync_properties(
        &self,
        txn: &mut TransactionMut,
        properties: &BTreeMap<String, Value>,
    ) -> bool {
        let current = self.properties(&*txn);
        if current == *properties {
            return false;
        }
        for key in current.keys().filter(|k| !properties.contains_key(*k)) {
            self.properties.remove(txn, key);
        }
        for (key, value) in properties {
            if current.get(key) != Some(value) {
                self.properties
                    .insert(txn, key.as_str(), value.to_string());
            }
        }
        true
    }
}

//! Rich-text spans and the canonical span list.
//!
//! Editors hand us arbitrary span sequences; [`canonicalize_spans`] reduces
//! them to the one canonical form both stores persist. For CRDT storage a
//! span sequence is flattened into [`Unit`]s (one per character or block) so
//! edits can be expressed as a minimal splice.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

/// Formatting marks applied to a run of text (bold, link, ...).
pub type Marks = BTreeMap<String, Value>;

/// Placeholder character standing in for a block boundary.
pub const BLOCK_PLACEHOLDER: char = '\u{FFFC}';

/// Reserved attribute key carrying a block's definition.
pub const BLOCK_ATTR: &str = "block";

/// Prefix on every stored mark key, keeping marks apart from [`BLOCK_ATTR`].
pub const MARK_PREFIX: &str = "mark:";

/// One element of a rich-text document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub enum RichTextSpan {
    /// A run of text sharing the same marks
    Text {
        value: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        marks: Marks,
    },
    /// A structural marker (paragraph, heading, list item, ...)
    Block {
        #[serde(rename = "blockType")]
        block_type: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        attrs: BTreeMap<String, Value>,
    },
}

impl RichTextSpan {
    /// Plain text without marks.
    pub fn text(value: impl Into<String>) -> Self {
        RichTextSpan::Text {
            value: value.into(),
            marks: Marks::new(),
        }
    }

    /// Text carrying a single mark.
    pub fn marked(value: impl Into<String>, mark: &str, mark_value: Value) -> Self {
        let mut marks = Marks::new();
        marks.insert(mark.to_string(), mark_value);
        RichTextSpan::Text {
            value: value.into(),
            marks,
        }
    }

    /// A block marker without attributes.
    pub fn block(block_type: impl Into<String>) -> Self {
        RichTextSpan::Block {
            block_type: block_type.into(),
            attrs: BTreeMap::new(),
        }
    }
}

/// Reduce a span list to canonical form.
///
/// Empty text spans are dropped and adjacent text spans with equal marks are
/// merged. Blocks are kept as-is.
pub fn canonicalize_spans(spans: impl IntoIterator<Item = RichTextSpan>) -> Vec<RichTextSpan> {
    let mut out: Vec<RichTextSpan> = Vec::new();
    for span in spans {
        match span {
            RichTextSpan::Text { value, .. } if value.is_empty() => {}
            RichTextSpan::Text { value, marks } => {
                if let Some(RichTextSpan::Text {
                    value: prev_value,
                    marks: prev_marks,
                }) = out.last_mut()
                    && *prev_marks == marks
                {
                    prev_value.push_str(&value);
                    continue;
                }
                out.push(RichTextSpan::Text { value, marks });
            }
            block => out.push(block),
        }
    }
    out
}

/// A single character (or block placeholder) with its encoded attributes.
///
/// Attribute values are JSON text so arbitrary mark payloads survive storage
/// as CRDT formatting attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    pub ch: char,
    pub attrs: BTreeMap<String, String>,
}

/// Flatten spans into units.
pub fn to_units(spans: &[RichTextSpan]) -> Vec<Unit> {
    let mut units = Vec::new();
    for span in spans {
        match span {
            RichTextSpan::Text { value, marks } => {
                let attrs: BTreeMap<String, String> = marks
                    .iter()
                    .map(|(k, v)| (format!("{MARK_PREFIX}{k}"), v.to_string()))
                    .collect();
                units.extend(value.chars().map(|ch| Unit {
                    ch,
                    attrs: attrs.clone(),
                }));
            }
            RichTextSpan::Block { .. } => {
                let encoded = serde_json::to_string(span).unwrap_or_default();
                let mut attrs = BTreeMap::new();
                attrs.insert(BLOCK_ATTR.to_string(), encoded);
                units.push(Unit {
                    ch: BLOCK_PLACEHOLDER,
                    attrs,
                });
            }
        }
    }
    units
}

/// Rebuild canonical spans from a run-length list of `(text, attrs)` chunks.
pub fn from_chunks(chunks: Vec<(String, BTreeMap<String, String>)>) -> Vec<RichTextSpan> {
    let mut spans = Vec::new();
    for (text, attrs) in chunks {
        if let Some(encoded) = attrs.get(BLOCK_ATTR) {
            for _ in text.chars().filter(|c| *c == BLOCK_PLACEHOLDER) {
                match serde_json::from_str::<RichTextSpan>(encoded) {
                    Ok(block @ RichTextSpan::Block { .. }) => spans.push(block),
                    _ => log::warn!("Dropping unreadable block attribute: {}", encoded),
                }
            }
            continue;
        }
        let marks: Marks = attrs
            .into_iter()
            .map(|(k, v)| {
                let key = k.strip_prefix(MARK_PREFIX).map(str::to_string).unwrap_or(k);
                let value = serde_json::from_str(&v).unwrap_or(Value::String(v));
                (key, value)
            })
            .collect();
        spans.push(RichTextSpan::Text { value: text, marks });
    }
    canonicalize_spans(spans)
}

/// Group consecutive units with identical attributes into runs.
pub fn group_runs(units: &[Unit]) -> Vec<(String, BTreeMap<String, String>)> {
    let mut runs: Vec<(String, BTreeMap<String, String>)> = Vec::new();
    for unit in units {
        match runs.last_mut() {
            Some((text, attrs)) if *attrs == unit.attrs => text.push(unit.ch),
            _ => runs.push((unit.ch.to_string(), unit.attrs.clone())),
        }
    }
    runs
}

/// A minimal splice turning one unit sequence into another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Splice {
    /// Units kept unchanged at the start
    pub prefix: usize,
    /// Number of current units to remove after the prefix
    pub delete: usize,
    /// Units to insert at the prefix position
    pub insert: Vec<Unit>,
}

impl Splice {
    pub fn is_noop(&self) -> bool {
        self.delete == 0 && self.insert.is_empty()
    }
}

/// Compute the common-prefix/suffix splice from `current` to `desired`.
pub fn splice(current: &[Unit], desired: &[Unit]) -> Splice {
    let prefix = current
        .iter()
        .zip(desired.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let remaining_current = current.len() - prefix;
    let remaining_desired = desired.len() - prefix;
    let suffix = current[prefix..]
        .iter()
        .rev()
        .zip(desired[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .take(remaining_current.min(remaining_desired))
        .count();

    Splice {
        prefix,
        delete: remaining_current - suffix,
        insert: desired[prefix..desired.len() - suffix].to_vec(),
    }
}

/// UTF-8 byte length of a unit slice.
pub fn byte_len(units: &[Unit]) -> usize {
    units.iter().map(|u| u.ch.len_utf8()).sum()
}

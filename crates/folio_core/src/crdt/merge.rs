//! Three-way merge of rich-text documents at the CRDT level.
//!
//! The resolver knows nothing about commits, branches or paths. It seeds a
//! document with the common ancestor, replays the source and the target as
//! two concurrent branches (each one transaction), and lets the CRDT merge
//! them. Concurrent edits are reconciled at character and attribute
//! granularity; there are never conflict markers.
//!
//! Client ids are fixed per role, so a merge is reproducible across runs.

use yrs::updates::decoder::Decode;
use yrs::{Doc, ReadTxn, StateVector, Transact, Update};

use super::document::{DocRoots, doc_options_with_client};
use crate::artifact::{ArtifactId, Document, VersionedArtifact};
use crate::change::{ChangeId, MergeConflictInfo};
use crate::error::{StoreError, StoreResult};
use crate::store::ArtifactStore;

const ANCESTOR_CLIENT: u64 = 1;
const SOURCE_CLIENT: u64 = 2;
const TARGET_CLIENT: u64 = 3;
const MERGED_CLIENT: u64 = 4;

/// Merges rich-text documents through the CRDT's causal merge.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeResolver;

impl MergeResolver {
    pub fn new() -> Self {
        Self
    }

    /// Merge `source` and `target`, both derived from `ancestor`.
    pub fn merge(
        &self,
        source: &Document,
        target: &Document,
        ancestor: &Document,
    ) -> StoreResult<Document> {
        let base = {
            let seed = Doc::with_options(doc_options_with_client(ANCESTOR_CLIENT));
            let roots = DocRoots::new(&seed);
            {
                let mut txn = seed.transact_mut();
                roots.write_payload(&mut txn, ancestor);
            }
            let txn = seed.transact();
            txn.encode_state_as_update_v1(&StateVector::default())
        };

        let source_update = branch(&base, SOURCE_CLIENT, source)?;
        let target_update = branch(&base, TARGET_CLIENT, target)?;

        let merged = Doc::with_options(doc_options_with_client(MERGED_CLIENT));
        let roots = DocRoots::new(&merged);
        for update in [&base, &source_update, &target_update] {
            apply(&merged, update)?;
        }
        let payload = roots.view(&merged.transact()).payload;
        Ok(payload)
    }
}

/// Fork the ancestor state and write `payload` in one transaction.
///
/// Returns only the branch's own operations.
fn branch(base: &[u8], client_id: u64, payload: &Document) -> StoreResult<Vec<u8>> {
    let fork = Doc::with_options(doc_options_with_client(client_id));
    let roots = DocRoots::new(&fork);
    apply(&fork, base)?;

    let sv_before = fork.transact().state_vector();
    {
        let mut txn = fork.transact_mut();
        roots.write_payload(&mut txn, payload);
    }
    let txn = fork.transact();
    Ok(txn.encode_state_as_update_v1(&sv_before))
}

fn apply(doc: &Doc, update: &[u8]) -> StoreResult<()> {
    let decoded = Update::decode_v1(update)
        .map_err(|e| StoreError::repository("decoding merge branch", e))?;
    let mut txn = doc.transact_mut();
    txn.apply_update(decoded)
        .map_err(|e| StoreError::repository("applying merge branch", e))
}

/// Suggest a merged document for one artifact of an interrupted merge.
///
/// Fetches the source, target and common-ancestor snapshots named by `info`
/// and merges them with [`MergeResolver`]. The result is returned at the
/// current schema version and is not written anywhere.
pub async fn suggest_merge(
    store: &dyn ArtifactStore,
    id: &ArtifactId,
    info: &MergeConflictInfo,
) -> StoreResult<VersionedArtifact<Document>> {
    let source = store
        .get_at_change(id, &ChangeId::commit(info.source_commit.as_str()))
        .await?;
    let target = store
        .get_at_change(id, &ChangeId::commit(info.target_commit.as_str()))
        .await?;
    let ancestor = store
        .get_at_change(id, &ChangeId::commit(info.common_ancestor_commit.as_str()))
        .await?;

    let payload = MergeResolver::new().merge(&source.payload, &target.payload, &ancestor.payload)?;
    Ok(VersionedArtifact {
        artifact_type: target.artifact_type,
        schema_version: target.schema_version,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rich_text::RichTextSpan;
    use serde_json::json;

    fn doc(text: &str) -> Document {
        Document::from_spans(vec![RichTextSpan::text(text)])
    }

    #[test]
    fn test_disjoint_edits_both_survive() {
        let ancestor = doc("The quick fox jumps.");
        let source = doc("The quick brown fox jumps.");
        let target = doc("The quick fox jumps high.");

        let merged = MergeResolver::new().merge(&source, &target, &ancestor).unwrap();
        assert_eq!(merged.plain_text(), "The quick brown fox jumps high.");
    }

    #[test]
    fn test_disjoint_edits_commute() {
        let ancestor = doc("alpha beta gamma");
        let source = doc("ALPHA beta gamma");
        let target = doc("alpha beta GAMMA");

        let resolver = MergeResolver::new();
        let forward = resolver.merge(&source, &target, &ancestor).unwrap();
        let swapped = resolver.merge(&target, &source, &ancestor).unwrap();
        assert_eq!(forward, swapped);
        assert_eq!(forward.plain_text(), "ALPHA beta GAMMA");
    }

    #[test]
    fn test_same_region_is_deterministic() {
        let ancestor = doc("x");
        let source = doc("x source");
        let target = doc("x target");

        let resolver = MergeResolver::new();
        let first = resolver.merge(&source, &target, &ancestor).unwrap();
        let second = resolver.merge(&source, &target, &ancestor).unwrap();
        assert_eq!(first, second);
        let text = first.plain_text();
        assert!(text.contains(" source") && text.contains(" target"), "{text}");
    }

    #[test]
    fn test_marks_merge_with_text_edits() {
        let ancestor = doc("make this bold");
        let source = Document::from_spans(vec![
            RichTextSpan::text("make this "),
            RichTextSpan::marked("bold", "bold", json!(true)),
        ]);
        let target = doc("please make this bold");

        let merged = MergeResolver::new().merge(&source, &target, &ancestor).unwrap();
        assert_eq!(
            merged.spans,
            vec![
                RichTextSpan::text("please make this "),
                RichTextSpan::marked("bold", "bold", json!(true)),
            ]
        );
    }

    #[test]
    fn test_unchanged_sides_yield_ancestor() {
        let ancestor = doc("same");
        let merged = MergeResolver::new()
            .merge(&ancestor, &ancestor, &ancestor)
            .unwrap();
        assert_eq!(merged, ancestor);
    }
}

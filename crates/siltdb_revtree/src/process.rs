//! Batch revision merge.
//!
//! [`process_docs`] runs the revision-merge phase of a bulk write: each
//! parsed document is merged into its current tree in input order, the
//! merge decision is handed to the caller's apply callback, and the
//! caller's finalized metadata feeds the next document with the same id.

use crate::error::TreeError;
use crate::parse::ParsedDoc;
use crate::rev::Rev;
use crate::tree::{MergeOutcome, RevTree};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-document revision bookkeeping stored in the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocMetadata {
    /// Document id.
    pub id: String,
    /// Revision forest.
    pub rev_tree: RevTree,
    /// Revision id → update sequence of its stored body.
    #[serde(default)]
    pub rev_map: HashMap<String, u64>,
    /// Memoized winning revision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winning_rev: Option<Rev>,
    /// Memoized deletion flag of the winning revision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<bool>,
    /// Update sequence of the latest stored body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

impl DocMetadata {
    /// Creates empty metadata for a new document id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rev_tree: RevTree::new(),
            rev_map: HashMap::new(),
            winning_rev: None,
            deleted: None,
            seq: None,
        }
    }

    /// The winning revision, memoized or recomputed.
    #[must_use]
    pub fn winning(&self) -> Option<Rev> {
        self.winning_rev
            .clone()
            .or_else(|| self.rev_tree.winning_rev())
    }

    /// Whether the winning revision is a deletion.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted.unwrap_or_else(|| self.rev_tree.winner_is_deleted())
    }
}

/// The merge phase's verdict on one accepted document.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeDecision {
    /// Winning revision after the merge.
    pub winning_rev: Rev,
    /// Whether that winner is a deletion.
    pub winning_rev_is_deleted: bool,
    /// Whether the edit itself is a deletion.
    pub new_rev_is_deleted: bool,
    /// Whether the document existed before this batch reached it.
    pub is_update: bool,
    /// Change to the live-document count (-1, 0, or +1).
    pub doc_count_delta: i64,
}

/// Outcome of merging one document of the batch.
#[derive(Debug)]
pub enum DocOutcome {
    /// The edit was accepted; the caller should materialize it.
    Accepted {
        /// The parsed document.
        parsed: ParsedDoc,
        /// Metadata with the merged tree (rev map not yet extended).
        metadata: DocMetadata,
        /// The merge verdict.
        decision: MergeDecision,
    },
    /// The edit was rejected; the caller records a per-document error.
    Rejected {
        /// The parsed document.
        parsed: ParsedDoc,
        /// Why the edit was rejected.
        error: TreeError,
    },
}

/// Merges a batch of parsed documents in input order.
///
/// `fetched` holds the current metadata of every id that already exists;
/// `apply` is called once per document with its index and outcome, and
/// returns the finalized metadata for accepted documents so later batch
/// entries with the same id observe the new state.
///
/// With `new_edits`, an update must extend a current leaf: a missing
/// parent revision or an edit landing anywhere else is rejected as a
/// conflict, except that a document whose winner is deleted may be
/// revived by a parentless edit. Without `new_edits`, every edit is
/// accepted and replays of known revisions surface as no-ops to `apply`.
pub fn process_docs<E, F>(
    docs: Vec<(usize, ParsedDoc)>,
    fetched: &mut HashMap<String, DocMetadata>,
    new_edits: bool,
    rev_limit: usize,
    mut apply: F,
) -> Result<(), E>
where
    F: FnMut(usize, DocOutcome) -> Result<Option<DocMetadata>, E>,
{
    for (index, parsed) in docs {
        let existing = fetched.get(&parsed.id).cloned();
        let is_update = existing.is_some();
        let previously_deleted = existing.as_ref().is_some_and(DocMetadata::is_deleted);
        let mut metadata = existing.unwrap_or_else(|| DocMetadata::new(parsed.id.clone()));

        let merge = metadata.rev_tree.merge(&parsed.fragment, rev_limit);

        let conflict = if !new_edits {
            false
        } else if is_update {
            // A live document accepts only leaf extensions; a deleted one
            // may also be revived by a parentless edit on a new branch.
            match merge.outcome {
                MergeOutcome::NewLeaf => false,
                MergeOutcome::NewBranch => !(previously_deleted && !parsed.has_parent),
                MergeOutcome::Existing => true,
            }
        } else {
            // Updating a document that does not exist.
            parsed.has_parent
        };

        if conflict {
            let error = TreeError::conflict(parsed.id.clone());
            apply(index, DocOutcome::Rejected { parsed, error })?;
            continue;
        }

        for rev in &merge.stemmed {
            metadata.rev_map.remove(&rev.to_string());
        }

        let winning_rev = metadata
            .rev_tree
            .winning_rev()
            .unwrap_or_else(|| parsed.rev.clone());
        let winning_rev_is_deleted = metadata.rev_tree.winner_is_deleted();

        let was_live = is_update && !previously_deleted;
        let now_live = !winning_rev_is_deleted;
        let doc_count_delta = i64::from(now_live) - i64::from(was_live);

        let decision = MergeDecision {
            winning_rev,
            winning_rev_is_deleted,
            new_rev_is_deleted: parsed.deleted,
            is_update,
            doc_count_delta,
        };

        let id = parsed.id.clone();
        let finalized = apply(
            index,
            DocOutcome::Accepted {
                parsed,
                metadata,
                decision,
            },
        )?;
        if let Some(finalized) = finalized {
            fetched.insert(id, finalized);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_doc;
    use serde_json::json;

    fn run(
        docs: Vec<serde_json::Value>,
        fetched: &mut HashMap<String, DocMetadata>,
        new_edits: bool,
    ) -> Vec<Result<MergeDecision, String>> {
        let parsed: Vec<(usize, ParsedDoc)> = docs
            .into_iter()
            .enumerate()
            .map(|(i, d)| (i, parse_doc(d, new_edits).unwrap()))
            .collect();
        let mut results: Vec<Result<MergeDecision, String>> = Vec::new();
        process_docs::<(), _>(parsed, fetched, new_edits, 1000, |_, outcome| {
            match outcome {
                DocOutcome::Accepted {
                    parsed,
                    mut metadata,
                    decision,
                } => {
                    metadata.rev_map.insert(parsed.rev.to_string(), 1);
                    metadata.winning_rev = Some(decision.winning_rev.clone());
                    metadata.deleted = Some(decision.winning_rev_is_deleted);
                    results.push(Ok(decision));
                    Ok(Some(metadata))
                }
                DocOutcome::Rejected { error, .. } => {
                    results.push(Err(error.to_string()));
                    Ok(None)
                }
            }
        })
        .unwrap();
        results
    }

    #[test]
    fn insert_counts_up() {
        let mut fetched = HashMap::new();
        let results = run(vec![json!({"_id": "a", "x": 1})], &mut fetched, true);
        let decision = results[0].as_ref().unwrap();
        assert!(!decision.is_update);
        assert_eq!(decision.doc_count_delta, 1);
        assert!(fetched.contains_key("a"));
    }

    #[test]
    fn update_of_missing_doc_conflicts() {
        let mut fetched = HashMap::new();
        let results = run(
            vec![json!({"_id": "a", "_rev": "1-deadbeef", "x": 1})],
            &mut fetched,
            true,
        );
        assert!(results[0].is_err());
        assert!(fetched.is_empty());
    }

    #[test]
    fn parentless_edit_on_live_doc_conflicts() {
        let mut fetched = HashMap::new();
        run(vec![json!({"_id": "a", "x": 1})], &mut fetched, true);
        let results = run(vec![json!({"_id": "a", "x": 2})], &mut fetched, true);
        assert!(results[0].is_err());
    }

    #[test]
    fn later_docs_see_earlier_batch_state() {
        let mut fetched = HashMap::new();
        // Two parentless edits of the same id inside one batch: the second
        // conflicts because the first already created a live winner.
        let results = run(
            vec![json!({"_id": "a", "x": 1}), json!({"_id": "a", "x": 2})],
            &mut fetched,
            true,
        );
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }

    #[test]
    fn delete_then_revive() {
        let mut fetched = HashMap::new();
        run(vec![json!({"_id": "a", "x": 1})], &mut fetched, true);
        let rev = fetched["a"].winning().unwrap().to_string();
        let results = run(
            vec![json!({"_id": "a", "_rev": rev, "_deleted": true})],
            &mut fetched,
            true,
        );
        let decision = results[0].as_ref().unwrap();
        assert!(decision.winning_rev_is_deleted);
        assert_eq!(decision.doc_count_delta, -1);

        // Revival without a parent is allowed on a deleted doc.
        let results = run(vec![json!({"_id": "a", "x": 3})], &mut fetched, true);
        let decision = results[0].as_ref().unwrap();
        assert!(!decision.winning_rev_is_deleted);
        assert_eq!(decision.doc_count_delta, 1);
    }

    #[test]
    fn new_edits_false_accepts_everything() {
        let mut fetched = HashMap::new();
        let results = run(
            vec![json!({"_id": "a", "_rev": "1-aaa", "x": 1})],
            &mut fetched,
            false,
        );
        assert!(results[0].is_ok());
        // A second branch lands without complaint.
        let results = run(
            vec![json!({"_id": "a", "_rev": "1-bbb", "x": 2})],
            &mut fetched,
            false,
        );
        assert!(results[0].is_ok());
        assert_eq!(fetched["a"].rev_tree.leaves().len(), 2);
    }
}

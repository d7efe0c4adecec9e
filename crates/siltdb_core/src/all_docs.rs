//! The `all_docs` range read.

use crate::database::Database;
use crate::error::CoreResult;
use crate::namespace::Namespace;
use serde::Serialize;
use serde_json::Value;
use siltdb_storage::Backend;
use std::sync::atomic::Ordering;

/// Options for [`Database::all_docs`].
#[derive(Debug, Clone)]
pub struct AllDocsOptions {
    /// Inclusive lower key bound (upper bound when descending).
    pub startkey: Option<String>,
    /// Inclusive upper key bound (lower bound when descending), unless
    /// `inclusive_end` is false.
    pub endkey: Option<String>,
    /// Exact-key equality; overrides `startkey`/`endkey`.
    pub key: Option<String>,
    /// Scan in reverse key order. Bounds swap roles; they are not
    /// auto-reversed for the caller.
    pub descending: bool,
    /// Drop this many rows before collecting.
    pub skip: usize,
    /// Stop after this many rows. Zero returns an empty page without
    /// scanning.
    pub limit: Option<usize>,
    /// Load the winning body for each row.
    pub include_docs: bool,
    /// Attach `_conflicts` to each loaded body.
    pub conflicts: bool,
    /// Inline attachment bodies as base64 in loaded bodies.
    pub attachments: bool,
    /// Include the row exactly equal to `endkey`.
    pub inclusive_end: bool,
    /// Include tombstones as `{value: {rev, deleted: true}, doc: null}`.
    pub deleted_ok: bool,
}

impl Default for AllDocsOptions {
    fn default() -> Self {
        Self {
            startkey: None,
            endkey: None,
            key: None,
            descending: false,
            skip: 0,
            limit: None,
            include_docs: false,
            conflicts: false,
            attachments: false,
            inclusive_end: true,
            deleted_ok: false,
        }
    }
}

/// The `value` column of an `all_docs` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowValue {
    /// Winning revision.
    pub rev: String,
    /// Present (and true) only on tombstone rows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted: Option<bool>,
}

/// One row of an `all_docs` page.
#[derive(Debug, Clone, Serialize)]
pub struct AllDocsRow {
    /// Document id.
    pub id: String,
    /// Row key; equals the id.
    pub key: String,
    /// Winning revision and deletion flag.
    pub value: RowValue,
    /// Winning body when `include_docs` was set; `null` on tombstones.
    pub doc: Option<Value>,
}

/// An `all_docs` result page.
#[derive(Debug, Clone, Serialize)]
pub struct AllDocsPage {
    /// Cached count of live documents in the whole database.
    pub total_rows: u64,
    /// The skip that was applied.
    pub offset: usize,
    /// Matching rows in scan order.
    pub rows: Vec<AllDocsRow>,
}

impl Database {
    /// Reads a page of documents ordered by id.
    pub fn all_docs(&self, opts: &AllDocsOptions) -> CoreResult<AllDocsPage> {
        self.ensure_open()?;
        let total_rows = self.inner.doc_count.load(Ordering::SeqCst);
        let empty = AllDocsPage {
            total_rows,
            offset: opts.skip,
            rows: Vec::new(),
        };
        if opts.limit == Some(0) {
            return Ok(empty);
        }

        let _guard = self.inner.queue.read();

        // With `descending`, the caller supplies startkey/endkey in scan
        // order, so the backend bounds swap roles.
        let (low, high) = match (&opts.key, opts.descending) {
            (Some(key), _) => (Some(key.as_str()), Some(key.as_str())),
            (None, false) => (opts.startkey.as_deref(), opts.endkey.as_deref()),
            (None, true) => (opts.endkey.as_deref(), opts.startkey.as_deref()),
        };
        let mut scan = Namespace::Docs.scan(
            low.map(str::as_bytes),
            high.map(str::as_bytes),
        );
        scan.reverse = opts.descending;

        let mut rows = Vec::new();
        let mut skip = opts.skip;
        for (key, bytes) in self.inner.backend.scan(scan)? {
            let Some(suffix) = Namespace::Docs.strip(&key) else {
                continue;
            };
            let id = String::from_utf8_lossy(suffix).into_owned();
            if !opts.inclusive_end && opts.endkey.as_deref() == Some(id.as_str()) {
                continue;
            }

            let metadata: siltdb_revtree::DocMetadata = serde_json::from_slice(&bytes)?;
            let Some(winner) = metadata.winning() else {
                continue;
            };
            let deleted = metadata.is_deleted();
            if deleted && !opts.deleted_ok {
                continue;
            }
            if skip > 0 {
                skip -= 1;
                continue;
            }

            let rev = winner.to_string();
            let doc = if opts.include_docs && !deleted {
                let seq = metadata.rev_map.get(&rev).copied();
                match seq {
                    Some(seq) => match self.load_body(seq)? {
                        Some(mut body) => {
                            if opts.conflicts {
                                let conflicts = metadata.rev_tree.collect_conflicts();
                                if !conflicts.is_empty() {
                                    body.insert(
                                        "_conflicts".into(),
                                        Value::Array(
                                            conflicts
                                                .into_iter()
                                                .map(|r| Value::String(r.to_string()))
                                                .collect(),
                                        ),
                                    );
                                }
                            }
                            if opts.attachments {
                                self.hydrate_attachments(&mut body)?;
                            }
                            Some(Value::Object(body))
                        }
                        None => None,
                    },
                    None => None,
                }
            } else {
                None
            };

            rows.push(AllDocsRow {
                key: id.clone(),
                id,
                value: RowValue {
                    rev,
                    deleted: deleted.then_some(true),
                },
                doc,
            });
            if opts.limit.is_some_and(|limit| rows.len() >= limit) {
                break;
            }
        }

        Ok(AllDocsPage {
            total_rows,
            offset: opts.skip,
            rows,
        })
    }
}

//! Compaction: revision pruning and orphaned-attachment GC.
//!
//! Compaction reclaims the bodies of obsolete (non-leaf) revisions. The
//! tree keeps its shape with the reclaimed revisions marked missing, the
//! sequence rows are deleted, and attachment references held by the
//! removed revisions are dropped, deleting the attachment and binary
//! rows once no references remain. Logical document state never changes.

use crate::attachments::{ref_key, AttachRow};
use crate::database::Database;
use crate::error::CoreResult;
use crate::namespace::{seq_key, Namespace};
use crate::transaction::ScopedTransaction;
use serde_json::Value;
use siltdb_revtree::{DocMetadata, Rev};
use siltdb_storage::Backend;
use std::collections::BTreeSet;
use std::sync::Arc;

impl Database {
    /// Compacts every document in the database.
    pub fn compact(&self) -> CoreResult<()> {
        self.ensure_open()?;
        let _guard = self.inner.queue.write();

        let rows = self.inner.backend.scan(Namespace::Docs.scan(None, None))?;
        let mut compacted = 0usize;
        for (_key, bytes) in rows {
            let mut metadata: DocMetadata = serde_json::from_slice(&bytes)?;
            let revs = metadata.rev_tree.compactable_revs();
            if revs.is_empty() {
                continue;
            }
            let mut txn = ScopedTransaction::new(Arc::clone(&self.inner.backend));
            self.compact_doc_in_txn(&mut txn, &mut metadata, &revs)?;
            txn.execute()?;
            compacted += 1;
        }
        tracing::debug!(name = %self.inner.name, compacted, "compaction finished");
        Ok(())
    }

    /// Compacts the named revisions of one document.
    pub fn compact_doc(&self, id: &str, revs: &[Rev]) -> CoreResult<()> {
        self.ensure_open()?;
        let _guard = self.inner.queue.write();
        let Some(mut metadata) = self.load_metadata(id)? else {
            return Ok(());
        };
        let mut txn = ScopedTransaction::new(Arc::clone(&self.inner.backend));
        self.compact_doc_in_txn(&mut txn, &mut metadata, revs)?;
        txn.execute()
    }

    /// Lock-free compaction step sharing an enclosing transaction; the
    /// commit is deferred to the caller.
    pub(crate) fn compact_doc_in_txn(
        &self,
        txn: &mut ScopedTransaction,
        metadata: &mut DocMetadata,
        revs: &[Rev],
    ) -> CoreResult<()> {
        metadata.rev_tree.mark_missing(revs);

        // Delete the bodies, collecting the attachment digests they held.
        let mut digests: BTreeSet<String> = BTreeSet::new();
        for rev in revs {
            let Some(&seq) = metadata.rev_map.get(&rev.to_string()) else {
                continue;
            };
            let seq_suffix = seq_key(seq);
            if let Some(body) = txn.get_json::<Value>(Namespace::BySeq, seq_suffix.as_bytes())? {
                if let Some(Value::Object(atts)) = body.get("_attachments") {
                    for att in atts.values() {
                        if let Some(digest) = att.get("digest").and_then(Value::as_str) {
                            digests.insert(digest.to_string());
                        }
                    }
                }
            }
            txn.del(Namespace::BySeq, seq_suffix.as_bytes());
        }

        txn.put_json(Namespace::Docs, metadata.id.as_bytes(), metadata)?;

        // Drop the removed revisions' references; reclaim fully orphaned
        // attachments. Legacy rows without refs are never reclaimed.
        let removed: BTreeSet<String> = revs
            .iter()
            .map(|rev| ref_key(&metadata.id, &rev.to_string()))
            .collect();
        for digest in digests {
            let Some(mut row) =
                txn.get_json::<AttachRow>(Namespace::Attach, digest.as_bytes())?
            else {
                continue;
            };
            let Some(refs) = &mut row.refs else {
                continue;
            };
            refs.retain(|key, _| !removed.contains(key));
            if refs.is_empty() {
                txn.del(Namespace::Attach, digest.as_bytes());
                txn.del(Namespace::Binary, digest.as_bytes());
            } else {
                txn.put_json(Namespace::Attach, digest.as_bytes(), &row)?;
            }
        }
        Ok(())
    }
}

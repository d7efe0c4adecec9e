//! The bulk-write pipeline.
//!
//! All document writes funnel through [`Database::bulk_write`]. One
//! scoped transaction, held under the write guard, accumulates every
//! row the batch produces; the commit is a single atomic backend batch.
//!
//! Stage order per batch: parse, attachment normalization, stub
//! verification, existing-metadata fetch, revision merge, per-accepted-
//! revision materialization, optional inline compaction, meta rows,
//! commit. Failures before the merge fail the whole batch; merge-phase
//! rejections land in the per-document result slot.

use crate::attachments::{preprocess, save_ref, stub_value, ProcessedAttachment};
use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::namespace::{
    is_local_id, seq_key, Namespace, META_DOC_COUNT, META_UPDATE_SEQ,
};
use crate::transaction::ScopedTransaction;
use serde_json::Value;
use siltdb_revtree::{parse_doc, process_docs, DocMetadata, DocOutcome, ParsedDoc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Options for a bulk write.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// When false, the caller supplies explicit revision histories and
    /// every edit is accepted (the replication path).
    pub new_edits: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self { new_edits: true }
    }
}

/// Success slot of a bulk-write result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOk {
    /// Document id.
    pub id: String,
    /// Revision the edit landed as.
    pub rev: String,
}

/// Per-document outcome, positionally aligned with the input.
pub type DocResult = CoreResult<WriteOk>;

enum Entry {
    Doc(ParsedDoc, BTreeMap<String, ProcessedAttachment>),
    LocalPut(Value),
    LocalRemove(Value),
}

impl Database {
    /// Writes a batch of documents.
    ///
    /// Returns one result per input document, in input order. Sequence
    /// numbers are allocated in input order; later documents in the batch
    /// observe the state written by earlier ones.
    ///
    /// # Errors
    ///
    /// Parse failures, malformed attachments, and unknown stub digests
    /// fail the whole batch; revision conflicts fail only their slot.
    pub fn bulk_write(
        &self,
        docs: Vec<Value>,
        opts: WriteOptions,
    ) -> CoreResult<Vec<DocResult>> {
        self.ensure_open()?;
        let inner = &self.inner;

        // Parse and normalize up front; any failure here fails the batch.
        let mut entries = Vec::with_capacity(docs.len());
        for doc in docs {
            let local = doc
                .get("_id")
                .and_then(Value::as_str)
                .is_some_and(is_local_id);
            if local {
                let deleted = matches!(doc.get("_deleted"), Some(Value::Bool(true)));
                entries.push(if deleted {
                    Entry::LocalRemove(doc)
                } else {
                    Entry::LocalPut(doc)
                });
                continue;
            }
            let mut parsed = parse_doc(doc, opts.new_edits)?;
            let atts = preprocess(&mut parsed.data)?;
            entries.push(Entry::Doc(parsed, atts));
        }

        let _guard = inner.queue.write();
        let mut txn = ScopedTransaction::new(Arc::clone(&inner.backend));

        // Stub verification: every declared stub must already be stored.
        for entry in &entries {
            if let Entry::Doc(_, atts) = entry {
                for att in atts.values().filter(|a| a.stub) {
                    if txn
                        .get(Namespace::Attach, att.digest.as_bytes())?
                        .is_none()
                    {
                        return Err(CoreError::missing_stub(&att.digest));
                    }
                }
            }
        }

        // Existing-metadata fetch, cached per call.
        let mut fetched: HashMap<String, DocMetadata> = HashMap::new();
        for entry in &entries {
            if let Entry::Doc(parsed, _) = entry {
                if !fetched.contains_key(&parsed.id) {
                    if let Some(metadata) =
                        txn.get_json::<DocMetadata>(Namespace::Docs, parsed.id.as_bytes())?
                    {
                        fetched.insert(parsed.id.clone(), metadata);
                    }
                }
            }
        }

        let old_seq = inner.update_seq.load(Ordering::SeqCst);
        let old_count = inner.doc_count.load(Ordering::SeqCst);
        let mut new_seq = old_seq;
        let mut delta_total: i64 = 0;
        let mut results: Vec<Option<DocResult>> = Vec::new();
        results.resize_with(entries.len(), || None);
        let mut touched: BTreeSet<String> = BTreeSet::new();

        // Local documents run inline; regular documents go to the merge.
        let mut to_process: Vec<(usize, ParsedDoc)> = Vec::new();
        let mut atts_by_index: HashMap<usize, BTreeMap<String, ProcessedAttachment>> =
            HashMap::new();
        for (index, entry) in entries.into_iter().enumerate() {
            match entry {
                Entry::LocalPut(doc) => {
                    results[index] = Some(self.put_local_in_txn(&mut txn, doc));
                }
                Entry::LocalRemove(doc) => {
                    results[index] = Some(self.remove_local_in_txn(&mut txn, doc));
                }
                Entry::Doc(parsed, atts) => {
                    atts_by_index.insert(index, atts);
                    to_process.push((index, parsed));
                }
            }
        }
        let had_docs = !to_process.is_empty();

        process_docs(
            to_process,
            &mut fetched,
            opts.new_edits,
            inner.rev_limit,
            |index, outcome| -> CoreResult<Option<DocMetadata>> {
                match outcome {
                    DocOutcome::Rejected { error, .. } => {
                        results[index] = Some(Err(error.into()));
                        Ok(None)
                    }
                    DocOutcome::Accepted {
                        parsed,
                        mut metadata,
                        decision,
                    } => {
                        let rev = parsed.rev.to_string();

                        // Idempotence guard: a revision already present in
                        // the rev map has been fully written before.
                        if metadata.rev_map.contains_key(&rev) {
                            results[index] = Some(Ok(WriteOk {
                                id: parsed.id,
                                rev,
                            }));
                            return Ok(Some(metadata));
                        }

                        new_seq += 1;
                        let seq = new_seq;

                        let mut body = parsed.data;
                        body.insert("_rev".into(), Value::String(rev.clone()));

                        let atts = atts_by_index.remove(&index).unwrap_or_default();
                        if !atts.is_empty() {
                            let mut stubs = serde_json::Map::new();
                            for (name, att) in &atts {
                                let is_new = save_ref(&mut txn, att, &parsed.id, &rev)?;
                                if is_new && att.length > 0 {
                                    let bytes =
                                        att.bytes.clone().expect("inline attachment has bytes");
                                    txn.put(Namespace::Binary, att.digest.as_bytes(), bytes);
                                }
                                stubs.insert(name.clone(), stub_value(att));
                            }
                            body.insert("_attachments".into(), Value::Object(stubs));
                        }

                        txn.put_json(
                            Namespace::BySeq,
                            seq_key(seq).as_bytes(),
                            &Value::Object(body),
                        )?;

                        metadata.rev_map.insert(rev.clone(), seq);
                        metadata.seq = Some(seq);
                        metadata.winning_rev = Some(decision.winning_rev.clone());
                        metadata.deleted = Some(decision.winning_rev_is_deleted);
                        txn.put_json(Namespace::Docs, parsed.id.as_bytes(), &metadata)?;

                        delta_total += decision.doc_count_delta;
                        touched.insert(parsed.id.clone());
                        results[index] = Some(Ok(WriteOk {
                            id: parsed.id,
                            rev,
                        }));
                        Ok(Some(metadata))
                    }
                }
            },
        )?;

        if inner.auto_compaction {
            for id in &touched {
                if let Some(metadata) = fetched.get_mut(id) {
                    let revs = metadata.rev_tree.compactable_revs();
                    if !revs.is_empty() {
                        self.compact_doc_in_txn(&mut txn, metadata, &revs)?;
                    }
                }
            }
        }

        let new_count = u64::try_from((old_count as i64 + delta_total).max(0))
            .expect("count is non-negative");
        if had_docs {
            txn.put_json(Namespace::Meta, META_UPDATE_SEQ.as_bytes(), &new_seq)?;
            txn.put_json(Namespace::Meta, META_DOC_COUNT.as_bytes(), &new_count)?;
        }

        if !txn.is_empty() {
            txn.execute()?;
        }

        // In-memory counters move only after the backend commit succeeds.
        inner.update_seq.store(new_seq, Ordering::SeqCst);
        inner.doc_count.store(new_count, Ordering::SeqCst);

        tracing::debug!(
            name = %inner.name,
            batch = results.len(),
            update_seq = new_seq,
            doc_count = new_count,
            "bulk write committed"
        );

        drop(_guard);
        if new_seq > old_seq {
            inner.feed.notify();
        }

        Ok(results
            .into_iter()
            .map(|slot| slot.expect("every slot is filled"))
            .collect())
    }
}

//! Local (non-replicated) documents.
//!
//! Ids starting with `_local/` route here. Local documents live outside
//! the revision tree, the sequence store, and the change feed; their
//! revisions are plain counters of the form `0-<n>`.

use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::namespace::{is_local_id, Namespace};
use crate::transaction::ScopedTransaction;
use crate::write::{DocResult, WriteOk};
use serde_json::{Map, Value};
use siltdb_storage::Backend;
use std::sync::Arc;

fn local_id(doc: &Value) -> CoreResult<String> {
    let id = doc
        .get("_id")
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::bad_argument("_id must be a string"))?;
    if !is_local_id(id) {
        return Err(CoreError::bad_argument(format!(
            "not a local document id: {id:?}"
        )));
    }
    Ok(id.to_string())
}

fn supplied_rev(doc: &Value) -> Option<&str> {
    doc.get("_rev").and_then(Value::as_str)
}

fn stored_rev(doc: &Value) -> u64 {
    // Stored local docs always carry a well-formed "0-<n>" revision.
    supplied_rev(doc)
        .and_then(|rev| rev.strip_prefix("0-"))
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

impl Database {
    /// Reads a local document.
    pub fn get_local(&self, id: &str) -> CoreResult<Value> {
        self.ensure_open()?;
        let _guard = self.inner.queue.read();
        let bytes = self
            .inner
            .backend
            .get(&Namespace::Local.key(id.as_bytes()))?
            .ok_or_else(CoreError::missing)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Writes a local document, requiring its `_rev` to match the stored
    /// revision.
    pub fn put_local(&self, doc: Value) -> CoreResult<WriteOk> {
        self.ensure_open()?;
        let _guard = self.inner.queue.write();
        let mut txn = ScopedTransaction::new(Arc::clone(&self.inner.backend));
        let result = self.put_local_in_txn(&mut txn, doc)?;
        txn.execute()?;
        Ok(result)
    }

    /// Deletes a local document, requiring a matching `_rev`.
    pub fn remove_local(&self, doc: Value) -> CoreResult<WriteOk> {
        self.ensure_open()?;
        let _guard = self.inner.queue.write();
        let mut txn = ScopedTransaction::new(Arc::clone(&self.inner.backend));
        let result = self.remove_local_in_txn(&mut txn, doc)?;
        txn.execute()?;
        Ok(result)
    }

    /// Lock-free put for use inside an enclosing bulk write.
    pub(crate) fn put_local_in_txn(
        &self,
        txn: &mut ScopedTransaction,
        doc: Value,
    ) -> DocResult {
        let id = local_id(&doc)?;
        let existing = txn.get_json::<Value>(Namespace::Local, id.as_bytes())?;

        let next = match &existing {
            Some(stored) => {
                if supplied_rev(stored) != supplied_rev(&doc) {
                    return Err(CoreError::rev_conflict(&id));
                }
                stored_rev(stored) + 1
            }
            None => {
                if supplied_rev(&doc).is_some() {
                    return Err(CoreError::rev_conflict(&id));
                }
                1
            }
        };
        let rev = format!("0-{next}");

        let mut body: Map<String, Value> = match doc {
            Value::Object(fields) => fields,
            _ => return Err(CoreError::bad_argument("document is not a JSON object")),
        };
        body.insert("_id".into(), Value::String(id.clone()));
        body.insert("_rev".into(), Value::String(rev.clone()));
        txn.put_json(Namespace::Local, id.as_bytes(), &Value::Object(body))?;

        Ok(WriteOk { id, rev })
    }

    /// Lock-free remove for use inside an enclosing bulk write.
    pub(crate) fn remove_local_in_txn(
        &self,
        txn: &mut ScopedTransaction,
        doc: Value,
    ) -> DocResult {
        let id = local_id(&doc)?;
        let stored = txn
            .get_json::<Value>(Namespace::Local, id.as_bytes())?
            .ok_or_else(CoreError::missing)?;
        if supplied_rev(&stored) != supplied_rev(&doc) {
            return Err(CoreError::rev_conflict(&id));
        }
        txn.del(Namespace::Local, id.as_bytes());
        Ok(WriteOk {
            id,
            rev: "0-0".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OpenOptions;
    use crate::error::MissingReason;
    use serde_json::json;

    fn open(name: &str) -> Database {
        Database::open(OpenOptions::new(name)).unwrap()
    }

    #[test]
    fn put_then_get_increments_rev() {
        let db = open("local-putget");
        let ok = db
            .put_local(json!({"_id": "_local/cfg", "color": "teal"}))
            .unwrap();
        assert_eq!(ok.rev, "0-1");

        let stored = db.get_local("_local/cfg").unwrap();
        assert_eq!(stored["_rev"], "0-1");
        assert_eq!(stored["color"], "teal");

        let ok = db
            .put_local(json!({"_id": "_local/cfg", "_rev": "0-1", "color": "plum"}))
            .unwrap();
        assert_eq!(ok.rev, "0-2");
        Database::destroy("memory", "local-putget").unwrap();
    }

    #[test]
    fn put_without_rev_on_existing_conflicts() {
        let db = open("local-norev");
        db.put_local(json!({"_id": "_local/cfg", "x": 1})).unwrap();
        let err = db
            .put_local(json!({"_id": "_local/cfg", "x": 2}))
            .unwrap_err();
        assert!(matches!(err, CoreError::RevConflict { .. }));
        Database::destroy("memory", "local-norev").unwrap();
    }

    #[test]
    fn put_with_rev_on_missing_conflicts() {
        let db = open("local-ghost");
        let err = db
            .put_local(json!({"_id": "_local/ghost", "_rev": "0-3"}))
            .unwrap_err();
        assert!(matches!(err, CoreError::RevConflict { .. }));
        Database::destroy("memory", "local-ghost").unwrap();
    }

    #[test]
    fn remove_requires_matching_rev() {
        let db = open("local-remove");
        db.put_local(json!({"_id": "_local/cfg", "x": 1})).unwrap();

        let err = db
            .remove_local(json!({"_id": "_local/cfg", "_rev": "0-9"}))
            .unwrap_err();
        assert!(matches!(err, CoreError::RevConflict { .. }));

        let ok = db
            .remove_local(json!({"_id": "_local/cfg", "_rev": "0-1"}))
            .unwrap();
        assert_eq!(ok.rev, "0-0");
        assert!(matches!(
            db.get_local("_local/cfg"),
            Err(CoreError::Missing {
                reason: MissingReason::Missing
            })
        ));
        Database::destroy("memory", "local-remove").unwrap();
    }

    #[test]
    fn remove_of_absent_is_missing() {
        let db = open("local-absent");
        let err = db
            .remove_local(json!({"_id": "_local/nope", "_rev": "0-1"}))
            .unwrap_err();
        assert!(matches!(err, CoreError::Missing { .. }));
        Database::destroy("memory", "local-absent").unwrap();
    }

    #[test]
    fn local_docs_never_reach_the_doc_store() {
        let db = open("local-isolation");
        db.put_local(json!({"_id": "_local/cfg", "x": 1})).unwrap();
        db.bulk_write(vec![json!({"_id": "visible", "x": 1})], Default::default())
            .unwrap();

        let info = db.info().unwrap();
        assert_eq!(info.doc_count, 1);
        assert_eq!(info.update_seq, 1);
        Database::destroy("memory", "local-isolation").unwrap();
    }
}

//! Scoped transactions.
//!
//! A scoped transaction accumulates writes against one database and
//! commits them as a single atomic backend batch. Reads inside the
//! transaction observe its own pending writes before falling through to
//! the backend. Transactions are not shared across tasks and carry no
//! locking; the operation queue provides exclusion.

use crate::error::{CoreError, CoreResult};
use crate::namespace::Namespace;
use serde::de::DeserializeOwned;
use serde::Serialize;
use siltdb_storage::{Backend, BatchOp};
use std::collections::HashMap;
use std::sync::Arc;

/// A read-through buffered write set with deferred atomic commit.
pub struct ScopedTransaction {
    backend: Arc<dyn Backend>,
    ops: Vec<BatchOp>,
    /// Full key → index of the latest op touching it.
    index: HashMap<Vec<u8>, usize>,
    executed: bool,
}

impl ScopedTransaction {
    /// Creates an empty transaction over the backend.
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            ops: Vec::new(),
            index: HashMap::new(),
            executed: false,
        }
    }

    /// Reads a key, observing this transaction's pending writes first.
    pub fn get(&self, ns: Namespace, suffix: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        let key = ns.key(suffix);
        if let Some(&idx) = self.index.get(&key) {
            return Ok(match &self.ops[idx] {
                BatchOp::Put { value, .. } => Some(value.clone()),
                BatchOp::Del { .. } => None,
            });
        }
        Ok(self.backend.get(&key)?)
    }

    /// Reads and deserializes a JSON row.
    pub fn get_json<T: DeserializeOwned>(
        &self,
        ns: Namespace,
        suffix: &[u8],
    ) -> CoreResult<Option<T>> {
        match self.get(ns, suffix)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Buffers a put. The backend is not touched until [`execute`].
    ///
    /// [`execute`]: ScopedTransaction::execute
    pub fn put(&mut self, ns: Namespace, suffix: &[u8], value: Vec<u8>) {
        let key = ns.key(suffix);
        self.index.insert(key.clone(), self.ops.len());
        self.ops.push(BatchOp::Put { key, value });
    }

    /// Buffers a put of a JSON row.
    pub fn put_json<T: Serialize>(
        &mut self,
        ns: Namespace,
        suffix: &[u8],
        value: &T,
    ) -> CoreResult<()> {
        let bytes = serde_json::to_vec(value)?;
        self.put(ns, suffix, bytes);
        Ok(())
    }

    /// Buffers a delete.
    pub fn del(&mut self, ns: Namespace, suffix: &[u8]) {
        let key = ns.key(suffix);
        self.index.insert(key.clone(), self.ops.len());
        self.ops.push(BatchOp::Del { key });
    }

    /// Number of buffered operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether the write set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Flushes the write set as one atomic backend batch.
    ///
    /// Succeeds or fails as a unit; a failed execute leaves the backend
    /// unchanged. Executing twice is an error.
    pub fn execute(&mut self) -> CoreResult<()> {
        if self.executed {
            return Err(CoreError::invalid_operation(
                "transaction already executed",
            ));
        }
        self.executed = true;
        let ops = std::mem::take(&mut self.ops);
        self.index.clear();
        self.backend.write_batch(ops)?;
        Ok(())
    }
}

impl std::fmt::Debug for ScopedTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedTransaction")
            .field("pending_ops", &self.ops.len())
            .field("executed", &self.executed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siltdb_storage::MemoryBackend;

    fn backend(name: &str) -> Arc<dyn Backend> {
        Arc::new(MemoryBackend::open(&format!("txn-test-{name}")))
    }

    #[test]
    fn reads_own_writes() {
        let backend = backend("ryw");
        let mut txn = ScopedTransaction::new(Arc::clone(&backend));
        txn.put(Namespace::Docs, b"a", b"1".to_vec());

        // Visible inside the transaction, not in the backend.
        assert_eq!(
            txn.get(Namespace::Docs, b"a").unwrap(),
            Some(b"1".to_vec())
        );
        assert_eq!(
            backend.get(&Namespace::Docs.key(b"a")).unwrap(),
            None
        );
    }

    #[test]
    fn buffered_delete_masks_backend_value() {
        let backend = backend("mask");
        backend.put(&Namespace::Docs.key(b"a"), b"old").unwrap();

        let mut txn = ScopedTransaction::new(Arc::clone(&backend));
        assert_eq!(
            txn.get(Namespace::Docs, b"a").unwrap(),
            Some(b"old".to_vec())
        );
        txn.del(Namespace::Docs, b"a");
        assert_eq!(txn.get(Namespace::Docs, b"a").unwrap(), None);
    }

    #[test]
    fn later_write_wins_within_transaction() {
        let backend = backend("latest");
        let mut txn = ScopedTransaction::new(backend);
        txn.put(Namespace::Docs, b"a", b"1".to_vec());
        txn.put(Namespace::Docs, b"a", b"2".to_vec());
        assert_eq!(
            txn.get(Namespace::Docs, b"a").unwrap(),
            Some(b"2".to_vec())
        );
    }

    #[test]
    fn execute_flushes_atomically() {
        let backend = backend("flush");
        let mut txn = ScopedTransaction::new(Arc::clone(&backend));
        txn.put(Namespace::Docs, b"a", b"1".to_vec());
        txn.put(Namespace::Meta, b"b", b"2".to_vec());
        txn.execute().unwrap();

        assert_eq!(
            backend.get(&Namespace::Docs.key(b"a")).unwrap(),
            Some(b"1".to_vec())
        );
        assert_eq!(
            backend.get(&Namespace::Meta.key(b"b")).unwrap(),
            Some(b"2".to_vec())
        );
    }

    #[test]
    fn execute_twice_is_an_error() {
        let backend = backend("twice");
        let mut txn = ScopedTransaction::new(backend);
        txn.put(Namespace::Docs, b"a", b"1".to_vec());
        txn.execute().unwrap();
        assert!(matches!(
            txn.execute(),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn namespaces_do_not_collide() {
        let backend = backend("ns");
        let mut txn = ScopedTransaction::new(backend);
        txn.put(Namespace::Docs, b"k", b"doc".to_vec());
        txn.put(Namespace::Local, b"k", b"local".to_vec());
        assert_eq!(
            txn.get(Namespace::Docs, b"k").unwrap(),
            Some(b"doc".to_vec())
        );
        assert_eq!(
            txn.get(Namespace::Local, b"k").unwrap(),
            Some(b"local".to_vec())
        );
    }
}

//! In-memory ordered backend.

use crate::backend::{Backend, BatchOp, ScanOptions};
use crate::error::StorageResult;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

type Store = Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>;

/// Named stores shared across the process, so a database closed and
/// reopened under the same name sees its previous contents.
static STORES: Mutex<BTreeMap<String, Store>> = Mutex::new(BTreeMap::new());

/// An ordered in-memory backend.
///
/// Data lives in a process-wide named store: opening the same name twice
/// attaches to the same map, and [`MemoryBackend::destroy`] wipes it. This
/// backend is suitable for tests and ephemeral databases.
///
/// # Thread Safety
///
/// The backend is thread-safe and can be shared across threads.
#[derive(Debug)]
pub struct MemoryBackend {
    data: Store,
}

impl MemoryBackend {
    /// Opens (or creates) the named store.
    #[must_use]
    pub fn open(name: &str) -> Self {
        let mut stores = STORES.lock();
        let data = stores
            .entry(name.to_string())
            .or_insert_with(Store::default)
            .clone();
        Self { data }
    }

    /// Returns whether a store with this name currently exists.
    #[must_use]
    pub fn exists(name: &str) -> bool {
        STORES.lock().contains_key(name)
    }

    /// Removes the named store and clears its contents.
    ///
    /// Handles still attached to the store observe an empty map afterwards.
    pub fn destroy(name: &str) {
        let removed = STORES.lock().remove(name);
        if let Some(store) = removed {
            store.write().clear();
        }
    }

    /// Returns the number of keys in the store.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl Backend for MemoryBackend {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> StorageResult<()> {
        self.data.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn del(&self, key: &[u8]) -> StorageResult<()> {
        self.data.write().remove(key);
        Ok(())
    }

    fn write_batch(&self, ops: Vec<BatchOp>) -> StorageResult<()> {
        // Single map write lock makes the batch atomic.
        let mut data = self.data.write();
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    data.insert(key, value);
                }
                BatchOp::Del { key } => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn scan(&self, opts: ScanOptions) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        // A reversed bound pair yields no rows rather than a panic or a
        // silently swapped range.
        if let (Some(gte), Some(lte)) = (&opts.gte, &opts.lte) {
            if gte > lte {
                return Ok(Vec::new());
            }
        }

        let lower = match &opts.gte {
            Some(k) => Bound::Included(k.clone()),
            None => Bound::Unbounded,
        };
        let upper = match &opts.lte {
            Some(k) => Bound::Included(k.clone()),
            None => Bound::Unbounded,
        };

        let data = self.data.read();
        let range = data.range((lower, upper));
        let limit = opts.limit.unwrap_or(usize::MAX);

        let rows: Vec<(Vec<u8>, Vec<u8>)> = if opts.reverse {
            range
                .rev()
                .take(limit)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        } else {
            range
                .take(limit)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };
        Ok(rows)
    }

    fn close(&self) -> StorageResult<()> {
        // Data stays in the named store until destroyed.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique(name: &str) -> String {
        format!("memory-test-{name}")
    }

    #[test]
    fn put_get_roundtrip() {
        let backend = MemoryBackend::open(&unique("roundtrip"));
        backend.put(b"a", b"1").unwrap();
        assert_eq!(backend.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(backend.get(b"b").unwrap(), None);
    }

    #[test]
    fn del_is_idempotent() {
        let backend = MemoryBackend::open(&unique("del"));
        backend.put(b"a", b"1").unwrap();
        backend.del(b"a").unwrap();
        backend.del(b"a").unwrap();
        assert_eq!(backend.get(b"a").unwrap(), None);
    }

    #[test]
    fn batch_applies_all_ops() {
        let backend = MemoryBackend::open(&unique("batch"));
        backend.put(b"gone", b"x").unwrap();
        backend
            .write_batch(vec![
                BatchOp::Put {
                    key: b"a".to_vec(),
                    value: b"1".to_vec(),
                },
                BatchOp::Put {
                    key: b"b".to_vec(),
                    value: b"2".to_vec(),
                },
                BatchOp::Del {
                    key: b"gone".to_vec(),
                },
            ])
            .unwrap();
        assert_eq!(backend.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(backend.get(b"b").unwrap(), Some(b"2".to_vec()));
        assert_eq!(backend.get(b"gone").unwrap(), None);
    }

    #[test]
    fn scan_respects_bounds_and_order() {
        let backend = MemoryBackend::open(&unique("scan"));
        for key in ["a", "b", "c", "d"] {
            backend.put(key.as_bytes(), b"v").unwrap();
        }

        let rows = backend
            .scan(ScanOptions {
                gte: Some(b"b".to_vec()),
                lte: Some(b"c".to_vec()),
                ..ScanOptions::default()
            })
            .unwrap();
        let keys: Vec<_> = rows.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn scan_reverse_and_limit() {
        let backend = MemoryBackend::open(&unique("scan-rev"));
        for key in ["a", "b", "c"] {
            backend.put(key.as_bytes(), b"v").unwrap();
        }

        let rows = backend
            .scan(ScanOptions {
                reverse: true,
                limit: Some(2),
                ..ScanOptions::default()
            })
            .unwrap();
        let keys: Vec<_> = rows.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![b"c".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn scan_reversed_bounds_is_empty() {
        let backend = MemoryBackend::open(&unique("scan-empty"));
        backend.put(b"m", b"v").unwrap();
        let rows = backend
            .scan(ScanOptions {
                gte: Some(b"z".to_vec()),
                lte: Some(b"a".to_vec()),
                ..ScanOptions::default()
            })
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn reopen_sees_previous_data() {
        let name = unique("reopen");
        {
            let backend = MemoryBackend::open(&name);
            backend.put(b"k", b"v").unwrap();
            backend.close().unwrap();
        }
        let backend = MemoryBackend::open(&name);
        assert_eq!(backend.get(b"k").unwrap(), Some(b"v".to_vec()));
        MemoryBackend::destroy(&name);
    }

    #[test]
    fn destroy_wipes_store() {
        let name = unique("destroy");
        let backend = MemoryBackend::open(&name);
        backend.put(b"k", b"v").unwrap();
        MemoryBackend::destroy(&name);
        assert!(!MemoryBackend::exists(&name));
        // Attached handles observe emptiness.
        assert_eq!(backend.get(b"k").unwrap(), None);
    }
}

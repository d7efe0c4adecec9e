//! Process-wide backend handle registry.
//!
//! Ordered K/V backends commonly refuse a second opener for the same
//! database. The registry hands out one shared handle per
//! `(backend, name)` pair and refcounts opens so the handle is released
//! only when the last user closes it.

use crate::backend::Backend;
use crate::error::{StorageError, StorageResult};
use crate::memory::MemoryBackend;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Factory name of the built-in in-memory backend.
pub const MEMORY_BACKEND: &str = "memory";

struct Entry {
    handle: Arc<dyn Backend>,
    refcount: usize,
}

static REGISTRY: Mutex<BTreeMap<(String, String), Entry>> = Mutex::new(BTreeMap::new());

/// Opens (or attaches to) the database `name` using the backend factory
/// `backend`.
///
/// Repeated opens of the same `(backend, name)` pair return the same
/// shared handle. With `create_if_missing` false, opening a database that
/// does not exist fails with [`StorageError::DatabaseMissing`].
///
/// # Errors
///
/// Returns [`StorageError::BackendUnavailable`] when no factory is
/// registered under `backend`.
pub fn open(backend: &str, name: &str, create_if_missing: bool) -> StorageResult<Arc<dyn Backend>> {
    let mut registry = REGISTRY.lock();
    let key = (backend.to_string(), name.to_string());

    if let Some(entry) = registry.get_mut(&key) {
        entry.refcount += 1;
        return Ok(Arc::clone(&entry.handle));
    }

    let handle: Arc<dyn Backend> = match backend {
        MEMORY_BACKEND => {
            if !create_if_missing && !MemoryBackend::exists(name) {
                return Err(StorageError::database_missing(name));
            }
            Arc::new(MemoryBackend::open(name))
        }
        other => return Err(StorageError::backend_unavailable(other)),
    };

    registry.insert(
        key,
        Entry {
            handle: Arc::clone(&handle),
            refcount: 1,
        },
    );
    Ok(handle)
}

/// Releases one open of `(backend, name)`, evicting the shared handle when
/// the last open is released.
pub fn close(backend: &str, name: &str) -> StorageResult<()> {
    let mut registry = REGISTRY.lock();
    let key = (backend.to_string(), name.to_string());
    if let Some(entry) = registry.get_mut(&key) {
        entry.refcount -= 1;
        if entry.refcount == 0 {
            let entry = registry.remove(&key).expect("entry present");
            entry.handle.close()?;
        }
    }
    Ok(())
}

/// Destroys the database `name`, evicting any shared handle and wiping the
/// backend's stored data.
pub fn destroy(backend: &str, name: &str) -> StorageResult<()> {
    let mut registry = REGISTRY.lock();
    let key = (backend.to_string(), name.to_string());
    registry.remove(&key);
    match backend {
        MEMORY_BACKEND => {
            MemoryBackend::destroy(name);
            Ok(())
        }
        other => Err(StorageError::backend_unavailable(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_backend_is_unavailable() {
        let err = open("levelfs", "db", true).unwrap_err();
        assert!(matches!(err, StorageError::BackendUnavailable { .. }));
    }

    #[test]
    fn open_twice_shares_the_handle() {
        let first = open(MEMORY_BACKEND, "registry-share", true).unwrap();
        let second = open(MEMORY_BACKEND, "registry-share", true).unwrap();
        first.put(b"k", b"v").unwrap();
        assert_eq!(second.get(b"k").unwrap(), Some(b"v".to_vec()));

        close(MEMORY_BACKEND, "registry-share").unwrap();
        close(MEMORY_BACKEND, "registry-share").unwrap();
        destroy(MEMORY_BACKEND, "registry-share").unwrap();
    }

    #[test]
    fn close_evicts_at_zero() {
        let _handle = open(MEMORY_BACKEND, "registry-evict", true).unwrap();
        close(MEMORY_BACKEND, "registry-evict").unwrap();
        // A fresh open attaches to the same named store, not a live entry.
        let again = open(MEMORY_BACKEND, "registry-evict", true).unwrap();
        again.put(b"k", b"v").unwrap();
        close(MEMORY_BACKEND, "registry-evict").unwrap();
        destroy(MEMORY_BACKEND, "registry-evict").unwrap();
    }

    #[test]
    fn missing_without_create_fails() {
        let err = open(MEMORY_BACKEND, "registry-missing-db", false).unwrap_err();
        assert!(matches!(err, StorageError::DatabaseMissing { .. }));
    }
}

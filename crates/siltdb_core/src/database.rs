//! Database facade and lifecycle.

use crate::changes::{broadcaster_for, drop_broadcaster, Broadcaster};
use crate::config::OpenOptions;
use crate::error::{CoreError, CoreResult};
use crate::namespace::{Namespace, META_DOC_COUNT, META_UPDATE_SEQ, META_UUID};
use crate::queue::OperationQueue;
use parking_lot::RwLock;
use serde::Serialize;
use siltdb_storage::{registry, Backend, StorageError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// A handle to an open database.
///
/// Handles are cheap to clone and share one instance per open. All
/// operations pass through the instance's operation queue: reads batch,
/// writes serialize.
///
/// # Opening a Database
///
/// ```rust,ignore
/// use siltdb_core::{Database, OpenOptions};
///
/// let db = Database::open(OpenOptions::new("mail"))?;
/// let results = db.bulk_write(vec![serde_json::json!({"_id": "a", "x": 1})], Default::default())?;
/// db.close()?;
/// ```
#[derive(Clone)]
pub struct Database {
    pub(crate) inner: Arc<DbInner>,
}

pub(crate) struct DbInner {
    /// Database name.
    pub(crate) name: String,
    /// Backend factory name.
    pub(crate) backend_name: String,
    /// Shared backend handle from the process-wide registry.
    pub(crate) backend: Arc<dyn Backend>,
    /// FIFO operation queue.
    pub(crate) queue: OperationQueue,
    /// Latest committed update sequence; authoritative while open.
    pub(crate) update_seq: AtomicU64,
    /// Count of live documents; authoritative while open.
    pub(crate) doc_count: AtomicU64,
    /// Instance UUID, created at first open and immutable after.
    pub(crate) uuid: String,
    /// Whether bulk writes compact inline.
    pub(crate) auto_compaction: bool,
    /// Revision depth kept per branch.
    pub(crate) rev_limit: usize,
    /// Whether this handle is open.
    pub(crate) is_open: RwLock<bool>,
    /// Live change-feed broadcaster, keyed process-wide by name.
    pub(crate) feed: Arc<Broadcaster>,
}

/// Summary returned by [`Database::info`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DbInfo {
    /// Database name.
    pub db_name: String,
    /// Count of documents whose winning revision is not deleted.
    pub doc_count: u64,
    /// Latest committed update sequence.
    pub update_seq: u64,
}

impl Database {
    /// Opens a database.
    ///
    /// Repeated opens of the same `(backend, name)` share one backend
    /// handle through the process-wide registry. On first open the
    /// instance UUID is created; the update sequence and document count
    /// are bootstrapped from the meta store.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BackendUnavailable`] when the backend factory
    /// is unknown, and storage errors otherwise.
    pub fn open(opts: OpenOptions) -> CoreResult<Self> {
        let backend = registry::open(&opts.backend, &opts.name, opts.create_if_missing).map_err(
            |err| match err {
                StorageError::BackendUnavailable { name } => CoreError::backend_unavailable(name),
                other => CoreError::Storage(other),
            },
        )?;

        let uuid = match get_meta::<String>(&backend, META_UUID)? {
            Some(uuid) => uuid,
            None => {
                let uuid = Uuid::new_v4().simple().to_string();
                backend.put(
                    &Namespace::Meta.key(META_UUID.as_bytes()),
                    &serde_json::to_vec(&uuid)?,
                )?;
                uuid
            }
        };
        let update_seq = get_meta::<u64>(&backend, META_UPDATE_SEQ)?.unwrap_or(0);
        let doc_count = get_meta::<u64>(&backend, META_DOC_COUNT)?.unwrap_or(0);

        tracing::debug!(
            name = %opts.name,
            backend = %opts.backend,
            update_seq,
            doc_count,
            "database opened"
        );

        Ok(Self {
            inner: Arc::new(DbInner {
                feed: broadcaster_for(&opts.name),
                name: opts.name,
                backend_name: opts.backend,
                backend,
                queue: OperationQueue::new(),
                update_seq: AtomicU64::new(update_seq),
                doc_count: AtomicU64::new(doc_count),
                uuid,
                auto_compaction: opts.auto_compaction,
                rev_limit: opts.rev_limit,
                is_open: RwLock::new(true),
            }),
        })
    }

    /// Returns a summary of the database.
    pub fn info(&self) -> CoreResult<DbInfo> {
        self.ensure_open()?;
        let _guard = self.inner.queue.read();
        Ok(DbInfo {
            db_name: self.inner.name.clone(),
            doc_count: self.inner.doc_count.load(Ordering::SeqCst),
            update_seq: self.inner.update_seq.load(Ordering::SeqCst),
        })
    }

    /// Returns the instance UUID.
    pub fn id(&self) -> CoreResult<String> {
        self.ensure_open()?;
        Ok(self.inner.uuid.clone())
    }

    /// The database name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Checks if the handle is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.inner.is_open.read()
    }

    /// Closes the handle, releasing its registry open.
    ///
    /// Subsequent operations fail with [`CoreError::NotOpen`]. Closing
    /// twice is a no-op.
    pub fn close(&self) -> CoreResult<()> {
        let mut open = self.inner.is_open.write();
        if !*open {
            return Ok(());
        }
        *open = false;
        registry::close(&self.inner.backend_name, &self.inner.name)?;
        tracing::debug!(name = %self.inner.name, "database closed");
        Ok(())
    }

    /// Destroys the named database: evicts any shared handle, removes the
    /// live-feed broadcaster, and wipes the backend's stored data.
    pub fn destroy(backend: &str, name: &str) -> CoreResult<()> {
        registry::destroy(backend, name).map_err(|err| match err {
            StorageError::BackendUnavailable { name } => CoreError::backend_unavailable(name),
            other => CoreError::Storage(other),
        })?;
        drop_broadcaster(name);
        tracing::debug!(name, backend, "database destroyed");
        Ok(())
    }

    pub(crate) fn ensure_open(&self) -> CoreResult<()> {
        if *self.inner.is_open.read() {
            Ok(())
        } else {
            Err(CoreError::NotOpen)
        }
    }
}

fn get_meta<T: serde::de::DeserializeOwned>(
    backend: &Arc<dyn Backend>,
    key: &str,
) -> CoreResult<Option<T>> {
    match backend.get(&Namespace::Meta.key(key.as_bytes()))? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.inner.name)
            .field("is_open", &self.is_open())
            .field("update_seq", &self.inner.update_seq.load(Ordering::SeqCst))
            .field("doc_count", &self.inner.doc_count.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Drop for DbInner {
    fn drop(&mut self) {
        let mut open = self.is_open.write();
        if *open {
            *open = false;
            let _ = registry::close(&self.backend_name, &self.name);
        }
    }
}

//! Storage backend trait definition.

use crate::error::StorageResult;

/// A single operation inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Insert or overwrite a key.
    Put {
        /// Full key bytes.
        key: Vec<u8>,
        /// Value bytes.
        value: Vec<u8>,
    },
    /// Remove a key. Removing an absent key is not an error.
    Del {
        /// Full key bytes.
        key: Vec<u8>,
    },
}

impl BatchOp {
    /// Returns the key this operation targets.
    #[must_use]
    pub fn key(&self) -> &[u8] {
        match self {
            BatchOp::Put { key, .. } | BatchOp::Del { key } => key,
        }
    }
}

/// Options for a bounded range scan.
///
/// Bounds are inclusive on both ends. A scan whose lower bound sorts after
/// its upper bound returns no rows; backends must not silently swap the
/// bounds.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Inclusive lower bound. `None` scans from the first key.
    pub gte: Option<Vec<u8>>,
    /// Inclusive upper bound. `None` scans to the last key.
    pub lte: Option<Vec<u8>>,
    /// Iterate from the upper bound downward.
    pub reverse: bool,
    /// Stop after this many rows.
    pub limit: Option<usize>,
}

/// An ordered key/value backend for siltdb.
///
/// Backends are **opaque ordered byte stores**. The engine owns all key
/// layout and value interpretation; backends only provide ordered access
/// and atomic multi-key batches.
///
/// # Invariants
///
/// - Keys iterate in lexicographic byte order.
/// - `write_batch` applies all operations or none of them.
/// - `get` after a successful `put`/`write_batch` observes the written value.
/// - Backends must be `Send + Sync` for shared handles.
pub trait Backend: Send + Sync + std::fmt::Debug {
    /// Reads the value stored under `key`, if any.
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Inserts or overwrites a single key.
    fn put(&self, key: &[u8], value: &[u8]) -> StorageResult<()>;

    /// Removes a single key. Removing an absent key succeeds.
    fn del(&self, key: &[u8]) -> StorageResult<()>;

    /// Applies a batch of operations atomically.
    ///
    /// Either every operation becomes visible or none does; a failed batch
    /// leaves the store unchanged.
    fn write_batch(&self, ops: Vec<BatchOp>) -> StorageResult<()>;

    /// Returns the rows inside the bounds of `opts`, in scan order.
    fn scan(&self, opts: ScanOptions) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Flushes and releases any resources held by this handle.
    fn close(&self) -> StorageResult<()>;
}

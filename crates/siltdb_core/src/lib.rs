//! # siltdb core
//!
//! Storage engine for siltdb: a local, embeddable document database with
//! MVCC revision trees, content-addressed attachments, and a monotonic
//! change feed, layered on an ordered key/value backend.
//!
//! This crate provides:
//! - The six-namespace data layout over the backend
//! - The bulk-write pipeline with attachment reference counting
//! - Scoped transactions with read-your-writes and atomic commit
//! - The per-database operation queue (batched reads, serial writes)
//! - Historical and live change feeds with filtering
//! - Compaction of obsolete revisions and orphaned attachments
//!
//! ```rust,ignore
//! use siltdb_core::{Database, OpenOptions};
//! use serde_json::json;
//!
//! let db = Database::open(OpenOptions::new("inventory"))?;
//! db.bulk_write(vec![json!({"_id": "widget", "qty": 3})], Default::default())?;
//! let doc = db.get("widget", &Default::default())?;
//! db.close()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod all_docs;
mod attachments;
mod changes;
mod compact;
mod config;
mod database;
mod error;
mod local;
mod namespace;
mod queue;
mod read;
mod transaction;
mod write;

pub use all_docs::{AllDocsOptions, AllDocsPage, AllDocsRow, RowValue};
pub use attachments::{digest as attachment_digest, AttachRow, DIGEST_PREFIX};
pub use changes::{
    ChangeRow, ChangesFilter, ChangesHandle, ChangesOptions, ChangesResult, OnChange, OnComplete,
};
pub use config::{OpenOptions, DEFAULT_REV_LIMIT};
pub use database::{Database, DbInfo};
pub use error::{CoreError, CoreResult, MissingReason};
pub use namespace::{
    is_local_id, seq_key, Namespace, LOCAL_PREFIX, META_DOC_COUNT, META_UPDATE_SEQ, META_UUID,
};
pub use queue::{OperationQueue, ReadGuard, WriteGuard};
pub use read::{AttachmentData, GetOptions};
pub use transaction::ScopedTransaction;
pub use write::{DocResult, WriteOk, WriteOptions};

pub use siltdb_revtree::{DocMetadata, Rev, RevTree};

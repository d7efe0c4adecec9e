//! Point reads: `get`, `get_attachment`, `get_revision_tree`.

use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::namespace::{is_local_id, seq_key, Namespace};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{Map, Value};
use siltdb_storage::Backend;
use siltdb_revtree::{DocMetadata, Rev, RevTree};

/// Options for [`Database::get`].
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    /// Read this specific revision instead of the winner.
    pub rev: Option<String>,
    /// Attach `_conflicts` with the losing live leaves.
    pub conflicts: bool,
    /// Inline attachment bodies as base64 instead of stubs.
    pub attachments: bool,
}

/// An attachment body, in the representation the caller asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentData {
    /// Raw bytes.
    Binary(Vec<u8>),
    /// Standard base64.
    Base64(String),
}

impl Database {
    /// Reads a document.
    ///
    /// Returns the winning revision's body unless `opts.rev` names another
    /// stored revision. A document whose winner is a deletion reads as
    /// [`CoreError::Missing`] with the `deleted` reason, unless an
    /// explicit revision was requested.
    pub fn get(&self, id: &str, opts: &GetOptions) -> CoreResult<Value> {
        self.ensure_open()?;
        if is_local_id(id) {
            return self.get_local(id);
        }
        let _guard = self.inner.queue.read();

        let metadata = self
            .load_metadata(id)?
            .ok_or_else(CoreError::missing)?;
        let winner = metadata
            .winning()
            .ok_or_else(CoreError::missing)?;

        let rev = match &opts.rev {
            Some(requested) => requested.parse::<Rev>().map_err(CoreError::from)?,
            None => {
                if metadata.is_deleted() {
                    return Err(CoreError::deleted());
                }
                winner
            }
        };

        let rev_str = rev.to_string();
        let seq = *metadata
            .rev_map
            .get(&rev_str)
            .ok_or_else(CoreError::missing)?;
        let mut body = self.load_body(seq)?.ok_or_else(CoreError::missing)?;

        // A stored body that disagrees with its metadata is an engine bug
        // or on-disk damage, not a caller error.
        if let Some(stored_id) = body.get("_id").and_then(Value::as_str) {
            if stored_id != id {
                return Err(CoreError::corruption(format!(
                    "body at seq {seq} carries id {stored_id:?}, expected {id:?}"
                )));
            }
        }
        if let Some(stored_rev) = body.get("_rev").and_then(Value::as_str) {
            if stored_rev != rev_str {
                return Err(CoreError::corruption(format!(
                    "body at seq {seq} carries rev {stored_rev:?}, expected {rev_str:?}"
                )));
            }
        }
        body.insert("_id".into(), Value::String(id.to_string()));
        body.insert("_rev".into(), Value::String(rev_str));

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
        Ok(Value::Object(body))
    }

    /// Reads raw attachment bytes by digest.
    ///
    /// An absent binary row reads as an empty body, which is the stored
    /// form of zero-length attachments.
    pub fn get_attachment(&self, digest: &str, binary: bool) -> CoreResult<AttachmentData> {
        self.ensure_open()?;
        let _guard = self.inner.queue.read();
        let bytes = self
            .inner
            .backend
            .get(&Namespace::Binary.key(digest.as_bytes()))?
            .unwrap_or_default();
        Ok(if binary {
            AttachmentData::Binary(bytes)
        } else {
            AttachmentData::Base64(STANDARD.encode(bytes))
        })
    }

    /// Returns a document's raw revision tree.
    pub fn get_revision_tree(&self, id: &str) -> CoreResult<RevTree> {
        self.ensure_open()?;
        let _guard = self.inner.queue.read();
        let metadata = self
            .load_metadata(id)?
            .ok_or_else(CoreError::missing)?;
        Ok(metadata.rev_tree)
    }

    pub(crate) fn load_metadata(&self, id: &str) -> CoreResult<Option<DocMetadata>> {
        match self
            .inner
            .backend
            .get(&Namespace::Docs.key(id.as_bytes()))?
        {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn load_body(&self, seq: u64) -> CoreResult<Option<Map<String, Value>>> {
        match self
            .inner
            .backend
            .get(&Namespace::BySeq.key(seq_key(seq).as_bytes()))?
        {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Replaces attachment stubs with inline base64 bodies.
    pub(crate) fn hydrate_attachments(&self, body: &mut Map<String, Value>) -> CoreResult<()> {
        let Some(Value::Object(atts)) = body.get_mut("_attachments") else {
            return Ok(());
        };
        for att in atts.values_mut() {
            let Value::Object(obj) = att else { continue };
            let Some(digest) = obj.get("digest").and_then(Value::as_str).map(str::to_string)
            else {
                continue;
            };
            let bytes = self
                .inner
                .backend
                .get(&Namespace::Binary.key(digest.as_bytes()))?
                .unwrap_or_default();
            obj.insert("data".into(), Value::String(STANDARD.encode(bytes)));
            obj.remove("stub");
        }
        Ok(())
    }
}

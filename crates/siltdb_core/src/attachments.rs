//! Content-addressed attachment storage.
//!
//! Binaries are keyed by `md5-<base64>` digests. Each attachment row
//! carries a set of `"<docid>@<rev>"` back-references; the binary row
//! exists while any reference remains and the body is non-empty.

use crate::error::{CoreError, CoreResult};
use crate::namespace::Namespace;
use crate::transaction::ScopedTransaction;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Prefix of every attachment digest.
pub const DIGEST_PREFIX: &str = "md5-";

/// Computes the content digest of attachment bytes.
#[must_use]
pub fn digest(bytes: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    format!("{DIGEST_PREFIX}{}", STANDARD.encode(hasher.finalize()))
}

/// Builds the `"<docid>@<rev>"` back-reference key.
#[must_use]
pub fn ref_key(id: &str, rev: &str) -> String {
    format!("{id}@{rev}")
}

/// One row of the attachment store.
///
/// Rows written by old engine versions may lack `refs` entirely; those
/// are retained indefinitely and never back-filled, since attributing
/// them would require a full-store scan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttachRow {
    /// Back-references from revisions to this digest.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refs: Option<BTreeMap<String, bool>>,
}

/// An attachment pulled out of a document body and normalized for the
/// write pipeline.
#[derive(Debug, Clone)]
pub struct ProcessedAttachment {
    /// Whether the input was a stub (no inline body).
    pub stub: bool,
    /// Declared content type, if any.
    pub content_type: Option<String>,
    /// Content digest.
    pub digest: String,
    /// Body length in bytes.
    pub length: u64,
    /// Decoded body bytes; `None` for stubs.
    pub bytes: Option<Vec<u8>>,
}

/// Extracts and normalizes `_attachments` from a parsed body.
///
/// Inline bodies are base64-decoded and hashed; stubs keep their declared
/// digest for later verification against the attachment store.
///
/// # Errors
///
/// Returns [`CoreError::BadArgument`] for non-object attachments, inline
/// bodies that are not valid base64 strings, or stubs without a digest.
pub fn preprocess(
    data: &mut Map<String, Value>,
) -> CoreResult<BTreeMap<String, ProcessedAttachment>> {
    let mut out = BTreeMap::new();
    let Some(raw) = data.remove("_attachments") else {
        return Ok(out);
    };
    let Value::Object(entries) = raw else {
        return Err(CoreError::bad_argument("_attachments must be an object"));
    };

    for (name, entry) in entries {
        let Value::Object(att) = entry else {
            return Err(CoreError::bad_argument(format!(
                "attachment {name:?} must be an object"
            )));
        };
        let content_type = att
            .get("content_type")
            .and_then(Value::as_str)
            .map(str::to_string);

        if matches!(att.get("stub"), Some(Value::Bool(true))) {
            let declared = att.get("digest").and_then(Value::as_str).ok_or_else(|| {
                CoreError::bad_argument(format!("stub attachment {name:?} lacks a digest"))
            })?;
            let length = att.get("length").and_then(Value::as_u64).unwrap_or(0);
            out.insert(
                name,
                ProcessedAttachment {
                    stub: true,
                    content_type,
                    digest: declared.to_string(),
                    length,
                    bytes: None,
                },
            );
            continue;
        }

        let bytes = match att.get("data") {
            Some(Value::String(encoded)) => STANDARD.decode(encoded).map_err(|_| {
                CoreError::bad_argument(format!(
                    "attachment {name:?} data is not valid base64"
                ))
            })?,
            _ => {
                return Err(CoreError::bad_argument(format!(
                    "attachment {name:?} lacks inline data"
                )))
            }
        };
        let computed = digest(&bytes);
        out.insert(
            name,
            ProcessedAttachment {
                stub: false,
                content_type,
                digest: computed,
                length: bytes.len() as u64,
                bytes: Some(bytes),
            },
        );
    }
    Ok(out)
}

/// The stub form stored inside a document body.
#[must_use]
pub fn stub_value(att: &ProcessedAttachment) -> Value {
    let mut obj = Map::new();
    obj.insert("stub".into(), Value::Bool(true));
    if let Some(content_type) = &att.content_type {
        obj.insert("content_type".into(), Value::String(content_type.clone()));
    }
    obj.insert("digest".into(), Value::String(att.digest.clone()));
    obj.insert("length".into(), Value::Number(att.length.into()));
    Value::Object(obj)
}

/// Adds a `"<docid>@<rev>"` reference for one attachment, creating the
/// row when absent. Returns whether the digest was newly introduced,
/// which is when the caller must also write the binary row.
///
/// Rows without `refs` are legacy and left untouched. Within one bulk
/// write the pipeline runs digests in series, so the fetch-update-buffer
/// sequence here never interleaves for one digest.
pub fn save_ref(
    txn: &mut ScopedTransaction,
    att: &ProcessedAttachment,
    id: &str,
    rev: &str,
) -> CoreResult<bool> {
    let key = att.digest.as_bytes();
    match txn.get_json::<AttachRow>(Namespace::Attach, key)? {
        None => {
            let mut refs = BTreeMap::new();
            refs.insert(ref_key(id, rev), true);
            txn.put_json(Namespace::Attach, key, &AttachRow { refs: Some(refs) })?;
            Ok(true)
        }
        Some(mut row) => {
            if let Some(refs) = &mut row.refs {
                refs.insert(ref_key(id, rev), true);
                txn.put_json(Namespace::Attach, key, &row)?;
            }
            Ok(false)
        }
    }
}

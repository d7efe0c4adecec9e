//! Splitting a user document into body and revision bookkeeping.

use crate::error::{TreeError, TreeResult};
use crate::rev::Rev;
use crate::tree::{FragmentNode, PathFragment};
use md5::{Digest, Md5};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Reserved top-level fields stripped from the stored body.
const STRIPPED_FIELDS: &[&str] = &["_rev", "_revisions", "_deleted", "_rev_tree"];

/// A user document split into its stored body and the revision path the
/// edit contributes to the tree.
#[derive(Debug, Clone)]
pub struct ParsedDoc {
    /// Document id (generated when the input carried none).
    pub id: String,
    /// Revision id of this edit.
    pub rev: Rev,
    /// Whether this edit is a deletion.
    pub deleted: bool,
    /// Body fields to store, reserved fields removed, `_id` retained.
    pub data: Map<String, Value>,
    /// The edit path to merge into the revision tree.
    pub fragment: PathFragment,
    /// Whether the input named a parent revision.
    pub has_parent: bool,
}

/// Parses one document for a bulk write.
///
/// With `new_edits` the engine assigns the next revision: generation is
/// the parent's plus one and the hash is an MD5 over the parent revision
/// and the body, which makes identical edits produce identical revisions.
/// Without `new_edits` the caller supplies the revision history through
/// `_revisions` (or a bare `_rev`).
///
/// # Errors
///
/// Returns [`TreeError::BadDoc`], [`TreeError::BadId`], or
/// [`TreeError::BadRevision`] for malformed input.
pub fn parse_doc(value: Value, new_edits: bool) -> TreeResult<ParsedDoc> {
    let Value::Object(mut fields) = value else {
        return Err(TreeError::bad_doc("document is not a JSON object"));
    };

    let id = match fields.get("_id") {
        None => {
            let generated = Uuid::new_v4().simple().to_string();
            fields.insert("_id".into(), Value::String(generated.clone()));
            generated
        }
        Some(Value::String(id)) => {
            validate_id(id)?;
            id.clone()
        }
        Some(_) => return Err(TreeError::bad_id("_id must be a string")),
    };

    let deleted = matches!(fields.get("_deleted"), Some(Value::Bool(true)));
    let supplied_rev = match fields.get("_rev") {
        None => None,
        Some(Value::String(rev)) => Some(rev.parse::<Rev>()?),
        Some(_) => return Err(TreeError::bad_revision("_rev must be a string")),
    };
    let revisions = fields.get("_revisions").cloned();

    let mut data = Map::new();
    for (key, value) in fields {
        if !STRIPPED_FIELDS.contains(&key.as_str()) {
            data.insert(key, value);
        }
    }

    if new_edits {
        let gen = supplied_rev.as_ref().map_or(1, |r| r.gen + 1);
        let hash = edit_hash(supplied_rev.as_ref(), &data, deleted);
        let rev = Rev::new(gen, hash);
        let fragment = match &supplied_rev {
            Some(parent) => PathFragment {
                start: parent.gen,
                nodes: vec![
                    FragmentNode::missing(parent.hash.clone()),
                    FragmentNode::available(rev.hash.clone(), deleted),
                ],
            },
            None => PathFragment {
                start: 1,
                nodes: vec![FragmentNode::available(rev.hash.clone(), deleted)],
            },
        };
        return Ok(ParsedDoc {
            id,
            rev,
            deleted,
            data,
            fragment,
            has_parent: supplied_rev.is_some(),
        });
    }

    // new_edits false: the caller owns revision history.
    if let Some(revisions) = revisions {
        let fragment = fragment_from_revisions(&revisions, deleted)?;
        let rev = fragment.leaf_rev();
        if let Some(supplied) = &supplied_rev {
            if *supplied != rev {
                return Err(TreeError::bad_revision(supplied.to_string()));
            }
        }
        let has_parent = fragment.nodes.len() > 1;
        return Ok(ParsedDoc {
            id,
            rev,
            deleted,
            data,
            fragment,
            has_parent,
        });
    }

    let rev = supplied_rev
        .ok_or_else(|| TreeError::bad_doc("new_edits=false requires _rev or _revisions"))?;
    let fragment = PathFragment {
        start: rev.gen,
        nodes: vec![FragmentNode::available(rev.hash.clone(), deleted)],
    };
    Ok(ParsedDoc {
        id,
        rev,
        deleted,
        data,
        fragment,
        has_parent: false,
    })
}

fn validate_id(id: &str) -> TreeResult<()> {
    if id.is_empty() {
        return Err(TreeError::bad_id("_id must not be empty"));
    }
    if id.starts_with('_') && !id.starts_with("_design/") && !id.starts_with("_local/") {
        return Err(TreeError::bad_id(format!("reserved id prefix: {id:?}")));
    }
    Ok(())
}

/// Deterministic hash for an engine-assigned revision: MD5 over the parent
/// revision, the deletion flag, and the body with top-level keys sorted.
fn edit_hash(parent: Option<&Rev>, data: &Map<String, Value>, deleted: bool) -> String {
    let sorted: BTreeMap<&str, &Value> = data.iter().map(|(k, v)| (k.as_str(), v)).collect();
    let body = serde_json::to_string(&sorted).unwrap_or_default();

    let mut hasher = Md5::new();
    if let Some(parent) = parent {
        hasher.update(parent.to_string().as_bytes());
    }
    hasher.update([u8::from(deleted)]);
    hasher.update(body.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Builds the edit path from a `_revisions` object:
/// `{start: N, ids: [newest, parent, ...]}`.
fn fragment_from_revisions(revisions: &Value, deleted: bool) -> TreeResult<PathFragment> {
    let obj = revisions
        .as_object()
        .ok_or_else(|| TreeError::bad_doc("_revisions must be an object"))?;
    let start = obj
        .get("start")
        .and_then(Value::as_u64)
        .ok_or_else(|| TreeError::bad_doc("_revisions.start must be a positive integer"))?;
    let ids = obj
        .get("ids")
        .and_then(Value::as_array)
        .ok_or_else(|| TreeError::bad_doc("_revisions.ids must be an array"))?;
    if ids.is_empty() || start < ids.len() as u64 {
        return Err(TreeError::bad_doc("_revisions does not describe a path"));
    }

    let mut hashes = Vec::with_capacity(ids.len());
    for id in ids {
        let hash = id
            .as_str()
            .ok_or_else(|| TreeError::bad_doc("_revisions.ids entries must be strings"))?;
        hashes.push(hash.to_string());
    }
    // ids run newest-first; the fragment runs oldest-first.
    hashes.reverse();

    let last = hashes.len() - 1;
    let nodes = hashes
        .into_iter()
        .enumerate()
        .map(|(i, hash)| {
            if i == last {
                FragmentNode::available(hash, deleted)
            } else {
                FragmentNode::missing(hash)
            }
        })
        .collect();
    Ok(PathFragment {
        start: start - last as u64,
        nodes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_edit_gets_generation_one() {
        let parsed = parse_doc(json!({"_id": "a", "x": 1}), true).unwrap();
        assert_eq!(parsed.id, "a");
        assert_eq!(parsed.rev.gen, 1);
        assert_eq!(parsed.rev.hash.len(), 32);
        assert!(!parsed.deleted);
        assert!(!parsed.has_parent);
        assert_eq!(parsed.data.get("x"), Some(&json!(1)));
        assert!(parsed.data.contains_key("_id"));
        assert!(!parsed.data.contains_key("_rev"));
    }

    #[test]
    fn identical_edits_hash_identically() {
        let a = parse_doc(json!({"_id": "a", "x": 1}), true).unwrap();
        let b = parse_doc(json!({"_id": "a", "x": 1}), true).unwrap();
        assert_eq!(a.rev, b.rev);
        let c = parse_doc(json!({"_id": "a", "x": 2}), true).unwrap();
        assert_ne!(a.rev, c.rev);
    }

    #[test]
    fn update_extends_parent() {
        let first = parse_doc(json!({"_id": "a", "x": 1}), true).unwrap();
        let doc = json!({"_id": "a", "_rev": first.rev.to_string(), "x": 2});
        let second = parse_doc(doc, true).unwrap();
        assert_eq!(second.rev.gen, 2);
        assert!(second.has_parent);
        assert_eq!(second.fragment.start, 1);
        assert_eq!(second.fragment.nodes.len(), 2);
        assert_eq!(second.fragment.nodes[0].hash, first.rev.hash);
    }

    #[test]
    fn missing_id_is_generated() {
        let parsed = parse_doc(json!({"x": 1}), true).unwrap();
        assert!(!parsed.id.is_empty());
        assert_eq!(
            parsed.data.get("_id"),
            Some(&Value::String(parsed.id.clone()))
        );
    }

    #[test]
    fn reserved_id_rejected() {
        let err = parse_doc(json!({"_id": "_bad", "x": 1}), true).unwrap_err();
        assert!(matches!(err, TreeError::BadId { .. }));
        assert!(parse_doc(json!({"_id": "_design/ok"}), true).is_ok());
    }

    #[test]
    fn non_string_id_rejected() {
        let err = parse_doc(json!({"_id": 7}), true).unwrap_err();
        assert!(matches!(err, TreeError::BadId { .. }));
    }

    #[test]
    fn explicit_revisions_build_the_path() {
        let doc = json!({
            "_id": "a",
            "_rev": "3-ccc",
            "_revisions": {"start": 3, "ids": ["ccc", "bbb", "aaa"]},
            "x": 1,
        });
        let parsed = parse_doc(doc, false).unwrap();
        assert_eq!(parsed.rev, Rev::new(3, "ccc"));
        assert_eq!(parsed.fragment.start, 1);
        let hashes: Vec<_> = parsed
            .fragment
            .nodes
            .iter()
            .map(|n| n.hash.as_str())
            .collect();
        assert_eq!(hashes, vec!["aaa", "bbb", "ccc"]);
    }

    #[test]
    fn new_edits_false_requires_a_rev() {
        let err = parse_doc(json!({"_id": "a", "x": 1}), false).unwrap_err();
        assert!(matches!(err, TreeError::BadDoc { .. }));
    }

    #[test]
    fn deleted_flag_is_captured() {
        let first = parse_doc(json!({"_id": "a", "x": 1}), true).unwrap();
        let doc = json!({"_id": "a", "_rev": first.rev.to_string(), "_deleted": true});
        let parsed = parse_doc(doc, true).unwrap();
        assert!(parsed.deleted);
        assert!(parsed.fragment.nodes.last().unwrap().deleted);
        assert!(!parsed.data.contains_key("_deleted"));
    }
}

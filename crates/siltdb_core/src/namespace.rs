//! The six logical namespaces partitioning one backend database.
//!
//! Each namespace is a fixed key prefix. Prefixes end in `!`, which sorts
//! below every printable suffix byte, so a prefix plus its incremented
//! last byte bounds the namespace for range scans.

use siltdb_storage::ScanOptions;

/// Reserved meta key: latest update sequence.
pub const META_UPDATE_SEQ: &str = "_local_last_update_seq";
/// Reserved meta key: count of live documents.
pub const META_DOC_COUNT: &str = "_local_doc_count";
/// Reserved meta key: instance UUID, created at first open.
pub const META_UUID: &str = "_local_uuid";

/// Id prefix routing a document to the local store.
pub const LOCAL_PREFIX: &str = "_local/";

/// A logical namespace over the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Document metadata by id.
    Docs,
    /// Stored bodies by zero-padded update sequence.
    BySeq,
    /// Attachment reference maps by digest.
    Attach,
    /// Raw attachment bytes by digest.
    Binary,
    /// Local (non-replicated) documents by id.
    Local,
    /// Fixed scalar metadata.
    Meta,
}

impl Namespace {
    /// The namespace's fixed key prefix.
    #[must_use]
    pub const fn prefix(self) -> &'static [u8] {
        match self {
            Namespace::Docs => b"doc!",
            Namespace::BySeq => b"seq!",
            Namespace::Attach => b"att!",
            Namespace::Binary => b"bin!",
            Namespace::Local => b"loc!",
            Namespace::Meta => b"met!",
        }
    }

    /// Builds the full backend key for `suffix`.
    #[must_use]
    pub fn key(self, suffix: &[u8]) -> Vec<u8> {
        let prefix = self.prefix();
        let mut key = Vec::with_capacity(prefix.len() + suffix.len());
        key.extend_from_slice(prefix);
        key.extend_from_slice(suffix);
        key
    }

    /// The smallest key sorting above every key in this namespace.
    #[must_use]
    pub fn upper_bound(self) -> Vec<u8> {
        let mut bound = self.prefix().to_vec();
        let last = bound.last_mut().expect("prefix is non-empty");
        *last += 1;
        bound
    }

    /// Strips this namespace's prefix from a full key.
    #[must_use]
    pub fn strip(self, full_key: &[u8]) -> Option<&[u8]> {
        full_key.strip_prefix(self.prefix())
    }

    /// Scan options bounded to this namespace, with optional inclusive
    /// suffix bounds.
    #[must_use]
    pub fn scan(self, gte: Option<&[u8]>, lte: Option<&[u8]>) -> ScanOptions {
        ScanOptions {
            gte: Some(match gte {
                Some(suffix) => self.key(suffix),
                None => self.prefix().to_vec(),
            }),
            lte: Some(match lte {
                Some(suffix) => self.key(suffix),
                None => self.upper_bound(),
            }),
            ..ScanOptions::default()
        }
    }
}

/// Formats an update sequence as its fixed-width by-seq key.
///
/// Sixteen zero-padded decimal digits make lexicographic key order equal
/// numeric sequence order.
#[must_use]
pub fn seq_key(seq: u64) -> String {
    format!("{seq:016}")
}

/// Parses a by-seq key suffix back to its sequence number.
#[must_use]
pub fn parse_seq(suffix: &[u8]) -> Option<u64> {
    std::str::from_utf8(suffix).ok()?.parse().ok()
}

/// Returns whether an id routes to the local store.
#[must_use]
pub fn is_local_id(id: &str) -> bool {
    id.starts_with(LOCAL_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_building_and_stripping() {
        let key = Namespace::Docs.key(b"mydoc");
        assert_eq!(key, b"doc!mydoc");
        assert_eq!(Namespace::Docs.strip(&key), Some(&b"mydoc"[..]));
        assert_eq!(Namespace::BySeq.strip(&key), None);
    }

    #[test]
    fn upper_bound_covers_namespace() {
        let bound = Namespace::Docs.upper_bound();
        assert_eq!(bound, b"doc\"");
        assert!(Namespace::Docs.key(b"\xff\xff") < bound);
    }

    #[test]
    fn seq_keys_sort_numerically() {
        assert_eq!(seq_key(1), "0000000000000001");
        assert_eq!(seq_key(42), "0000000000000042");
        assert!(seq_key(9) < seq_key(10));
        assert!(seq_key(99) < seq_key(100));
        assert_eq!(parse_seq(seq_key(7).as_bytes()), Some(7));
    }

    #[test]
    fn local_id_discrimination() {
        assert!(is_local_id("_local/session"));
        assert!(!is_local_id("_design/x"));
        assert!(!is_local_id("plain"));
    }
}

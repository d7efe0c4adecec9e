//! Revision identifiers.

use crate::error::{TreeError, TreeResult};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A revision identifier: `<generation>-<hash>`.
///
/// The generation counts edits along one branch of the revision tree; the
/// hash names the edit. Revisions order by generation first and hash
/// second, which is the deterministic tiebreak used for winner selection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Rev {
    /// Edit depth along the branch, starting at 1.
    pub gen: u64,
    /// Opaque hash naming the edit.
    pub hash: String,
}

impl Rev {
    /// Creates a revision from its parts.
    #[must_use]
    pub fn new(gen: u64, hash: impl Into<String>) -> Self {
        Self {
            gen,
            hash: hash.into(),
        }
    }
}

impl FromStr for Rev {
    type Err = TreeError;

    fn from_str(s: &str) -> TreeResult<Self> {
        let (gen, hash) = s
            .split_once('-')
            .ok_or_else(|| TreeError::bad_revision(s))?;
        let gen: u64 = gen.parse().map_err(|_| TreeError::bad_revision(s))?;
        if gen == 0 && !hash.chars().all(|c| c.is_ascii_digit()) {
            return Err(TreeError::bad_revision(s));
        }
        if hash.is_empty() {
            return Err(TreeError::bad_revision(s));
        }
        Ok(Self::new(gen, hash))
    }
}

impl fmt::Display for Rev {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.gen, self.hash)
    }
}

impl PartialOrd for Rev {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Rev {
    fn cmp(&self, other: &Self) -> Ordering {
        self.gen
            .cmp(&other.gen)
            .then_with(|| self.hash.cmp(&other.hash))
    }
}

impl Serialize for Rev {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Rev {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_roundtrip() {
        let rev: Rev = "3-abc123".parse().unwrap();
        assert_eq!(rev.gen, 3);
        assert_eq!(rev.hash, "abc123");
        assert_eq!(rev.to_string(), "3-abc123");
    }

    #[test]
    fn rejects_malformed() {
        assert!("".parse::<Rev>().is_err());
        assert!("3".parse::<Rev>().is_err());
        assert!("x-abc".parse::<Rev>().is_err());
        assert!("3-".parse::<Rev>().is_err());
    }

    #[test]
    fn orders_by_generation_then_hash() {
        let a: Rev = "2-zzz".parse().unwrap();
        let b: Rev = "3-aaa".parse().unwrap();
        let c: Rev = "3-bbb".parse().unwrap();
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn serde_as_string() {
        let rev = Rev::new(1, "deadbeef");
        let json = serde_json::to_string(&rev).unwrap();
        assert_eq!(json, "\"1-deadbeef\"");
        let back: Rev = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rev);
    }
}

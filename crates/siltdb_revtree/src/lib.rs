//! # siltdb revision trees
//!
//! Pure revision-tree library for siltdb.
//!
//! This crate provides:
//! - [`Rev`]: `<generation>-<hash>` revision identifiers
//! - [`RevTree`]: the per-document revision forest with merge, winner
//!   selection, conflict collection, and compaction marking
//! - [`parse_doc`]: splitting a user document into body and edit path
//! - [`process_docs`]: the input-order revision merge behind bulk writes
//! - [`DocMetadata`]: the bookkeeping row stored per document
//!
//! Everything here is pure: no I/O, no locking. The storage engine calls
//! in with plain values and owns all persistence.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod parse;
mod process;
mod rev;
mod tree;

pub use error::{TreeError, TreeResult};
pub use parse::{parse_doc, ParsedDoc};
pub use process::{process_docs, DocMetadata, DocOutcome, MergeDecision};
pub use rev::Rev;
pub use tree::{
    FragmentNode, Leaf, MergeOutcome, MergeResult, PathFragment, RevNode, RevStatus, RevTree,
    RootedPath,
};

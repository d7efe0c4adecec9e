//! Revision trees.
//!
//! A document's history is a forest of rooted revision paths. Each branch
//! starts at some generation (roots below generation 1 have been stemmed
//! away) and fans out where concurrent edits created siblings. The tree
//! only records hashes, availability, and deletion flags; bodies live in
//! the sequence store keyed through the metadata's rev map.

use crate::rev::Rev;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Availability of one revision's body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevStatus {
    /// The body is stored and readable.
    Available,
    /// The body has been compacted away; only the tree position remains.
    Missing,
}

/// One revision node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevNode {
    /// Hash part of the revision id.
    pub hash: String,
    /// Body availability.
    pub status: RevStatus,
    /// Whether this revision is a deletion.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
    /// Child revisions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<RevNode>,
}

impl RevNode {
    fn from_fragment(node: &FragmentNode) -> Self {
        Self {
            hash: node.hash.clone(),
            status: node.status,
            deleted: node.deleted,
            children: Vec::new(),
        }
    }
}

/// A rooted branch of the forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootedPath {
    /// Generation of the root node.
    pub start: u64,
    /// Root node of the branch.
    pub node: RevNode,
}

/// One node of a linear edit path handed to [`RevTree::merge`].
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentNode {
    /// Hash part of the revision id.
    pub hash: String,
    /// Availability to record if the node is newly created.
    pub status: RevStatus,
    /// Deletion flag to record if the node is newly created.
    pub deleted: bool,
}

impl FragmentNode {
    /// A placeholder ancestor: present in the path but without a body.
    #[must_use]
    pub fn missing(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            status: RevStatus::Missing,
            deleted: false,
        }
    }

    /// The edit itself: available, possibly a deletion.
    #[must_use]
    pub fn available(hash: impl Into<String>, deleted: bool) -> Self {
        Self {
            hash: hash.into(),
            status: RevStatus::Available,
            deleted,
        }
    }
}

/// A linear root-to-leaf edit path.
#[derive(Debug, Clone, PartialEq)]
pub struct PathFragment {
    /// Generation of the first node in `nodes`.
    pub start: u64,
    /// Nodes ordered oldest to newest; the last node is the edit.
    pub nodes: Vec<FragmentNode>,
}

impl PathFragment {
    /// Revision id of the fragment's newest node.
    #[must_use]
    pub fn leaf_rev(&self) -> Rev {
        let last = self.nodes.last().expect("fragment is never empty");
        Rev::new(self.start + self.nodes.len() as u64 - 1, last.hash.clone())
    }
}

/// How a merge changed the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The edit extended an existing leaf.
    NewLeaf,
    /// The edit created a new branch (a sibling or a new root).
    NewBranch,
    /// Every revision in the path was already present.
    Existing,
}

/// Result of a merge: the structural outcome plus any revisions stemmed
/// off the root to honor the depth limit.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeResult {
    /// Structural outcome.
    pub outcome: MergeOutcome,
    /// Revisions removed from the root by stemming.
    pub stemmed: Vec<Rev>,
}

/// A leaf revision with its flags.
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    /// The leaf's revision id.
    pub rev: Rev,
    /// Whether the leaf is a deletion.
    pub deleted: bool,
    /// Body availability.
    pub status: RevStatus,
}

/// A document's revision forest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RevTree {
    /// Branches of the forest.
    pub branches: Vec<RootedPath>,
}

impl RevTree {
    /// Creates an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether the tree has no revisions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    /// Merges a linear edit path into the forest.
    ///
    /// The fragment is grafted onto the first branch containing its oldest
    /// node; a fragment with no graft point becomes a new branch. After
    /// grafting, branches deeper than `limit` are stemmed from the root
    /// while the root chain is linear, and the stemmed revisions are
    /// reported so the caller can drop their bookkeeping.
    pub fn merge(&mut self, fragment: &PathFragment, limit: usize) -> MergeResult {
        let mut outcome = None;

        for branch in &mut self.branches {
            if let Some(o) = graft(branch, fragment) {
                outcome = Some(o);
                break;
            }
        }

        let outcome = outcome.unwrap_or_else(|| {
            self.branches.push(build_branch(fragment));
            MergeOutcome::NewBranch
        });

        let stemmed = self.stem(limit);
        MergeResult { outcome, stemmed }
    }

    /// Drops linear root prefixes so no branch exceeds `limit` revisions
    /// of depth. Returns the dropped revisions.
    fn stem(&mut self, limit: usize) -> Vec<Rev> {
        let mut stemmed = Vec::new();
        if limit == 0 {
            return stemmed;
        }
        for branch in &mut self.branches {
            loop {
                let depth = deepest_leaf_gen(branch.start, &branch.node) - branch.start + 1;
                if depth as usize <= limit || branch.node.children.len() != 1 {
                    break;
                }
                let child = branch.node.children.pop().expect("one child");
                stemmed.push(Rev::new(branch.start, branch.node.hash.clone()));
                branch.node = child;
                branch.start += 1;
            }
        }
        stemmed
    }

    /// Returns every leaf revision.
    #[must_use]
    pub fn leaves(&self) -> Vec<Leaf> {
        let mut out = Vec::new();
        self.walk(|gen, node| {
            if node.children.is_empty() {
                out.push(Leaf {
                    rev: Rev::new(gen, node.hash.clone()),
                    deleted: node.deleted,
                    status: node.status,
                });
            }
        });
        out
    }

    /// Deterministic winner: the deepest non-deleted leaf, hash as the
    /// tiebreak; when every leaf is deleted, the deepest deleted leaf.
    #[must_use]
    pub fn winning_rev(&self) -> Option<Rev> {
        let leaves = self.leaves();
        let live = leaves
            .iter()
            .filter(|l| !l.deleted)
            .max_by(|a, b| a.rev.cmp(&b.rev));
        if let Some(winner) = live {
            return Some(winner.rev.clone());
        }
        leaves
            .iter()
            .max_by(|a, b| a.rev.cmp(&b.rev))
            .map(|l| l.rev.clone())
    }

    /// Returns whether the winning revision is a deletion.
    #[must_use]
    pub fn winner_is_deleted(&self) -> bool {
        let Some(winner) = self.winning_rev() else {
            return false;
        };
        self.leaves()
            .iter()
            .find(|l| l.rev == winner)
            .is_some_and(|l| l.deleted)
    }

    /// Non-winning leaves that are available and not deleted; what `get`
    /// reports under `_conflicts`.
    #[must_use]
    pub fn collect_conflicts(&self) -> Vec<Rev> {
        let winner = self.winning_rev();
        let mut revs: Vec<Rev> = self
            .leaves()
            .into_iter()
            .filter(|l| {
                !l.deleted && l.status == RevStatus::Available && Some(&l.rev) != winner.as_ref()
            })
            .map(|l| l.rev)
            .collect();
        revs.sort_by(|a, b| b.cmp(a));
        revs
    }

    /// Available non-leaf revisions: the set compaction may reclaim.
    #[must_use]
    pub fn compactable_revs(&self) -> Vec<Rev> {
        let mut out = Vec::new();
        self.walk(|gen, node| {
            if !node.children.is_empty() && node.status == RevStatus::Available {
                out.push(Rev::new(gen, node.hash.clone()));
            }
        });
        out
    }

    /// Marks the given revisions as missing, leaving tree structure intact.
    pub fn mark_missing(&mut self, revs: &[Rev]) {
        let targets: HashSet<(u64, &str)> =
            revs.iter().map(|r| (r.gen, r.hash.as_str())).collect();
        for branch in &mut self.branches {
            mark_node(branch.start, &mut branch.node, &targets);
        }
    }

    /// Returns whether a revision is present in the tree.
    #[must_use]
    pub fn contains(&self, rev: &Rev) -> bool {
        let mut found = false;
        self.walk(|gen, node| {
            if gen == rev.gen && node.hash == rev.hash {
                found = true;
            }
        });
        found
    }

    /// Depth-first walk over every node with its generation.
    fn walk<F: FnMut(u64, &RevNode)>(&self, mut f: F) {
        for branch in &self.branches {
            walk_node(branch.start, &branch.node, &mut f);
        }
    }
}

fn walk_node<F: FnMut(u64, &RevNode)>(gen: u64, node: &RevNode, f: &mut F) {
    f(gen, node);
    for child in &node.children {
        walk_node(gen + 1, child, f);
    }
}

fn mark_node(gen: u64, node: &mut RevNode, targets: &HashSet<(u64, &str)>) {
    if targets.contains(&(gen, node.hash.as_str())) {
        node.status = RevStatus::Missing;
    }
    for child in &mut node.children {
        mark_node(gen + 1, child, targets);
    }
}

fn deepest_leaf_gen(gen: u64, node: &RevNode) -> u64 {
    node.children
        .iter()
        .map(|c| deepest_leaf_gen(gen + 1, c))
        .max()
        .unwrap_or(gen)
}

fn build_branch(fragment: &PathFragment) -> RootedPath {
    let mut nodes = fragment.nodes.iter().rev();
    let mut node = RevNode::from_fragment(nodes.next().expect("fragment is never empty"));
    for parent in nodes {
        let mut p = RevNode::from_fragment(parent);
        p.children.push(node);
        node = p;
    }
    RootedPath {
        start: fragment.start,
        node,
    }
}

fn find_node_mut<'a>(
    gen: u64,
    node: &'a mut RevNode,
    target_gen: u64,
    target_hash: &str,
) -> Option<&'a mut RevNode> {
    if gen == target_gen {
        if node.hash == target_hash {
            return Some(node);
        }
        return None;
    }
    if gen > target_gen {
        return None;
    }
    for child in &mut node.children {
        if let Some(found) = find_node_mut(gen + 1, child, target_gen, target_hash) {
            return Some(found);
        }
    }
    None
}

/// Grafts `fragment` onto `branch` if the fragment's oldest node occurs in
/// it (or the fragment reaches above the branch root and contains it).
/// Returns `None` when the branch has no graft point.
fn graft(branch: &mut RootedPath, fragment: &PathFragment) -> Option<MergeOutcome> {
    if fragment.start >= branch.start {
        let first = &fragment.nodes[0];
        let anchor = find_node_mut(branch.start, &mut branch.node, fragment.start, &first.hash)?;
        if first.status == RevStatus::Available {
            anchor.status = RevStatus::Available;
        }
        return Some(extend(anchor, &fragment.nodes[1..]));
    }

    // The fragment starts above the branch root: it grafts only when it
    // contains the root at the right depth, in which case the fragment's
    // older prefix becomes the new root chain.
    let offset = (branch.start - fragment.start) as usize;
    if offset >= fragment.nodes.len() || fragment.nodes[offset].hash != branch.node.hash {
        return None;
    }
    let old_root = std::mem::replace(
        &mut branch.node,
        RevNode::from_fragment(&fragment.nodes[0]),
    );
    branch.start = fragment.start;
    let mut cur = &mut branch.node;
    for fnode in &fragment.nodes[1..offset] {
        cur.children.push(RevNode::from_fragment(fnode));
        cur = cur.children.last_mut().expect("just pushed");
    }
    cur.children.push(old_root);
    let anchor = cur.children.last_mut().expect("just pushed");
    if fragment.nodes[offset].status == RevStatus::Available {
        anchor.status = RevStatus::Available;
    }
    Some(extend(anchor, &fragment.nodes[offset + 1..]))
}

/// Walks `rest` down from `anchor`, reusing existing children and creating
/// the missing tail.
fn extend(anchor: &mut RevNode, rest: &[FragmentNode]) -> MergeOutcome {
    let mut cur = anchor;
    let mut outcome = MergeOutcome::Existing;
    for fnode in rest {
        let existing = cur.children.iter().position(|c| c.hash == fnode.hash);
        match existing {
            Some(idx) => {
                cur = &mut cur.children[idx];
                if fnode.status == RevStatus::Available {
                    cur.status = RevStatus::Available;
                }
            }
            None => {
                if outcome == MergeOutcome::Existing {
                    outcome = if cur.children.is_empty() {
                        MergeOutcome::NewLeaf
                    } else {
                        MergeOutcome::NewBranch
                    };
                }
                cur.children.push(RevNode::from_fragment(fnode));
                cur = cur.children.last_mut().expect("just pushed");
            }
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frag(start: u64, hashes: &[&str]) -> PathFragment {
        let last = hashes.len() - 1;
        PathFragment {
            start,
            nodes: hashes
                .iter()
                .enumerate()
                .map(|(i, h)| {
                    if i == last {
                        FragmentNode::available(*h, false)
                    } else {
                        FragmentNode::missing(*h)
                    }
                })
                .collect(),
        }
    }

    #[test]
    fn first_edit_creates_a_branch() {
        let mut tree = RevTree::new();
        let res = tree.merge(&frag(1, &["aaa"]), 1000);
        assert_eq!(res.outcome, MergeOutcome::NewBranch);
        assert_eq!(tree.winning_rev(), Some(Rev::new(1, "aaa")));
    }

    #[test]
    fn child_edit_extends_leaf() {
        let mut tree = RevTree::new();
        tree.merge(&frag(1, &["aaa"]), 1000);
        let res = tree.merge(&frag(1, &["aaa", "bbb"]), 1000);
        assert_eq!(res.outcome, MergeOutcome::NewLeaf);
        assert_eq!(tree.winning_rev(), Some(Rev::new(2, "bbb")));
    }

    #[test]
    fn sibling_edit_creates_branch() {
        let mut tree = RevTree::new();
        tree.merge(&frag(1, &["aaa"]), 1000);
        tree.merge(&frag(1, &["aaa", "bbb"]), 1000);
        let res = tree.merge(&frag(1, &["aaa", "ccc"]), 1000);
        assert_eq!(res.outcome, MergeOutcome::NewBranch);
        // Hash tiebreak at equal depth.
        assert_eq!(tree.winning_rev(), Some(Rev::new(2, "ccc")));
        assert_eq!(tree.collect_conflicts(), vec![Rev::new(2, "bbb")]);
    }

    #[test]
    fn replay_is_existing() {
        let mut tree = RevTree::new();
        tree.merge(&frag(1, &["aaa", "bbb"]), 1000);
        let res = tree.merge(&frag(1, &["aaa", "bbb"]), 1000);
        assert_eq!(res.outcome, MergeOutcome::Existing);
        assert_eq!(tree.leaves().len(), 1);
    }

    #[test]
    fn deleted_leaf_loses_to_live_leaf() {
        let mut tree = RevTree::new();
        tree.merge(&frag(1, &["aaa"]), 1000);
        tree.merge(&frag(1, &["aaa", "bbb"]), 1000);
        let mut del = frag(1, &["aaa", "zzz", "top"]);
        del.nodes[2] = FragmentNode::available("top", true);
        tree.merge(&del, 1000);
        // The deleted gen-3 leaf is ignored; the live gen-2 leaf wins.
        assert_eq!(tree.winning_rev(), Some(Rev::new(2, "bbb")));
        assert!(!tree.winner_is_deleted());
    }

    #[test]
    fn all_deleted_falls_back_to_deepest_tombstone() {
        let mut tree = RevTree::new();
        let mut del = frag(1, &["aaa", "bbb"]);
        del.nodes[1] = FragmentNode::available("bbb", true);
        del.nodes[0] = FragmentNode::available("aaa", false);
        tree.merge(&del, 1000);
        tree.mark_missing(&[Rev::new(1, "aaa")]);
        assert_eq!(tree.winning_rev(), Some(Rev::new(2, "bbb")));
        assert!(tree.winner_is_deleted());
    }

    #[test]
    fn compactable_revs_are_available_non_leaves() {
        let mut tree = RevTree::new();
        let mut first = frag(1, &["aaa"]);
        first.nodes[0] = FragmentNode::available("aaa", false);
        tree.merge(&first, 1000);
        tree.merge(&frag(1, &["aaa", "bbb"]), 1000);
        assert_eq!(tree.compactable_revs(), vec![Rev::new(1, "aaa")]);

        tree.mark_missing(&[Rev::new(1, "aaa")]);
        assert!(tree.compactable_revs().is_empty());
        assert!(tree.contains(&Rev::new(1, "aaa")));
    }

    #[test]
    fn stemming_drops_linear_roots() {
        let mut tree = RevTree::new();
        tree.merge(&frag(1, &["r1"]), 2);
        tree.merge(&frag(1, &["r1", "r2"]), 2);
        let res = tree.merge(&frag(2, &["r2", "r3"]), 2);
        assert_eq!(res.stemmed, vec![Rev::new(1, "r1")]);
        assert_eq!(tree.branches[0].start, 2);
        assert_eq!(tree.winning_rev(), Some(Rev::new(3, "r3")));
    }

    #[test]
    fn ancestor_prefix_grafts_above_root() {
        let mut tree = RevTree::new();
        tree.merge(&frag(2, &["bbb"]), 1000);
        // A replicated path carrying the missing ancestor.
        let res = tree.merge(&frag(1, &["aaa", "bbb", "ccc"]), 1000);
        assert_eq!(res.outcome, MergeOutcome::NewLeaf);
        assert_eq!(tree.branches.len(), 1);
        assert_eq!(tree.branches[0].start, 1);
        assert_eq!(tree.winning_rev(), Some(Rev::new(3, "ccc")));
    }

    #[test]
    fn serde_roundtrip() {
        let mut tree = RevTree::new();
        tree.merge(&frag(1, &["aaa", "bbb"]), 1000);
        let json = serde_json::to_string(&tree).unwrap();
        let back: RevTree = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tree);
    }
}

//! Merkle tree over bundle content.
//!
//! The accumulator is a stack of perfect subtrees: pushing a leaf creates a
//! height-0 subtree and joins equal-height neighbours, so memory stays
//! logarithmic in the leaf count. Leaves are hashed as `H(0x00 || data)` and
//! nodes as `H(0x01 || left || right)`. While leaves are pushed the tree also
//! collects an inclusion proof for the leaf at its proof index.
//!
//! A bundle tree has one leaf per unlocked KV:
//! `"<package>:<chain version>:<key>:<hex(H(value))>"`, packages visited in
//! name order and leaves of one package pushed in lexical order.

use sha2::{Digest, Sha512};
use tracing::{debug, trace};

use crate::core::constants::MERKLE_PROOF_INDEX;
use crate::core::domain::Bundle;

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

fn leaf_sum(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha512::new();
    hasher.update([LEAF_PREFIX]);
    hasher.update(data);
    hasher.finalize().to_vec()
}

fn node_sum(left: &[u8], right: &[u8]) -> Vec<u8> {
    let mut hasher = Sha512::new();
    hasher.update([NODE_PREFIX]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().to_vec()
}

/// Root of an accumulator with no leaves: `SHA-512("")`.
pub fn empty_root() -> Vec<u8> {
    Sha512::digest(b"").to_vec()
}

#[derive(Debug, Clone)]
struct SubTree {
    height: usize,
    sum: Vec<u8>,
}

/// Streaming Merkle accumulator.
#[derive(Debug, Clone, Default)]
pub struct Tree {
    // Smallest (most recent) subtree last.
    stack: Vec<SubTree>,
    current_index: u64,
    proof_index: u64,
    proof_set: Vec<Vec<u8>>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the leaf to build an inclusion proof for.
    ///
    /// Must be called before the first push; later calls are ignored.
    pub fn set_index(&mut self, index: u64) {
        if self.current_index == 0 {
            self.proof_index = index;
        }
    }

    /// Append a leaf.
    pub fn push(&mut self, data: &[u8]) {
        if self.current_index == self.proof_index {
            self.proof_set.push(data.to_vec());
        }
        self.stack.push(SubTree {
            height: 0,
            sum: leaf_sum(data),
        });
        self.join_all_subtrees();
        self.current_index += 1;
    }

    fn join_all_subtrees(&mut self) {
        while self.stack.len() >= 2 {
            let n = self.stack.len();
            let (head, next) = (&self.stack[n - 1], &self.stack[n - 2]);
            if head.height != next.height {
                break;
            }

            // The sibling that does not contain the proof leaf joins the
            // proof set when the proof subtree is exactly this high.
            if !self.proof_set.is_empty() && head.height == self.proof_set.len() - 1 {
                let leaves = 1u64 << head.height;
                let mid = (self.current_index / leaves) * leaves;
                if self.proof_index < mid {
                    self.proof_set.push(head.sum.clone());
                } else {
                    self.proof_set.push(next.sum.clone());
                }
            }

            let sum = node_sum(&next.sum, &head.sum);
            let height = next.height + 1;
            self.stack.truncate(n - 2);
            self.stack.push(SubTree { height, sum });
        }
    }

    /// Number of leaves pushed so far.
    pub fn len(&self) -> u64 {
        self.current_index
    }

    pub fn is_empty(&self) -> bool {
        self.current_index == 0
    }

    /// Current root; [`empty_root`] when nothing was pushed.
    pub fn root(&self) -> Vec<u8> {
        let mut iter = self.stack.iter().rev();
        let Some(head) = iter.next() else {
            return empty_root();
        };
        iter.fold(head.sum.clone(), |sum, subtree| node_sum(&subtree.sum, &sum))
    }

    /// Root plus the inclusion proof of the leaf at the proof index.
    ///
    /// The proof set starts with the raw leaf data followed by sibling
    /// hashes from the bottom up. It is empty when the proof index is past
    /// the last leaf.
    pub fn prove(&self) -> Proof {
        let root = self.root();
        if self.stack.is_empty() || self.proof_set.is_empty() {
            return Proof {
                root,
                set: Vec::new(),
                index: self.proof_index,
                leaves: self.current_index,
            };
        }

        let mut set = self.proof_set.clone();
        let proof_height = set.len() - 1;

        // Fold the subtrees smaller than the one holding the proof leaf into
        // a single right sibling.
        let mut remaining = self.stack.clone();
        let mut sum = remaining.pop().map(|s| s.sum).unwrap_or_default();
        while let Some(next) = remaining.last() {
            if next.height >= proof_height {
                break;
            }
            sum = node_sum(&next.sum, &sum);
            remaining.pop();
        }

        if remaining
            .last()
            .is_some_and(|next| next.height == proof_height)
        {
            set.push(sum);
            remaining.pop();
        }

        // Every subtree left of the proof subtree is a left sibling.
        while let Some(subtree) = remaining.pop() {
            set.push(subtree.sum);
        }

        Proof {
            root,
            set,
            index: self.proof_index,
            leaves: self.current_index,
        }
    }
}

/// Inclusion proof produced by [`Tree::prove`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proof {
    pub root: Vec<u8>,
    pub set: Vec<Vec<u8>>,
    pub index: u64,
    pub leaves: u64,
}

/// Check an inclusion proof against a root.
pub fn verify_proof(root: &[u8], set: &[Vec<u8>], index: u64, leaves: u64) -> bool {
    if index >= leaves || set.is_empty() {
        return false;
    }

    let mut height = 0usize;
    let mut sum = leaf_sum(&set[height]);
    height += 1;

    // Climb while the subtree of the current height is complete.
    let mut stable_end = index;
    loop {
        let width = 1u64 << height;
        let start = (index / width) * width;
        let end = start + width - 1;
        if end >= leaves {
            break;
        }
        stable_end = end;

        let Some(sibling) = set.get(height) else {
            return false;
        };
        if index - start < (1u64 << (height - 1)) {
            sum = node_sum(&sum, sibling);
        } else {
            sum = node_sum(sibling, &sum);
        }
        height += 1;
    }

    // An elevated orphan on the right.
    if stable_end != leaves - 1 {
        let Some(sibling) = set.get(height) else {
            return false;
        };
        sum = node_sum(&sum, sibling);
        height += 1;
    }

    // Everything left is a left sibling.
    while let Some(sibling) = set.get(height) {
        sum = node_sum(sibling, &sum);
        height += 1;
    }

    sum.as_slice() == root
}

/// Counters gathered while building a bundle tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    pub packages: usize,
    pub secrets: usize,
    pub locked_packages: usize,
}

/// Build the tree of a bundle without mutating it.
///
/// Packages are visited in name order regardless of their stored order.
/// Locked chains and packages without a chain contribute no leaves.
pub fn bundle_tree(bundle: &Bundle) -> (Tree, Statistics) {
    let mut order: Vec<&crate::core::domain::Package> = bundle.packages.iter().collect();
    order.sort_by(|a, b| a.name.cmp(&b.name));

    let mut tree = Tree::new();
    tree.set_index(MERKLE_PROOF_INDEX);
    let mut stats = Statistics {
        packages: bundle.packages.len(),
        ..Statistics::default()
    };

    for package in order {
        let Some(chain) = &package.secrets else {
            continue;
        };
        if chain.is_locked() {
            stats.locked_packages += 1;
            continue;
        }

        let mut leaves: Vec<String> = chain
            .data
            .iter()
            .map(|kv| {
                format!(
                    "{}:{}:{}:{}",
                    package.name,
                    chain.version,
                    kv.key,
                    hex::encode(Sha512::digest(&kv.value))
                )
            })
            .collect();
        leaves.sort();
        stats.secrets += leaves.len();

        trace!(package = %package.name, leaves = leaves.len(), "merkle leaves");
        for leaf in &leaves {
            tree.push(leaf.as_bytes());
        }
    }

    debug!(
        packages = stats.packages,
        secrets = stats.secrets,
        locked = stats.locked_packages,
        "merkle tree built"
    );
    (tree, stats)
}

/// Root of a bundle's tree.
pub fn bundle_root(bundle: &Bundle) -> Vec<u8> {
    bundle_tree(bundle).0.root()
}

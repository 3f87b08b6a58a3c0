use std::collections::VecDeque;

use meshfile_primitives::chunk::sha256;
use meshfile_primitives::Digest;
use thunderdome::{Arena, Index};

use crate::error::MerkleError;

#[derive(Clone, Copy, Debug)]
struct Node {
    hash: Digest,
    left: Option<Index>,
    right: Option<Index>,
    parent: Option<Index>,
}

/// A balanced binary Merkle tree stored in a contiguous arena, referring to
/// children/parent by index rather than by reference (spec.md §9 design
/// note: this sidesteps the cycle-handling that `parent` back-references
/// would otherwise require under ownership).
///
/// Odd fan-in at a level is resolved by promoting the lone child's hash
/// unchanged to a new parent node — not `SHA-256(h || h)` — per spec.md
/// §3's fixed convention.
#[derive(Debug)]
pub struct MerkleTree {
    arena: Arena<Node>,
    root: Index,
    /// Leaves in build (file) order — the order callers must persist.
    leaves: Vec<Index>,
}

impl MerkleTree {
    /// Builds a tree over `leaf_hashes`, which must already be in file order.
    pub fn from_leaf_hashes(leaf_hashes: &[Digest]) -> Result<Self, MerkleError> {
        if leaf_hashes.is_empty() {
            return Err(MerkleError::EmptyInput);
        }

        let mut arena = Arena::new();
        let leaves: Vec<Index> = leaf_hashes
            .iter()
            .map(|&hash| {
                arena.insert(Node {
                    hash,
                    left: None,
                    right: None,
                    parent: None,
                })
            })
            .collect();

        let mut level = leaves.clone();
        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len().div_ceil(2));
            let mut i = 0;
            while i < level.len() {
                if i + 1 < level.len() {
                    let (l, r) = (level[i], level[i + 1]);
                    let parent_hash = hash_pair(arena[l].hash, arena[r].hash);
                    let parent = arena.insert(Node {
                        hash: parent_hash,
                        left: Some(l),
                        right: Some(r),
                        parent: None,
                    });
                    arena[l].parent = Some(parent);
                    arena[r].parent = Some(parent);
                    next.push(parent);
                    i += 2;
                } else {
                    let lone = level[i];
                    let promoted_hash = arena[lone].hash;
                    let parent = arena.insert(Node {
                        hash: promoted_hash,
                        left: Some(lone),
                        right: None,
                        parent: None,
                    });
                    arena[lone].parent = Some(parent);
                    next.push(parent);
                    i += 1;
                }
            }
            level = next;
        }

        Ok(Self {
            arena,
            root: level[0],
            leaves,
        })
    }

    #[must_use]
    pub fn root_hash(&self) -> Digest {
        self.arena[self.root].hash
    }

    #[must_use]
    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    /// Leaf hashes in build (file) order — what `Metadata.leaves` persists.
    #[must_use]
    pub fn leaf_hashes(&self) -> Vec<Digest> {
        self.leaves.iter().map(|&i| self.arena[i].hash).collect()
    }

    /// Leaf hashes in breadth-first traversal order, which coincides with
    /// file order only when `leaf_count` is a power of two (spec.md §4.2
    /// `GetAllLeavesHashes`).
    #[must_use]
    pub fn leaves_breadth_first(&self) -> Vec<Digest> {
        let mut out = Vec::with_capacity(self.leaves.len());
        let mut queue = VecDeque::from([self.root]);
        while let Some(idx) = queue.pop_front() {
            let node = &self.arena[idx];
            match (node.left, node.right) {
                (None, None) => out.push(node.hash),
                (Some(l), Some(r)) => {
                    queue.push_back(l);
                    queue.push_back(r);
                }
                (Some(l), None) => queue.push_back(l),
                (None, Some(_)) => unreachable!("a node never has only a right child"),
            }
        }
        out
    }

    /// Builds the inclusion proof for leaf `index` (in file order): the
    /// sibling hash and side at every level from the leaf up to the root.
    pub fn generate_proof(&self, index: usize) -> Result<MerkleProof, MerkleError> {
        let leaf_count = self.leaves.len();
        let mut current = *self
            .leaves
            .get(index)
            .ok_or(MerkleError::LeafIndexOutOfRange { index, leaf_count })?;

        let mut steps = Vec::new();
        while let Some(parent) = self.arena[current].parent {
            let parent_node = &self.arena[parent];
            match (parent_node.left, parent_node.right) {
                (Some(l), Some(r)) if l == current => {
                    steps.push(ProofStep::Sibling {
                        hash: self.arena[r].hash,
                        side: Side::Right,
                    });
                }
                (Some(l), Some(r)) if r == current => {
                    steps.push(ProofStep::Sibling {
                        hash: self.arena[l].hash,
                        side: Side::Left,
                    });
                }
                (Some(l), None) if l == current => steps.push(ProofStep::Promoted),
                _ => unreachable!("parent/child links are only ever set symmetrically"),
            }
            current = parent;
        }

        Ok(MerkleProof {
            leaf_hash: self.leaves_leaf_hash(index),
            steps,
        })
    }

    fn leaves_leaf_hash(&self, index: usize) -> Digest {
        self.arena[self.leaves[index]].hash
    }
}

fn hash_pair(left: Digest, right: Digest) -> Digest {
    let mut buf = [0_u8; 64];
    buf[..32].copy_from_slice(left.as_bytes());
    buf[32..].copy_from_slice(right.as_bytes());
    Digest::new(sha256(&buf))
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Side {
    Left,
    Right,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProofStep {
    Sibling { hash: Digest, side: Side },
    /// This level had an odd node out; the hash was promoted unchanged.
    Promoted,
}

/// An inclusion proof: the leaf's own hash plus the path of sibling hashes
/// up to the root (spec.md §4.3 `MerkleProofs`).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MerkleProof {
    pub leaf_hash: Digest,
    pub steps: Vec<ProofStep>,
}

impl MerkleProof {
    /// Recomputes the root from `self.leaf_hash` and the sibling path and
    /// compares it to `root`. Tampering any hash in the proof, or passing
    /// a different leaf hash, falsifies the proof.
    #[must_use]
    pub fn verify(&self, root: Digest) -> bool {
        let mut current = self.leaf_hash;
        for step in &self.steps {
            current = match step {
                ProofStep::Sibling {
                    hash,
                    side: Side::Left,
                } => hash_pair(*hash, current),
                ProofStep::Sibling {
                    hash,
                    side: Side::Right,
                } => hash_pair(current, *hash),
                ProofStep::Promoted => current,
            };
        }
        current == root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(byte: u8) -> Digest {
        Digest::new([byte; 32])
    }

    #[test]
    fn single_leaf_root_equals_leaf_hash() {
        let tree = MerkleTree::from_leaf_hashes(&[digest(1)]).unwrap();
        assert_eq!(tree.root_hash(), digest(1));
    }

    #[test]
    fn odd_leaf_promotes_rather_than_self_hashes() {
        let leaves = [digest(1), digest(2), digest(3)];
        let tree = MerkleTree::from_leaf_hashes(&leaves).unwrap();

        // level 1: hash(1,2), and 3 promoted unchanged
        let h12 = hash_pair(digest(1), digest(2));
        // level 2: hash(h12, 3) since 3 (promoted) pairs with h12
        let expected_root = hash_pair(h12, digest(3));
        assert_eq!(tree.root_hash(), expected_root);
    }

    #[test]
    fn proof_round_trips_for_every_leaf() {
        let leaves = [digest(1), digest(2), digest(3), digest(4), digest(5)];
        let tree = MerkleTree::from_leaf_hashes(&leaves).unwrap();
        for i in 0..leaves.len() {
            let proof = tree.generate_proof(i).unwrap();
            assert!(proof.verify(tree.root_hash()), "leaf {i} should verify");
        }
    }

    #[test]
    fn tampered_proof_fails() {
        let leaves = [digest(1), digest(2), digest(3), digest(4)];
        let tree = MerkleTree::from_leaf_hashes(&leaves).unwrap();

        let mut tampered_sibling = tree.generate_proof(0).unwrap();
        if let ProofStep::Sibling { hash, .. } = &mut tampered_sibling.steps[0] {
            *hash = digest(0xAA);
        }
        assert!(!tampered_sibling.verify(tree.root_hash()));

        let mut tampered_leaf = tree.generate_proof(0).unwrap();
        tampered_leaf.leaf_hash = digest(0xAA);
        assert!(!tampered_leaf.verify(tree.root_hash()));
    }

    #[test]
    fn building_from_empty_input_fails() {
        assert!(matches!(
            MerkleTree::from_leaf_hashes(&[]),
            Err(MerkleError::EmptyInput)
        ));
    }

    #[test]
    fn leaf_count_matches_power_of_two_breadth_first_order() {
        let leaves = [digest(1), digest(2), digest(3), digest(4)];
        let tree = MerkleTree::from_leaf_hashes(&leaves).unwrap();
        assert_eq!(tree.leaves_breadth_first(), tree.leaf_hashes());
    }
}

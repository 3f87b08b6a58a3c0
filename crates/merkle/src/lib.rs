//! Merkle tree construction, inclusion proofs, and chameleon-wrapped roots
//! (spec.md §4.2–§4.3).

mod builder;
mod chameleon_tree;
mod error;
mod tree;

pub use builder::{BuiltMerkle, MerkleBuilder};
pub use chameleon_tree::{ChameleonRoot, ChameleonTree};
pub use error::MerkleError;
pub use tree::{MerkleProof, MerkleTree, ProofStep, Side};

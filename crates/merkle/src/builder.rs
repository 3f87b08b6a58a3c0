use std::io::Read;

use meshfile_primitives::{Chunk, Digest, DEFAULT_BLOCK_SIZE};

use crate::error::MerkleError;
use crate::tree::MerkleTree;

/// Splits a byte stream into fixed-size blocks and builds a balanced binary
/// Merkle tree over their SHA-256 leaf hashes (spec.md §4.2).
#[derive(Clone, Copy, Debug)]
pub struct MerkleBuilder {
    block_size: usize,
}

impl MerkleBuilder {
    #[must_use]
    pub const fn new(block_size: usize) -> Self {
        Self { block_size }
    }

    /// Reads `source` to exhaustion, producing one `Chunk` per block (the
    /// last chunk may be shorter) and the tree built over their hashes.
    ///
    /// Each block is copied into a freshly allocated buffer before hashing
    /// — the shared read buffer is reused across iterations but never
    /// aliased into the returned chunks.
    pub fn build<R: Read>(&self, mut source: R) -> Result<BuiltMerkle, MerkleError> {
        let mut scratch = vec![0_u8; self.block_size];
        let mut chunks = Vec::new();
        let mut leaf_hashes = Vec::new();

        loop {
            let n = read_up_to(&mut source, &mut scratch)?;
            if n == 0 {
                break;
            }

            let owned = scratch[..n].to_vec();
            let chunk = Chunk::new(owned)?;
            leaf_hashes.push(chunk.digest());
            chunks.push(chunk);

            if n < self.block_size {
                break;
            }
        }

        if chunks.is_empty() {
            return Err(MerkleError::EmptyInput);
        }

        let tree = MerkleTree::from_leaf_hashes(&leaf_hashes)?;
        Ok(BuiltMerkle { tree, chunks })
    }
}

impl Default for MerkleBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_SIZE as usize)
    }
}

/// The result of `MerkleBuilder::build`: the tree plus the leaf blobs in
/// file order, ready to be written to a `ChunkStore`.
#[derive(Debug)]
pub struct BuiltMerkle {
    pub tree: MerkleTree,
    pub chunks: Vec<Chunk>,
}

impl BuiltMerkle {
    #[must_use]
    pub fn root_hash(&self) -> Digest {
        self.tree.root_hash()
    }
}

/// Fills `buf` from `source`, stopping early (short of `buf.len()`) only at
/// EOF — a short non-EOF read is retried, matching `Read::read_exact`'s
/// contract minus the "error if short" part.
fn read_up_to<R: Read>(source: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use sha2::{Digest as _, Sha256};

    use super::*;

    #[test]
    fn single_leaf_root_equals_sha256_of_whole_file() {
        let data = b"Hello, P2P World! This is a test file for HTTP API testing.\n";
        let built = MerkleBuilder::new(262_144).build(Cursor::new(data)).unwrap();

        assert_eq!(built.chunks.len(), 1);
        let mut hasher = Sha256::new();
        hasher.update(data);
        let expected: [u8; 32] = hasher.finalize().into();
        assert_eq!(built.root_hash().as_bytes(), &expected);
    }

    #[test]
    fn leaf_count_matches_ceil_division() {
        let data = vec![0x41_u8; 1024 * 1024];
        let built = MerkleBuilder::new(524_288).build(Cursor::new(&data)).unwrap();
        assert_eq!(built.chunks.len(), 2);
        assert_eq!(built.chunks[0].digest(), built.chunks[1].digest());
    }

    #[test]
    fn empty_input_fails() {
        let built = MerkleBuilder::new(1024).build(Cursor::new(Vec::<u8>::new()));
        assert!(matches!(built, Err(MerkleError::EmptyInput)));
    }

    #[test]
    fn builder_is_deterministic() {
        let data = vec![0x7A_u8; 10_000];
        let a = MerkleBuilder::new(4096).build(Cursor::new(&data)).unwrap();
        let b = MerkleBuilder::new(4096).build(Cursor::new(&data)).unwrap();
        assert_eq!(a.root_hash(), b.root_hash());
    }

    #[test]
    fn reassembly_yields_original_bytes() {
        let data: Vec<u8> = (0..10_000).map(|i| (i % 256) as u8).collect();
        let built = MerkleBuilder::new(777).build(Cursor::new(&data)).unwrap();
        let reassembled: Vec<u8> = built
            .chunks
            .iter()
            .flat_map(|c| c.bytes().to_vec())
            .collect();
        assert_eq!(reassembled, data);
    }
}

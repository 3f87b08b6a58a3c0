use serde::{Deserialize, Serialize};

use crate::digest::{base64_serde, Digest};

/// Maximum size of a single stored or transferred chunk (spec.md §4.4/§4.7).
pub const MAX_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Default block size used by `MerkleBuilder` when splitting a file.
pub const DEFAULT_BLOCK_SIZE: u32 = 262_144;

/// One leaf entry in a `Metadata` record: the size and digest of one chunk,
/// in file order.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkData {
    pub chunk_size: u32,
    #[serde(with = "base64_serde")]
    pub chunk_hash: Digest,
}

impl ChunkData {
    #[must_use]
    pub const fn new(chunk_size: u32, chunk_hash: Digest) -> Self {
        Self {
            chunk_size,
            chunk_hash,
        }
    }
}

/// An owned, immutable chunk of file bytes, no longer than `MAX_CHUNK_SIZE`.
///
/// Storing `bytes` under `digest` and reading it back must yield bytes whose
/// SHA-256 equals `digest` — enforced by `Chunk::new` hashing its own input
/// rather than trusting a caller-supplied digest.
#[derive(Clone, Eq, PartialEq)]
pub struct Chunk {
    digest: Digest,
    bytes: Vec<u8>,
}

impl Chunk {
    /// Builds a chunk from owned bytes, computing (not trusting) the digest.
    ///
    /// # Errors
    /// Returns `ChunkTooLarge` if `bytes.len() > MAX_CHUNK_SIZE`.
    pub fn new(bytes: Vec<u8>) -> Result<Self, ChunkTooLarge> {
        if bytes.len() > MAX_CHUNK_SIZE {
            return Err(ChunkTooLarge(bytes.len()));
        }
        let digest = Digest::new(sha256(&bytes));
        Ok(Self { digest, bytes })
    }

    #[must_use]
    pub const fn digest(&self) -> Digest {
        self.digest
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl core::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Chunk")
            .field("digest", &self.digest)
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[error("chunk of {0} bytes exceeds MAX_CHUNK_SIZE ({MAX_CHUNK_SIZE})")]
pub struct ChunkTooLarge(pub usize);

#[must_use]
pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    use sha2::{Digest as _, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_matches_content() {
        let chunk = Chunk::new(b"hello world".to_vec()).unwrap();
        assert_eq!(chunk.digest().as_bytes(), &sha256(b"hello world"));
    }

    #[test]
    fn rejects_oversized_chunk() {
        let bytes = vec![0_u8; MAX_CHUNK_SIZE + 1];
        assert!(matches!(Chunk::new(bytes), Err(ChunkTooLarge(_))));
    }
}

use meshfile_crypto::{find_collision, hash, ChameleonKeyPair, ChameleonPubKey, ChameleonRandomness};
use meshfile_primitives::Digest;
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::error::MerkleError;
use crate::tree::MerkleTree;

/// A Merkle root wrapped in a chameleon hash, so the externally published
/// CID (`ch_hash`) can stay stable across authorized content edits
/// (spec.md §3 "Chameleon root", §4.3).
#[derive(Clone, Copy, Debug)]
pub struct ChameleonRoot {
    pub inner_root: Digest,
    pub pk: ChameleonPubKey,
    pub r: ChameleonRandomness,
    pub ch_hash: Digest,
}

/// The inner Merkle tree plus its chameleon wrapping. The tree can be
/// rebuilt in place via `update` without moving `ch_hash`.
#[derive(Debug)]
pub struct ChameleonTree {
    inner: MerkleTree,
    root: ChameleonRoot,
}

impl ChameleonTree {
    /// Builds the inner tree over `leaf_hashes`, then computes
    /// `(r, ch_hash) = ChameleonCrypto.hash(inner_root, pk)`.
    pub fn build<R: RngCore + CryptoRng>(
        rng: &mut R,
        leaf_hashes: &[Digest],
        pk: ChameleonPubKey,
    ) -> Result<Self, MerkleError> {
        let inner = MerkleTree::from_leaf_hashes(leaf_hashes)?;
        let inner_root = inner.root_hash();
        let (r, ch_hash) = hash(rng, &inner_root, pk)?;
        Ok(Self {
            inner,
            root: ChameleonRoot {
                inner_root,
                pk,
                r,
                ch_hash,
            },
        })
    }

    #[must_use]
    pub fn inner_tree(&self) -> &MerkleTree {
        &self.inner
    }

    #[must_use]
    pub const fn root(&self) -> ChameleonRoot {
        self.root
    }

    /// The externally published CID for this tree.
    #[must_use]
    pub fn cid(&self) -> Digest {
        self.root.ch_hash
    }

    /// Rebuilds the inner tree over `new_leaf_hashes` and rotates the
    /// randomness so `ch_hash` is unchanged (spec.md §4.3 "Update").
    ///
    /// # Errors
    /// Returns `MerkleError::Crypto(CryptoError::InvalidKey)` if `key_pair`
    /// does not reproduce the stored public key.
    pub fn update(
        &mut self,
        key_pair: &ChameleonKeyPair,
        new_leaf_hashes: &[Digest],
    ) -> Result<(), MerkleError> {
        if key_pair.public_key() != self.root.pk {
            return Err(MerkleError::Crypto(meshfile_crypto::CryptoError::InvalidKey));
        }

        let new_inner = MerkleTree::from_leaf_hashes(new_leaf_hashes)?;
        let new_inner_root = new_inner.root_hash();

        let new_r = find_collision(&self.root.inner_root, self.root.r, &new_inner_root, key_pair)?;

        self.inner = new_inner;
        self.root.inner_root = new_inner_root;
        self.root.r = new_r;
        Ok(())
    }
}

/// Wire shape for a chameleon tree (spec.md §4.3): base64-encoded leaf
/// hashes and the chameleon hash, decimal-string big integers for the
/// public key coordinates and randomness components.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SerializedChameleonTree {
    leaves: Vec<String>,
    public_key: SerializedPoint,
    randomness: SerializedRandomness,
    chameleon_hash: String,
}

#[derive(Serialize, Deserialize)]
struct SerializedPoint {
    x: String,
    y: String,
}

#[derive(Serialize, Deserialize)]
struct SerializedRandomness {
    rx: String,
    ry: String,
    s: String,
}

impl ChameleonTree {
    pub fn to_json(&self) -> Result<String, MerkleError> {
        let leaves = self
            .inner
            .leaf_hashes()
            .into_iter()
            .map(|h| base64_encode(h.as_bytes()))
            .collect();

        let serialized = SerializedChameleonTree {
            leaves,
            public_key: SerializedPoint {
                x: bytes_to_decimal(&self.root.pk.x),
                y: bytes_to_decimal(&self.root.pk.y),
            },
            randomness: SerializedRandomness {
                rx: bytes_to_decimal(&self.root.r.r_x),
                ry: bytes_to_decimal(&self.root.r.r_y),
                s: bytes_to_decimal(&self.root.r.s),
            },
            chameleon_hash: base64_encode(self.root.ch_hash.as_bytes()),
        };

        serde_json::to_string(&serialized).map_err(|e| MerkleError::Serialization(e.to_string()))
    }

    /// Rebuilds the inner tree from the leaf list; the chameleon randomness
    /// and hash are trusted as given (they are only ever produced by
    /// `build`/`update`, never recomputed from the leaves).
    pub fn from_json(json: &str) -> Result<Self, MerkleError> {
        let parsed: SerializedChameleonTree =
            serde_json::from_str(json).map_err(|e| MerkleError::Serialization(e.to_string()))?;

        let leaf_hashes: Vec<Digest> = parsed
            .leaves
            .iter()
            .map(|s| base64_decode_digest(s))
            .collect::<Result<_, _>>()?;
        let inner = MerkleTree::from_leaf_hashes(&leaf_hashes)?;

        let pk = ChameleonPubKey {
            x: decimal_to_bytes(&parsed.public_key.x)?,
            y: decimal_to_bytes(&parsed.public_key.y)?,
        };
        let r = ChameleonRandomness {
            r_x: decimal_to_bytes(&parsed.randomness.rx)?,
            r_y: decimal_to_bytes(&parsed.randomness.ry)?,
            s: decimal_to_bytes(&parsed.randomness.s)?,
        };
        let ch_hash = base64_decode_digest(&parsed.chameleon_hash)?;

        Ok(Self {
            root: ChameleonRoot {
                inner_root: inner.root_hash(),
                pk,
                r,
                ch_hash,
            },
            inner,
        })
    }
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    STANDARD.encode(bytes)
}

fn base64_decode_digest(s: &str) -> Result<Digest, MerkleError> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    let bytes = STANDARD
        .decode(s)
        .map_err(|e| MerkleError::Serialization(e.to_string()))?;
    Digest::from_slice(&bytes).map_err(|e| MerkleError::Serialization(e.to_string()))
}

fn bytes_to_decimal(bytes: &[u8; 32]) -> String {
    num_bigint::BigUint::from_bytes_be(bytes).to_string()
}

fn decimal_to_bytes(s: &str) -> Result<[u8; 32], MerkleError> {
    let value = s
        .parse::<num_bigint::BigUint>()
        .map_err(|e| MerkleError::Serialization(e.to_string()))?;
    let be = value.to_bytes_be();
    if be.len() > 32 {
        return Err(MerkleError::Serialization(format!(
            "decimal integer does not fit in 32 bytes: {s}"
        )));
    }
    let mut out = [0_u8; 32];
    out[32 - be.len()..].copy_from_slice(&be);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use rand::rngs::OsRng;

    use super::*;

    fn digest(byte: u8) -> Digest {
        Digest::new([byte; 32])
    }

    #[test]
    fn build_then_serialize_round_trips() {
        let key_pair = ChameleonKeyPair::generate(&mut OsRng);
        let leaves = [digest(1), digest(2)];
        let tree = ChameleonTree::build(&mut OsRng, &leaves, key_pair.public_key()).unwrap();

        let json = tree.to_json().unwrap();
        let restored = ChameleonTree::from_json(&json).unwrap();

        assert_eq!(restored.cid(), tree.cid());
        assert_eq!(restored.root().pk, tree.root().pk);
    }

    #[test]
    fn update_preserves_cid() {
        let key_pair = ChameleonKeyPair::generate(&mut OsRng);
        let leaves_old = [digest(1), digest(2)];
        let mut tree = ChameleonTree::build(&mut OsRng, &leaves_old, key_pair.public_key()).unwrap();
        let cid_before = tree.cid();

        let leaves_new = [digest(9), digest(9), digest(9)];
        tree.update(&key_pair, &leaves_new).unwrap();

        assert_eq!(tree.cid(), cid_before);
        assert_eq!(tree.inner_tree().leaf_count(), 3);
    }

    #[test]
    fn update_with_wrong_key_fails() {
        let key_pair = ChameleonKeyPair::generate(&mut OsRng);
        let wrong_key_pair = ChameleonKeyPair::generate(&mut OsRng);
        let leaves = [digest(1), digest(2)];
        let mut tree = ChameleonTree::build(&mut OsRng, &leaves, key_pair.public_key()).unwrap();

        let result = tree.update(&wrong_key_pair, &[digest(3)]);
        assert!(matches!(
            result,
            Err(MerkleError::Crypto(meshfile_crypto::CryptoError::InvalidKey))
        ));
    }
}

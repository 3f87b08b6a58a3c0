use serde::{Deserialize, Serialize};

use crate::chunk::ChunkData;
use crate::digest::{base64_serde, Digest};

/// Serialized chameleon public key length: `X || Y`, 32 bytes each
/// (spec.md §3 "Chameleon key pair").
pub const PUBLIC_KEY_LEN: usize = 64;
/// Serialized chameleon randomness length: `rX || rY || s`, 32 bytes each
/// (spec.md §3 "Chameleon randomness").
pub const RANDOM_NUM_LEN: usize = 96;

/// Tree construction used to derive a CID (spec.md §3 `Metadata`).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeType {
    Regular,
    Chameleon,
}

/// The only encryption scheme currently defined (spec.md §3, §9 open question).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encryption {
    None,
}

impl Default for Encryption {
    fn default() -> Self {
        Self::None
    }
}

/// The persisted descriptor for one published file, keyed externally by its
/// CID. See spec.md §6 "Metadata file format" for the exact wire shape.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct Metadata {
    #[serde(with = "base64_serde")]
    pub root_hash: Digest,

    #[serde(default, skip_serializing_if = "Option::is_none", with = "byte_vec_base64::option")]
    pub random_num: Option<Vec<u8>>,

    #[serde(default, skip_serializing_if = "Option::is_none", with = "byte_vec_base64::option")]
    pub public_key: Option<Vec<u8>>,

    pub description: String,
    pub file_size: u64,
    pub file_name: String,
    pub encryption: Encryption,
    pub tree_type: TreeType,
    pub leaves: Vec<ChunkData>,
}

impl Metadata {
    /// Checks the invariants stated in spec.md §3: leaf sizes sum to
    /// `file_size`, and chameleon-specific fields are present iff the tree
    /// type requires them.
    pub fn validate(&self) -> Result<(), MetadataInvariantError> {
        let leaf_total: u64 = self.leaves.iter().map(|l| u64::from(l.chunk_size)).sum();
        if leaf_total != self.file_size {
            return Err(MetadataInvariantError::SizeMismatch {
                leaf_total,
                file_size: self.file_size,
            });
        }

        match self.tree_type {
            TreeType::Chameleon => {
                let public_key_ok = self.public_key.as_deref().is_some_and(|k| k.len() == PUBLIC_KEY_LEN);
                let random_num_ok = self.random_num.as_deref().is_some_and(|r| r.len() == RANDOM_NUM_LEN);
                if !public_key_ok || !random_num_ok {
                    return Err(MetadataInvariantError::MissingChameleonFields);
                }
            }
            TreeType::Regular => {
                if self.random_num.is_some() || self.public_key.is_some() {
                    return Err(MetadataInvariantError::UnexpectedChameleonFields);
                }
            }
        }

        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum MetadataInvariantError {
    #[error("leaf sizes sum to {leaf_total}, expected file_size {file_size}")]
    SizeMismatch { leaf_total: u64, file_size: u64 },
    #[error("tree_type is chameleon but public_key/random_num are missing or wrong length")]
    MissingChameleonFields,
    #[error("tree_type is regular but chameleon fields are present")]
    UnexpectedChameleonFields,
}

/// Base64 serde for variable-length byte fields (`publicKey`, `randomNum`)
/// whose length depends on which chameleon field they carry, unlike the
/// fixed 32-byte `Digest` fields.
mod byte_vec_base64 {
    pub mod option {
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine;
        use serde::de::Error as SerdeError;
        use serde::{Deserialize, Deserializer, Serialize, Serializer};

        pub fn serialize<S>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            bytes.as_ref().map(|b| STANDARD.encode(b)).serialize(serializer)
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let Some(encoded) = Option::<String>::deserialize(deserializer)? else {
                return Ok(None);
            };
            STANDARD
                .decode(encoded.as_bytes())
                .map(Some)
                .map_err(|e| D::Error::custom(format!("invalid base64: {e}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_leaf(size: u32) -> ChunkData {
        ChunkData::new(size, Digest::zero())
    }

    #[test]
    fn validates_regular_metadata() {
        let metadata = Metadata {
            root_hash: Digest::zero(),
            random_num: None,
            public_key: None,
            description: String::new(),
            file_size: 10,
            file_name: "f.bin".into(),
            encryption: Encryption::None,
            tree_type: TreeType::Regular,
            leaves: vec![sample_leaf(10)],
        };
        assert!(metadata.validate().is_ok());
    }

    #[test]
    fn rejects_size_mismatch() {
        let metadata = Metadata {
            root_hash: Digest::zero(),
            random_num: None,
            public_key: None,
            description: String::new(),
            file_size: 11,
            file_name: "f.bin".into(),
            encryption: Encryption::None,
            tree_type: TreeType::Regular,
            leaves: vec![sample_leaf(10)],
        };
        assert!(matches!(
            metadata.validate(),
            Err(MetadataInvariantError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn rejects_chameleon_without_fields() {
        let metadata = Metadata {
            root_hash: Digest::zero(),
            random_num: None,
            public_key: None,
            description: String::new(),
            file_size: 10,
            file_name: "f.bin".into(),
            encryption: Encryption::None,
            tree_type: TreeType::Chameleon,
            leaves: vec![sample_leaf(10)],
        };
        assert!(matches!(
            metadata.validate(),
            Err(MetadataInvariantError::MissingChameleonFields)
        ));
    }

    #[test]
    fn rejects_wrong_length_chameleon_fields() {
        let metadata = Metadata {
            root_hash: Digest::zero(),
            random_num: Some(vec![0_u8; RANDOM_NUM_LEN]),
            public_key: Some(vec![0_u8; 32]),
            description: String::new(),
            file_size: 10,
            file_name: "f.bin".into(),
            encryption: Encryption::None,
            tree_type: TreeType::Chameleon,
            leaves: vec![sample_leaf(10)],
        };
        assert!(matches!(
            metadata.validate(),
            Err(MetadataInvariantError::MissingChameleonFields)
        ));
    }

    #[test]
    fn validates_well_formed_chameleon_metadata() {
        let metadata = Metadata {
            root_hash: Digest::zero(),
            random_num: Some(vec![0_u8; RANDOM_NUM_LEN]),
            public_key: Some(vec![0_u8; PUBLIC_KEY_LEN]),
            description: String::new(),
            file_size: 10,
            file_name: "f.bin".into(),
            encryption: Encryption::None,
            tree_type: TreeType::Chameleon,
            leaves: vec![sample_leaf(10)],
        };
        assert!(metadata.validate().is_ok());
    }

    #[test]
    fn camel_case_json_round_trip() {
        let metadata = Metadata {
            root_hash: Digest::new([1; 32]),
            random_num: Some(vec![2_u8; RANDOM_NUM_LEN]),
            public_key: Some(vec![3_u8; PUBLIC_KEY_LEN]),
            description: "a test file".into(),
            file_size: 10,
            file_name: "f.bin".into(),
            encryption: Encryption::None,
            tree_type: TreeType::Chameleon,
            leaves: vec![sample_leaf(10)],
        };
        let json = serde_json::to_string(&metadata).unwrap();
        assert!(json.contains("\"rootHash\""));
        assert!(json.contains("\"fileSize\""));
        let round_tripped: Metadata = serde_json::from_str(&json).unwrap();
        assert_eq!(round_tripped.file_name, metadata.file_name);
        assert_eq!(round_tripped.root_hash, metadata.root_hash);
    }
}

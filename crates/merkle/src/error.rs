use meshfile_crypto::CryptoError;
use meshfile_primitives::{ChunkTooLarge, CoreError};
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MerkleError {
    #[error("input source produced no bytes")]
    EmptyInput,

    #[error("leaf index {index} out of range (tree has {leaf_count} leaves)")]
    LeafIndexOutOfRange { index: usize, leaf_count: usize },

    #[error(transparent)]
    ChunkTooLarge(#[from] ChunkTooLarge),

    #[error("I/O error while reading input")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("malformed chameleon tree serialization: {0}")]
    Serialization(String),
}

impl From<MerkleError> for CoreError {
    fn from(err: MerkleError) -> Self {
        match err {
            MerkleError::EmptyInput | MerkleError::LeafIndexOutOfRange { .. } | MerkleError::ChunkTooLarge(_) => {
                Self::Input(err.to_string())
            }
            MerkleError::Crypto(e) => e.into(),
            MerkleError::Io(_) | MerkleError::Serialization(_) => Self::Fatal(err.to_string()),
        }
    }
}

use meshfile_primitives::{CoreError, Digest};
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("chunk {0} not found")]
    NotFound(Digest),

    #[error("chunk of {0} bytes exceeds the store's maximum chunk size")]
    ChunkTooLarge(usize),

    #[error("I/O error accessing chunk store")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(digest) => Self::NotFound(format!("chunk {digest} not found in local store")),
            StoreError::ChunkTooLarge(_) | StoreError::Io(_) => Self::Fatal(err.to_string()),
        }
    }
}

//! Shared data model and error taxonomy for the meshfile transfer substrate.
//!
//! This crate has no async runtime dependency and no I/O: it is the
//! vocabulary every other crate in the workspace speaks (`Digest`, `Chunk`,
//! `ChunkData`, `Metadata`, `PeerInfo`, `CoreError`).

pub mod chunk;
pub mod digest;
pub mod error;
pub mod metadata;
pub mod peer;

pub use chunk::{sha256, Chunk, ChunkData, ChunkTooLarge, DEFAULT_BLOCK_SIZE, MAX_CHUNK_SIZE};
pub use digest::{Digest, DigestParseError, DIGEST_SIZE};
pub use error::{CoreError, CoreResult};
pub use metadata::{Encryption, Metadata, MetadataInvariantError, TreeType};
pub use peer::PeerInfo;

//! Local content-addressed blob store keyed by leaf digest (spec.md §4.4).

mod chunk_store;
mod error;

pub use chunk_store::{ChunkStat, ChunkStore};
pub use error::StoreError;

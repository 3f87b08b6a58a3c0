//! Chunk transfer protocol state machines and DHT-backed provider
//! discovery (spec.md §4.7, §4.8).

mod chunk_protocol;
mod dht_service;
pub mod testutil;

pub use chunk_protocol::{serve_data, serve_exists, ChunkProtocolClient, ChunkProtocolConfig};
pub use dht_service::{serve_announce, serve_lookup, DhtService};

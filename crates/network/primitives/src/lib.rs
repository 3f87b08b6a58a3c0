//! Wire types, protocol ids, and the host/DHT capability traits shared by
//! the chunk transfer protocols (spec.md §4.7, §4.8, §6).

mod host;
mod inbound;
mod protocol;
mod stream;
mod wire;

pub use host::{AlwaysServe, AntiLeecher, DhtHandle, FileSystemAdapter, Host};
pub use inbound::IncomingStream;
pub use protocol::{
    ANNOUNCE_PROTOCOL, DATA_PROTOCOL, EXISTS_PROTOCOL, LOOKUP_PROTOCOL, MAX_ANNOUNCE_MESSAGE_SIZE,
    MAX_CHUNK_SIZE, QUERY_METADATA_PROTOCOL,
};
pub use stream::{DuplexStream, Stream};
pub use wire::{AnnounceMessage, ChunkRequest, ExistsResponse, LookupRequest, LookupResponse};

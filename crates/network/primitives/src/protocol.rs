//! Bit-exact protocol id strings (spec.md §4.7, §4.8, §6).

pub const EXISTS_PROTOCOL: &str = "/p2pFileTransfer/getChunk/exists/1.0.0";
pub const DATA_PROTOCOL: &str = "/p2pFileTransfer/getChunk/data/1.0.0";
pub const ANNOUNCE_PROTOCOL: &str = "p2pFileTransfer/Announce/1.0.0";
pub const LOOKUP_PROTOCOL: &str = "p2pFileTransfer/Lookup/1.0.0";

/// Reserved but unimplemented (spec.md §9 open question); left unregistered.
pub const QUERY_METADATA_PROTOCOL: &str = "p2pFileTransfer/QueryMetaData/1.0.0";

pub const MAX_CHUNK_SIZE: usize = 4 * 1024 * 1024;
pub const MAX_ANNOUNCE_MESSAGE_SIZE: usize = 1024;

use std::time::Duration;

use async_trait::async_trait;
use libp2p_identity::PeerId;
use meshfile_primitives::CoreError;

use crate::stream::Stream;

/// The authenticated, multiplexed-stream transport assumed present by
/// spec.md §1: "a libp2p-style host providing authenticated multiplexed
/// streams". NAT traversal, transport security, and the routing table
/// itself are the host's concern, not this crate's.
#[async_trait]
pub trait Host: Send + Sync {
    fn local_peer_id(&self) -> PeerId;

    /// Opens a fresh outbound stream to `peer` on `protocol`.
    async fn open_stream(&self, peer: PeerId, protocol: &str) -> Result<Stream, CoreError>;
}

/// The Kademlia primitives spec.md §4.8 wraps: bootstrap, closest-peers,
/// a namespaced key-value store, and a provider store.
#[async_trait]
pub trait DhtHandle: Send + Sync {
    async fn bootstrap(&self) -> Result<(), CoreError>;

    /// Up to 20 peers closest to `key`, bounded by `deadline` (soft bound;
    /// callers apply their own hard cancellation on top).
    async fn closest_peers(
        &self,
        key: &[u8],
        deadline: Duration,
    ) -> Result<Vec<meshfile_primitives::PeerInfo>, CoreError>;

    async fn put_value(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), CoreError>;
    async fn get_value(&self, key: &[u8]) -> Result<Option<Vec<u8>>, CoreError>;

    async fn add_provider(
        &self,
        key: Vec<u8>,
        provider: meshfile_primitives::PeerInfo,
    ) -> Result<(), CoreError>;
    async fn get_providers(
        &self,
        key: &[u8],
    ) -> Result<Vec<meshfile_primitives::PeerInfo>, CoreError>;
}

/// Extensibility hook for serving policy (spec.md §9: left as a trait,
/// unlike the closed `PeerSelector` variant set, because it is genuinely
/// open-ended). The default policy always serves.
#[async_trait]
pub trait AntiLeecher: Send + Sync {
    async fn should_serve(&self, peer: PeerId) -> bool;
}

pub struct AlwaysServe;

#[async_trait]
impl AntiLeecher for AlwaysServe {
    async fn should_serve(&self, _peer: PeerId) -> bool {
        true
    }
}

/// The download sink named in spec.md §4.9: ordered mode only ever
/// appends, random-access mode writes at an absolute offset.
#[async_trait]
pub trait FileSystemAdapter: Send + Sync {
    async fn write_append(&self, bytes: &[u8]) -> Result<(), CoreError>;
    async fn write_at(&self, offset: u64, bytes: &[u8]) -> Result<(), CoreError>;
}

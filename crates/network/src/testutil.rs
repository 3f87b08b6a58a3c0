//! An in-memory `Host`/`DhtHandle` double wiring several simulated nodes
//! together in one process, for exercising the S3-S6 scenarios from
//! spec.md §8 without a real libp2p swarm.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use libp2p_identity::PeerId;
use meshfile_network_primitives::{DhtHandle, Host, IncomingStream, Stream};
use meshfile_primitives::{CoreError, PeerInfo};
use tokio::io::duplex;
use tokio::sync::{mpsc, Mutex};

const CHANNEL_BUFFER: usize = 256;
const STREAM_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Default)]
struct HubState {
    inboxes: HashMap<PeerId, mpsc::Sender<IncomingStream>>,
}

/// The shared switchboard every `InMemoryHost` dials through.
#[derive(Default)]
pub struct InMemoryHub {
    state: Mutex<HubState>,
}

impl InMemoryHub {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers `peer` as a listener, returning the receiver its
    /// dispatcher loop should drain.
    pub async fn register(&self, peer: PeerId) -> mpsc::Receiver<IncomingStream> {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER);
        self.state.lock().await.inboxes.insert(peer, tx);
        rx
    }
}

/// A `Host` implementation backed by `tokio::io::duplex` pipes instead of
/// a real transport; `open_stream` hands the remote end to the target
/// peer's registered dispatcher.
pub struct InMemoryHost {
    local_peer_id: PeerId,
    hub: Arc<InMemoryHub>,
}

impl InMemoryHost {
    #[must_use]
    pub const fn new(local_peer_id: PeerId, hub: Arc<InMemoryHub>) -> Self {
        Self { local_peer_id, hub }
    }
}

#[async_trait]
impl Host for InMemoryHost {
    fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    async fn open_stream(&self, peer: PeerId, protocol: &str) -> Result<Stream, CoreError> {
        let inbox = {
            let state = self.hub.state.lock().await;
            state.inboxes.get(&peer).cloned()
        };
        let Some(inbox) = inbox else {
            return Err(CoreError::RetryableIo {
                peer_id: Some(peer),
                chunk_hash: None,
                source: std::io::Error::new(std::io::ErrorKind::NotConnected, "peer not registered"),
            });
        };

        let (local_half, remote_half) = duplex(STREAM_BUFFER_SIZE);
        inbox
            .send(IncomingStream {
                protocol: protocol.to_string(),
                remote: self.local_peer_id,
                stream: Box::pin(remote_half),
            })
            .await
            .map_err(|_| CoreError::RetryableIo {
                peer_id: Some(peer),
                chunk_hash: None,
                source: std::io::Error::new(std::io::ErrorKind::NotConnected, "peer dispatcher gone"),
            })?;

        Ok(Box::pin(local_half))
    }
}

#[derive(Default)]
pub struct DhtState {
    kv: HashMap<Vec<u8>, Vec<u8>>,
    providers: HashMap<Vec<u8>, Vec<PeerInfo>>,
    known_peers: Vec<PeerInfo>,
}

/// A DHT double: one shared, globally-converged table standing in for
/// Kademlia's eventually-converged routing and provider stores. Good
/// enough to exercise announce/lookup fan-out and put/get semantics;
/// it does not model routing-table locality or partial convergence.
pub struct InMemoryDht {
    shared: Arc<Mutex<DhtState>>,
    local: PeerInfo,
}

impl InMemoryDht {
    /// Joins `local` to a shared DHT table, registering it so other
    /// members' `closest_peers` calls can find it.
    pub async fn join(shared: &Arc<Mutex<DhtState>>, local: PeerInfo) -> Self {
        shared.lock().await.known_peers.push(local.clone());
        Self {
            shared: Arc::clone(shared),
            local,
        }
    }

    #[must_use]
    pub fn new_table() -> Arc<Mutex<DhtState>> {
        Arc::new(Mutex::new(DhtState::default()))
    }
}

#[async_trait]
impl DhtHandle for InMemoryDht {
    async fn bootstrap(&self) -> Result<(), CoreError> {
        Ok(())
    }

    async fn closest_peers(&self, _key: &[u8], _deadline: Duration) -> Result<Vec<PeerInfo>, CoreError> {
        let state = self.shared.lock().await;
        Ok(state
            .known_peers
            .iter()
            .filter(|p| p.id != self.local.id)
            .take(20)
            .cloned()
            .collect())
    }

    async fn put_value(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), CoreError> {
        self.shared.lock().await.kv.insert(key, value);
        Ok(())
    }

    async fn get_value(&self, key: &[u8]) -> Result<Option<Vec<u8>>, CoreError> {
        Ok(self.shared.lock().await.kv.get(key).cloned())
    }

    async fn add_provider(&self, key: Vec<u8>, provider: PeerInfo) -> Result<(), CoreError> {
        let mut state = self.shared.lock().await;
        let entry = state.providers.entry(key).or_default();
        if !entry.iter().any(|p| p.id == provider.id) {
            entry.push(provider);
        }
        Ok(())
    }

    async fn get_providers(&self, key: &[u8]) -> Result<Vec<PeerInfo>, CoreError> {
        Ok(self.shared.lock().await.providers.get(key).cloned().unwrap_or_default())
    }
}

use std::sync::Arc;
use std::time::Duration;

use libp2p_identity::PeerId;
use meshfile_network_primitives::{
    AnnounceMessage, DhtHandle, Host, LookupRequest, LookupResponse, ANNOUNCE_PROTOCOL,
    LOOKUP_PROTOCOL, MAX_ANNOUNCE_MESSAGE_SIZE,
};
use meshfile_primitives::{CoreError, Digest, PeerInfo};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::time::timeout;
use tracing::{debug, warn};

const CLOSEST_PEERS_DEADLINE: Duration = Duration::from_secs(3);
const ANNOUNCE_WRITE_DEADLINE: Duration = Duration::from_secs(5);
const LOOKUP_TOTAL_DEADLINE: Duration = Duration::from_secs(5);
const LOOKUP_PER_PEER_DEADLINE: Duration = Duration::from_secs(5);
const ANNOUNCE_READ_DEADLINE: Duration = Duration::from_secs(5);

fn io_err(source: std::io::Error) -> CoreError {
    CoreError::RetryableIo {
        peer_id: None,
        chunk_hash: None,
        source,
    }
}

fn timed_out() -> CoreError {
    io_err(std::io::Error::new(std::io::ErrorKind::TimedOut, "dht deadline exceeded"))
}

/// Announce/lookup on top of the host's Kademlia primitives (spec.md §4.8).
pub struct DhtService {
    host: Arc<dyn Host>,
    dht: Arc<dyn DhtHandle>,
    namespace: String,
}

impl DhtService {
    #[must_use]
    pub fn new(host: Arc<dyn Host>, dht: Arc<dyn DhtHandle>, namespace: impl Into<String>) -> Self {
        Self {
            host,
            dht,
            namespace: namespace.into(),
        }
    }

    fn namespaced(&self, key: &str) -> Vec<u8> {
        format!("/{}/{}", self.namespace, key).into_bytes()
    }

    pub async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), CoreError> {
        self.dht.put_value(self.namespaced(key), value).await
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CoreError> {
        self.dht.get_value(&self.namespaced(key)).await
    }

    /// Announces that the local node holds `chunk_hash` (spec.md §4.8
    /// announce protocol, with self-providing fallback).
    pub async fn announce(&self, chunk_hash: Digest, self_info: PeerInfo) -> Result<(), CoreError> {
        let peers = self
            .dht
            .closest_peers(chunk_hash.as_bytes(), CLOSEST_PEERS_DEADLINE)
            .await
            .unwrap_or_default();

        if peers.is_empty() {
            debug!(%chunk_hash, "no closest peers found, self-providing");
            return self
                .dht
                .add_provider(chunk_hash.as_bytes().to_vec(), self_info)
                .await;
        }

        let message = AnnounceMessage {
            chunk_hash: chunk_hash.to_hex(),
            peer_info: self_info,
        };
        let bytes = serde_json::to_vec(&message)
            .map_err(|e| CoreError::Protocol { peer_id: None, message: format!("announce encode failed: {e}") })?;
        if bytes.len() > MAX_ANNOUNCE_MESSAGE_SIZE {
            return Err(CoreError::Input("announce message exceeds 1024 bytes".into()));
        }

        let mut line = bytes;
        line.push(b'\n');

        for peer in peers {
            let Ok(mut stream) = timeout(ANNOUNCE_WRITE_DEADLINE, self.host.open_stream(peer.id, ANNOUNCE_PROTOCOL)).await else {
                continue;
            };
            let Ok(mut stream) = stream else {
                continue;
            };
            if timeout(ANNOUNCE_WRITE_DEADLINE, stream.write_all(&line)).await.is_ok() {
                let _ignore = stream.shutdown().await;
                return Ok(());
            }
        }

        Err(CoreError::RetryableIo {
            peer_id: None,
            chunk_hash: Some(chunk_hash),
            source: std::io::Error::new(std::io::ErrorKind::Other, "no peer acknowledged the announce"),
        })
    }

    /// Looks up providers for `chunk_hash`, fanning out concurrently and
    /// returning the first non-empty provider list (spec.md §4.8 lookup).
    pub async fn lookup(&self, chunk_hash: Digest) -> Result<Vec<PeerInfo>, CoreError> {
        let peers = self
            .dht
            .closest_peers(chunk_hash.as_bytes(), CLOSEST_PEERS_DEADLINE)
            .await?;
        if peers.is_empty() {
            return Ok(Vec::new());
        }

        let request = LookupRequest::new(chunk_hash.to_hex());
        let mut line = serde_json::to_vec(&request)
            .map_err(|e| CoreError::Protocol { peer_id: None, message: format!("lookup encode failed: {e}") })?;
        line.push(b'\n');

        let fetch_all = async {
            let mut futures: futures_util::stream::FuturesUnordered<_> = peers
                .into_iter()
                .map(|peer| {
                    let line = line.clone();
                    let host = Arc::clone(&self.host);
                    async move { fetch_providers(&*host, peer.id, &line).await }
                })
                .collect();

            while let Some(result) = futures_util::StreamExt::next(&mut futures).await {
                if let Ok(providers) = result {
                    if !providers.is_empty() {
                        return Ok(providers);
                    }
                }
            }
            Ok(Vec::new())
        };

        match timeout(LOOKUP_TOTAL_DEADLINE, fetch_all).await {
            Ok(result) => result,
            Err(_) => Err(timed_out()),
        }
    }
}

async fn fetch_providers(host: &dyn Host, peer: PeerId, line: &[u8]) -> Result<Vec<PeerInfo>, CoreError> {
    let mut stream = timeout(LOOKUP_PER_PEER_DEADLINE, host.open_stream(peer, LOOKUP_PROTOCOL))
        .await
        .map_err(|_| timed_out())??;

    timeout(LOOKUP_PER_PEER_DEADLINE, stream.write_all(line))
        .await
        .map_err(|_| timed_out())?
        .map_err(io_err)?;

    let mut reader = BufReader::new(stream);
    let mut response_line = String::new();
    timeout(LOOKUP_PER_PEER_DEADLINE, reader.read_line(&mut response_line))
        .await
        .map_err(|_| timed_out())?
        .map_err(io_err)?;

    let response: LookupResponse = serde_json::from_str(response_line.trim_end())
        .map_err(|e| CoreError::Protocol { peer_id: Some(peer), message: format!("bad lookup response: {e}") })?;
    Ok(response.providers)
}

/// Server side of the announce protocol: reads one line, inserts the
/// provider record.
pub async fn serve_announce(stream: meshfile_network_primitives::Stream, dht: &dyn DhtHandle) {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let Ok(Ok(read)) = timeout(ANNOUNCE_READ_DEADLINE, reader.read_line(&mut line)).await else {
        return;
    };
    if read == 0 || line.len() > MAX_ANNOUNCE_MESSAGE_SIZE {
        return;
    }
    let Ok(message) = serde_json::from_str::<AnnounceMessage>(line.trim_end()) else {
        warn!("announce message failed to decode");
        return;
    };
    if message.chunk_hash.is_empty() {
        return;
    }
    let Ok(chunk_hash) = message.chunk_hash.parse::<Digest>() else {
        return;
    };
    let _ignore = dht.add_provider(chunk_hash.as_bytes().to_vec(), message.peer_info).await;
}

/// Server side of the lookup protocol: reads one request line, answers
/// with the locally known providers.
pub async fn serve_lookup(stream: meshfile_network_primitives::Stream, dht: &dyn DhtHandle) {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let Ok(Ok(read)) = timeout(LOOKUP_PER_PEER_DEADLINE, reader.read_line(&mut line)).await else {
        return;
    };
    if read == 0 {
        return;
    }
    let Ok(request) = serde_json::from_str::<LookupRequest>(line.trim_end()) else {
        return;
    };

    let key_bytes = request
        .key
        .parse::<Digest>()
        .map_or_else(|_| request.key.clone().into_bytes(), |digest| digest.as_bytes().to_vec());
    let providers = dht.get_providers(&key_bytes).await.unwrap_or_default();
    let response = LookupResponse { providers };
    let Ok(mut bytes) = serde_json::to_vec(&response) else {
        return;
    };
    bytes.push(b'\n');

    let mut stream = reader.into_inner();
    let _ignore = timeout(LOOKUP_PER_PEER_DEADLINE, stream.write_all(&bytes)).await;
    let _ignore = stream.shutdown().await;
}

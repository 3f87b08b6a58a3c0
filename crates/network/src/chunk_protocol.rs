use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use libp2p_identity::PeerId;
use meshfile_network_primitives::{
    AntiLeecher, ChunkRequest, ExistsResponse, Host, Stream, DATA_PROTOCOL, EXISTS_PROTOCOL,
    MAX_CHUNK_SIZE,
};
use meshfile_peer::{ChunkExistenceProbe, ConnectionManager, LatencyProbe};
use meshfile_primitives::{CoreError, Digest};
use meshfile_store::ChunkStore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Timeouts for the two chunk protocols (spec.md §4.7).
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub struct ChunkProtocolConfig {
    pub request_timeout: Duration,
    pub data_timeout: Duration,
}

impl Default for ChunkProtocolConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            data_timeout: Duration::from_secs(30),
        }
    }
}

fn io_err(peer: PeerId, chunk_hash: Digest, source: std::io::Error) -> CoreError {
    CoreError::RetryableIo {
        peer_id: Some(peer),
        chunk_hash: Some(chunk_hash),
        source,
    }
}

fn elapsed_err(peer: PeerId, chunk_hash: Digest) -> CoreError {
    io_err(
        peer,
        chunk_hash,
        std::io::Error::new(std::io::ErrorKind::TimedOut, "deadline exceeded"),
    )
}

fn protocol_err(peer: PeerId, message: impl Into<String>) -> CoreError {
    CoreError::Protocol {
        peer_id: Some(peer),
        message: message.into(),
    }
}

async fn request_response(
    mut stream: Stream,
    peer: PeerId,
    chunk_hash: Digest,
    request_timeout: Duration,
) -> Result<Stream, CoreError> {
    let request = ChunkRequest::new(chunk_hash.to_hex());
    let bytes = serde_json::to_vec(&request)
        .map_err(|e| protocol_err(peer, format!("failed to encode request: {e}")))?;

    timeout(request_timeout, stream.write_all(&bytes))
        .await
        .map_err(|_| elapsed_err(peer, chunk_hash))?
        .map_err(|e| io_err(peer, chunk_hash, e))?;
    timeout(request_timeout, stream.shutdown())
        .await
        .map_err(|_| elapsed_err(peer, chunk_hash))?
        .map_err(|e| io_err(peer, chunk_hash, e))?;

    Ok(stream)
}

/// Client side of the `ChunkProtocol` state machine (spec.md §4.7
/// `DownloadChunk`). Acquires a stream slot from `connections`, runs the
/// request/response exchange, and records success or failure for the
/// peer selector's benefit.
pub struct ChunkProtocolClient {
    host: Arc<dyn Host>,
    connections: Arc<ConnectionManager>,
    config: ChunkProtocolConfig,
}

impl ChunkProtocolClient {
    #[must_use]
    pub fn new(
        host: Arc<dyn Host>,
        connections: Arc<ConnectionManager>,
        config: ChunkProtocolConfig,
    ) -> Self {
        Self {
            host,
            connections,
            config,
        }
    }

    /// `Idle → AcquireSlot → OpenStream → WriteRequest → ReadLoop → Done`.
    async fn run(&self, peer: PeerId, chunk_hash: Digest, protocol: &'static str) -> Result<Vec<u8>, CoreError> {
        self.connections
            .acquire_stream(peer)
            .await
            .map_err(|_| {
                io_err(
                    peer,
                    chunk_hash,
                    std::io::Error::new(std::io::ErrorKind::WouldBlock, "admission denied"),
                )
            })?;

        let started = std::time::Instant::now();
        let outcome = self.run_inner(peer, chunk_hash, protocol).await;

        match &outcome {
            Ok(_) => self.connections.record_success(peer, started.elapsed()).await,
            Err(e) if e.is_retryable() => self.connections.record_failure(peer).await,
            Err(_) => {}
        }
        self.connections.release_stream(peer).await;
        outcome
    }

    async fn run_inner(
        &self,
        peer: PeerId,
        chunk_hash: Digest,
        protocol: &'static str,
    ) -> Result<Vec<u8>, CoreError> {
        let stream = timeout(self.config.request_timeout, self.host.open_stream(peer, protocol))
            .await
            .map_err(|_| elapsed_err(peer, chunk_hash))??;

        let mut stream = request_response(stream, peer, chunk_hash, self.config.request_timeout).await?;

        let mut buf = Vec::new();
        let read = timeout(
            self.config.data_timeout,
            stream.take(MAX_CHUNK_SIZE as u64 + 1).read_to_end(&mut buf),
        )
        .await
        .map_err(|_| elapsed_err(peer, chunk_hash))?
        .map_err(|e| io_err(peer, chunk_hash, e))?;

        if read > MAX_CHUNK_SIZE {
            return Err(protocol_err(peer, "chunk exceeded MaxChunkSize"));
        }
        Ok(buf)
    }

    /// Runs the existence probe (`/p2pFileTransfer/getChunk/exists/1.0.0`).
    pub async fn exists(&self, peer: PeerId, chunk_hash: Digest) -> Result<bool, CoreError> {
        let bytes = self.run(peer, chunk_hash, EXISTS_PROTOCOL).await?;
        let response: ExistsResponse =
            serde_json::from_slice(&bytes).map_err(|e| protocol_err(peer, format!("bad exists response: {e}")))?;
        Ok(response.0)
    }

    /// Runs the data fetch (`/p2pFileTransfer/getChunk/data/1.0.0`) and
    /// verifies the returned bytes hash to `chunk_hash`.
    pub async fn download(&self, peer: PeerId, chunk_hash: Digest) -> Result<Vec<u8>, CoreError> {
        let bytes = self.run(peer, chunk_hash, DATA_PROTOCOL).await?;
        if Digest::new(meshfile_primitives::sha256(&bytes)) != chunk_hash {
            return Err(protocol_err(peer, "downloaded bytes did not hash to the requested digest"));
        }
        Ok(bytes)
    }
}

#[async_trait]
impl ChunkExistenceProbe for ChunkProtocolClient {
    async fn exists(&self, peer: PeerId, chunk_hash: Digest) -> Result<bool, CoreError> {
        Self::exists(self, peer, chunk_hash).await
    }
}

#[async_trait]
impl LatencyProbe for ChunkProtocolClient {
    async fn probe_rtt(&self, peer: PeerId, timeout_duration: Duration) -> Option<Duration> {
        let started = std::time::Instant::now();
        let probed = timeout(timeout_duration, self.exists(peer, Digest::zero()));
        match probed.await {
            Ok(Ok(_)) => Some(started.elapsed()),
            _ => None,
        }
    }
}

/// Server side: reads one request, serves one response, closes.
pub async fn serve_exists(
    mut stream: Stream,
    peer: PeerId,
    store: &ChunkStore,
    anti_leecher: &dyn AntiLeecher,
    request_timeout: Duration,
) {
    if !anti_leecher.should_serve(peer).await {
        debug!(%peer, "anti-leecher refused exists request");
        return;
    }
    let Some(request) = read_request(&mut stream, request_timeout).await else {
        return;
    };
    let Ok(chunk_hash) = request.chunk_hash.parse::<Digest>() else {
        warn!(%peer, "exists request carried an invalid digest");
        return;
    };

    let exists = store.exists(chunk_hash).await.unwrap_or(false);
    let response = ExistsResponse(exists);
    if let Ok(bytes) = serde_json::to_vec(&response) {
        let _ignore = timeout(request_timeout, stream.write_all(&bytes)).await;
    }
    let _ignore = stream.shutdown().await;
}

/// Returns the number of bytes written on a successful serve, so a caller
/// tracking aggregate stats doesn't have to re-read the request itself.
pub async fn serve_data(
    mut stream: Stream,
    peer: PeerId,
    store: &ChunkStore,
    anti_leecher: &dyn AntiLeecher,
    request_timeout: Duration,
    data_timeout: Duration,
) -> Option<u64> {
    if !anti_leecher.should_serve(peer).await {
        debug!(%peer, "anti-leecher refused data request");
        return None;
    }
    let request = read_request(&mut stream, request_timeout).await?;
    let Ok(chunk_hash) = request.chunk_hash.parse::<Digest>() else {
        warn!(%peer, "data request carried an invalid digest");
        return None;
    };

    let served = match store.get(chunk_hash).await {
        Ok(bytes) => {
            let written = timeout(data_timeout, stream.write_all(&bytes)).await.is_ok();
            written.then_some(bytes.len() as u64)
        }
        Err(_) => {
            debug!(%peer, %chunk_hash, "data request for unknown chunk");
            None
        }
    };
    let _ignore = stream.shutdown().await;
    served
}

async fn read_request(stream: &mut Stream, request_timeout: Duration) -> Option<ChunkRequest> {
    let mut buf = Vec::new();
    let read = timeout(request_timeout, stream.read_to_end(&mut buf)).await.ok()?.ok()?;
    if read == 0 {
        return None;
    }
    serde_json::from_slice(&buf).ok()
}

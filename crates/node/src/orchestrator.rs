use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use futures_util::stream::{self, StreamExt};
use libp2p_identity::PeerId;
use meshfile_crypto::ChameleonPubKey;
use meshfile_merkle::{ChameleonTree, MerkleBuilder};
use meshfile_network::{ChunkProtocolClient, DhtService};
use meshfile_network_primitives::FileSystemAdapter;
use meshfile_peer::{select_available, PeerSelector};
use meshfile_primitives::{Chunk, ChunkData, CoreError, Digest, Encryption, Metadata, PeerInfo, TreeType};
use meshfile_store::ChunkStore;
use tokio_util::sync::CancellationToken;

use crate::types::{DownloadProgress, NodeStats, PublishReceipt};

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// How a download's bytes reach the caller's sink (spec.md §4.9 step 4).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeliveryMode {
    /// Every leaf is buffered in memory; the sink only ever receives
    /// sequential appends, in file order, once every leaf has arrived.
    Ordered,
    /// Each leaf is written at its absolute offset as soon as it arrives;
    /// the sink must support positional writes.
    RandomAccess,
}

type ProgressCallback = Arc<dyn Fn(DownloadProgress) + Send + Sync>;

/// Drives both data flows in spec.md §2: fetching a file given its CID
/// (`download`) and publishing one (`publish`, the mirror image, added per
/// SPEC_FULL.md §4.9).
pub struct DownloadOrchestrator {
    dht: Arc<DhtService>,
    protocol: Arc<ChunkProtocolClient>,
    store: Arc<ChunkStore>,
    selector: PeerSelector,
    metadata_path: Utf8PathBuf,
    self_info: PeerInfo,
    max_concurrency: u32,
    max_retries: u32,
    stats: Option<Arc<NodeStats>>,
}

impl DownloadOrchestrator {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dht: Arc<DhtService>,
        protocol: Arc<ChunkProtocolClient>,
        store: Arc<ChunkStore>,
        selector: PeerSelector,
        metadata_path: Utf8PathBuf,
        self_info: PeerInfo,
        max_concurrency: u32,
        max_retries: u32,
        stats: Option<Arc<NodeStats>>,
    ) -> Self {
        Self {
            dht,
            protocol,
            store,
            selector,
            metadata_path,
            self_info,
            max_concurrency,
            max_retries,
            stats,
        }
    }

    fn local_metadata_path(&self, cid: Digest) -> Utf8PathBuf {
        self.metadata_path.join(format!("{}.json", cid.to_hex()))
    }

    /// Loads metadata for `cid`: local metadata directory first, then a
    /// DHT lookup (spec.md §4.9 step 1).
    async fn load_metadata(&self, cid: Digest) -> Result<Metadata, CoreError> {
        let local_path = self.local_metadata_path(cid);
        if let Ok(bytes) = tokio::fs::read(&local_path).await {
            return serde_json::from_slice(&bytes)
                .map_err(|e| CoreError::Input(format!("malformed local metadata for {cid}: {e}")));
        }

        let value = self
            .dht
            .get(&cid.to_hex())
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("no metadata found for cid {cid}")))?;
        serde_json::from_slice(&value)
            .map_err(|e| CoreError::Input(format!("malformed dht metadata for {cid}: {e}")))
    }

    /// Fetches the file identified by `cid` into `sink`.
    ///
    /// # Errors
    /// `NotFound` if metadata cannot be located; `DownloadFailed` once a
    /// leaf exhausts `max_retries`; `Cancelled` if `cancel` fires first.
    pub async fn download(
        &self,
        cid: Digest,
        sink: Arc<dyn FileSystemAdapter>,
        mode: DeliveryMode,
        cancel: CancellationToken,
        on_progress: Option<ProgressCallback>,
    ) -> Result<(), CoreError> {
        let metadata = self.load_metadata(cid).await?;
        metadata.validate().map_err(|e| CoreError::Input(e.to_string()))?;

        let total_chunks = metadata.leaves.len();
        let total_bytes = metadata.file_size;
        let mut offsets = Vec::with_capacity(total_chunks);
        let mut acc: u64 = 0;
        for leaf in &metadata.leaves {
            offsets.push(acc);
            acc += u64::from(leaf.chunk_size);
        }

        let downloaded = AtomicU64::new(0);
        let mut ordered_results: Vec<Option<Vec<u8>>> = match mode {
            DeliveryMode::Ordered => vec![None; total_chunks],
            DeliveryMode::RandomAccess => Vec::new(),
        };

        let leaf_hashes: Vec<Digest> = metadata.leaves.iter().map(|l| l.chunk_hash).collect();
        let mut stream = stream::iter(leaf_hashes.into_iter().enumerate().map(|(index, hash)| {
            let cancel = cancel.clone();
            async move { (index, self.fetch_leaf(index, hash, cancel).await) }
        }))
        .buffer_unordered(self.max_concurrency as usize);

        let mut failure: Option<CoreError> = None;
        loop {
            let next = tokio::select! {
                () = cancel.cancelled() => None,
                item = stream.next() => item,
            };
            let Some((index, result)) = next else { break };

            match result {
                Ok(bytes) => {
                    let leaf_bytes = bytes.len() as u64;
                    if let Some(stats) = &self.stats {
                        stats.record_fetched(leaf_bytes);
                    }
                    if mode == DeliveryMode::RandomAccess {
                        if let Err(e) = sink.write_at(offsets[index], &bytes).await {
                            failure = Some(e);
                            cancel.cancel();
                            break;
                        }
                    } else {
                        ordered_results[index] = Some(bytes);
                    }

                    let so_far = downloaded.fetch_add(leaf_bytes, Ordering::Relaxed) + leaf_bytes;
                    if let Some(cb) = &on_progress {
                        cb(DownloadProgress {
                            chunk_index: index,
                            total_chunks,
                            downloaded_bytes: so_far,
                            total_bytes,
                        });
                    }
                }
                Err(e) => {
                    failure = Some(e);
                    cancel.cancel();
                    break;
                }
            }
        }

        if let Some(err) = failure {
            return Err(err);
        }
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }

        if mode == DeliveryMode::Ordered {
            for bytes in ordered_results {
                let bytes = bytes.expect("every worker completed successfully before this point");
                sink.write_append(&bytes).await?;
            }
        }

        Ok(())
    }

    /// One leaf's lookup→select→download cycle, retried with exponential
    /// backoff up to `max_retries` times (spec.md §4.9 step 5).
    async fn fetch_leaf(&self, index: usize, chunk_hash: Digest, cancel: CancellationToken) -> Result<Vec<u8>, CoreError> {
        let mut backoff = INITIAL_BACKOFF;
        let mut last_err = CoreError::NotFound(format!("leaf {index} was never attempted"));

        for attempt in 0..=self.max_retries {
            if cancel.is_cancelled() {
                return Err(CoreError::Cancelled);
            }

            match self.try_fetch_once(chunk_hash, &cancel).await {
                Ok(bytes) => return Ok(bytes),
                Err(CoreError::Cancelled) => return Err(CoreError::Cancelled),
                Err(e) => {
                    last_err = e;
                    if attempt == self.max_retries {
                        break;
                    }
                    if cancellable_sleep(&cancel, backoff).await.is_err() {
                        return Err(CoreError::Cancelled);
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }

        let exhausted = CoreError::Exhausted {
            attempts: self.max_retries + 1,
            providers_tried: self.max_retries + 1,
        };
        Err(CoreError::DownloadFailed {
            chunk_index: index,
            cause: format!("{exhausted}: {last_err}"),
        })
    }

    async fn try_fetch_once(&self, chunk_hash: Digest, cancel: &CancellationToken) -> Result<Vec<u8>, CoreError> {
        let providers = cancellable(cancel, self.dht.lookup(chunk_hash)).await?;
        if providers.is_empty() {
            return Err(CoreError::NotFound(format!("no providers for chunk {chunk_hash}")));
        }
        let candidates: Vec<PeerId> = providers.iter().map(|p| p.id).collect();

        let peer = cancellable(cancel, async {
            select_available(
                &self.selector,
                &candidates,
                chunk_hash,
                self.protocol.as_ref(),
                Some(self.protocol.as_ref()),
            )
            .await
            .map_err(|e| CoreError::NotFound(e.to_string()))
        })
        .await?;

        cancellable(cancel, self.protocol.download(peer, chunk_hash)).await
    }

    /// Publishes `source` as a new file: builds the (optionally
    /// chameleon-wrapped) Merkle tree, writes every leaf to the chunk
    /// store, announces each leaf to the DHT, and persists `Metadata`
    /// (SPEC_FULL.md §4.9, mirroring spec.md §2's publish data flow).
    ///
    /// # Errors
    /// `Input` for a `Chameleon` tree_type missing a public key or an
    /// empty source; propagates store/DHT errors from lower layers.
    #[allow(clippy::too_many_arguments)]
    pub async fn publish<R>(
        &self,
        source: R,
        file_name: String,
        description: String,
        tree_type: TreeType,
        chameleon_pk: Option<ChameleonPubKey>,
        block_size: u32,
        on_progress: Option<ProgressCallback>,
    ) -> Result<PublishReceipt, CoreError>
    where
        R: std::io::Read + Send + 'static,
    {
        let built = tokio::task::spawn_blocking(move || MerkleBuilder::new(block_size as usize).build(source))
            .await
            .map_err(|e| CoreError::Fatal(format!("merkle build task panicked: {e}")))?
            .map_err(|e| CoreError::Input(e.to_string()))?;

        let leaf_hashes: Vec<Digest> = built.chunks.iter().map(Chunk::digest).collect();

        let (root_hash, random_num, public_key) = match tree_type {
            TreeType::Regular => (built.root_hash(), None, None),
            TreeType::Chameleon => {
                let pk = chameleon_pk
                    .ok_or_else(|| CoreError::Input("chameleon tree_type requires a public key".into()))?;
                let mut rng = rand::rngs::OsRng;
                let chameleon = ChameleonTree::build(&mut rng, &leaf_hashes, pk)
                    .map_err(|e| CoreError::Crypto(e.to_string()))?;
                let root = chameleon.root();
                (
                    chameleon.cid(),
                    Some(root.r.to_bytes().to_vec()),
                    Some(root.pk.to_bytes().to_vec()),
                )
            }
        };

        let total_chunks = built.chunks.len();
        let total_bytes: u64 = built.chunks.iter().map(|c| c.len() as u64).sum();
        let mut leaves = Vec::with_capacity(total_chunks);
        let mut processed: u64 = 0;

        for (index, chunk) in built.chunks.iter().enumerate() {
            self.store.put(chunk.digest(), chunk.bytes()).await?;
            self.dht.announce(chunk.digest(), self.self_info.clone()).await?;
            leaves.push(ChunkData::new(chunk.len() as u32, chunk.digest()));

            processed += chunk.len() as u64;
            if let Some(cb) = &on_progress {
                cb(DownloadProgress {
                    chunk_index: index,
                    total_chunks,
                    downloaded_bytes: processed,
                    total_bytes,
                });
            }
        }

        let metadata = Metadata {
            root_hash,
            random_num,
            public_key,
            description,
            file_size: total_bytes,
            file_name,
            encryption: Encryption::None,
            tree_type,
            leaves,
        };
        metadata.validate().map_err(|e| CoreError::Input(e.to_string()))?;

        let bytes = serde_json::to_vec(&metadata)
            .map_err(|e| CoreError::Input(format!("failed to encode metadata: {e}")))?;
        let path = self.local_metadata_path(root_hash);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoreError::Fatal(format!("failed to create metadata directory: {e}")))?;
        }
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| CoreError::Fatal(format!("failed to persist metadata: {e}")))?;

        Ok(PublishReceipt {
            cid: root_hash,
            tree_type,
            leaf_count: total_chunks,
            file_size: total_bytes,
        })
    }
}

async fn cancellable<F, T>(cancel: &CancellationToken, fut: F) -> Result<T, CoreError>
where
    F: Future<Output = Result<T, CoreError>>,
{
    tokio::select! {
        () = cancel.cancelled() => Err(CoreError::Cancelled),
        result = fut => result,
    }
}

async fn cancellable_sleep(cancel: &CancellationToken, duration: Duration) -> Result<(), ()> {
    tokio::select! {
        () = cancel.cancelled() => Err(()),
        () = tokio::time::sleep(duration) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use libp2p_identity::Keypair;
    use meshfile_network::testutil::{InMemoryDht, InMemoryHost, InMemoryHub};
    use meshfile_network::ChunkProtocolConfig;
    use meshfile_peer::ConnectionManager;
    use tempfile::tempdir;

    use super::*;

    fn peer_id() -> PeerId {
        Keypair::generate_ed25519().public().to_peer_id()
    }

    struct MemorySink {
        buf: Mutex<Vec<u8>>,
    }

    impl MemorySink {
        fn new(size: usize) -> Self {
            Self { buf: Mutex::new(vec![0_u8; size]) }
        }

        fn into_inner(self) -> Vec<u8> {
            self.buf.into_inner().unwrap()
        }
    }

    #[async_trait]
    impl FileSystemAdapter for MemorySink {
        async fn write_append(&self, bytes: &[u8]) -> Result<(), CoreError> {
            self.buf.lock().unwrap().extend_from_slice(bytes);
            Ok(())
        }

        async fn write_at(&self, offset: u64, bytes: &[u8]) -> Result<(), CoreError> {
            let mut guard = self.buf.lock().unwrap();
            let start = offset as usize;
            guard[start..start + bytes.len()].copy_from_slice(bytes);
            Ok(())
        }
    }

    async fn publish_and_download_round_trip(mode: DeliveryMode) {
        let hub = InMemoryHub::new();
        let local = peer_id();
        let remote = peer_id();

        let local_host = Arc::new(InMemoryHost::new(local, Arc::clone(&hub)));
        let remote_host = Arc::new(InMemoryHost::new(remote, Arc::clone(&hub)));
        let mut remote_inbox = hub.register(remote).await;

        let dht_table = InMemoryDht::new_table();
        let local_dht = Arc::new(InMemoryDht::join(&dht_table, PeerInfo::new(local, vec![])).await);
        let remote_dht = Arc::new(InMemoryDht::join(&dht_table, PeerInfo::new(remote, vec![])).await);

        let remote_store_dir = tempdir().unwrap();
        let remote_store = Arc::new(ChunkStore::new(
            camino::Utf8PathBuf::from_path_buf(remote_store_dir.path().to_path_buf()).unwrap(),
        ));
        let remote_store_task = Arc::clone(&remote_store);
        tokio::spawn(async move {
            while let Some(incoming) = remote_inbox.recv().await {
                let store = Arc::clone(&remote_store_task);
                tokio::spawn(async move {
                    match incoming.protocol.as_str() {
                        meshfile_network_primitives::EXISTS_PROTOCOL => {
                            meshfile_network::serve_exists(
                                incoming.stream,
                                incoming.remote,
                                &store,
                                &meshfile_network_primitives::AlwaysServe as &dyn meshfile_network_primitives::AntiLeecher,
                                Duration::from_secs(5),
                            )
                            .await;
                        }
                        meshfile_network_primitives::DATA_PROTOCOL => {
                            meshfile_network::serve_data(
                                incoming.stream,
                                incoming.remote,
                                &store,
                                &meshfile_network_primitives::AlwaysServe as &dyn meshfile_network_primitives::AntiLeecher,
                                Duration::from_secs(5),
                                Duration::from_secs(30),
                            )
                            .await;
                        }
                        _ => {}
                    }
                });
            }
        });

        let metadata_dir = tempdir().unwrap();
        let metadata_path = camino::Utf8PathBuf::from_path_buf(metadata_dir.path().to_path_buf()).unwrap();

        let publisher = DownloadOrchestrator::new(
            Arc::new(DhtService::new(Arc::clone(&remote_host) as _, remote_dht as _, "v")),
            Arc::new(ChunkProtocolClient::new(
                Arc::clone(&remote_host) as _,
                Arc::new(ConnectionManager::default()),
                ChunkProtocolConfig::default(),
            )),
            Arc::clone(&remote_store),
            PeerSelector::round_robin(),
            metadata_path.clone(),
            PeerInfo::new(remote, vec![]),
            4,
            3,
            None,
        );

        let data = vec![7_u8; 10_000];
        let receipt = publisher
            .publish(
                std::io::Cursor::new(data.clone()),
                "f.bin".to_string(),
                "a test file".to_string(),
                TreeType::Regular,
                None,
                4096,
                None,
            )
            .await
            .unwrap();

        let downloader = DownloadOrchestrator::new(
            Arc::new(DhtService::new(Arc::clone(&local_host) as _, local_dht as _, "v")),
            Arc::new(ChunkProtocolClient::new(
                local_host as _,
                Arc::new(ConnectionManager::default()),
                ChunkProtocolConfig::default(),
            )),
            Arc::new(ChunkStore::new(
                camino::Utf8PathBuf::from_path_buf(tempdir().unwrap().path().to_path_buf()).unwrap(),
            )),
            PeerSelector::round_robin(),
            metadata_path,
            PeerInfo::new(local, vec![]),
            4,
            3,
            None,
        );

        let sink = Arc::new(MemorySink::new(data.len()));
        downloader
            .download(
                receipt.cid,
                Arc::clone(&sink) as _,
                mode,
                CancellationToken::new(),
                None,
            )
            .await
            .unwrap();

        let sink = Arc::into_inner(sink).unwrap();
        assert_eq!(sink.into_inner(), data);
    }

    #[tokio::test]
    async fn ordered_publish_then_download_round_trips() {
        publish_and_download_round_trip(DeliveryMode::Ordered).await;
    }

    #[tokio::test]
    async fn random_access_publish_then_download_round_trips() {
        publish_and_download_round_trip(DeliveryMode::RandomAccess).await;
    }

    #[tokio::test]
    async fn download_of_unknown_cid_fails_not_found() -> eyre::Result<()> {
        let hub = InMemoryHub::new();
        let local = peer_id();
        let local_host = Arc::new(InMemoryHost::new(local, hub));
        let dht_table = InMemoryDht::new_table();
        let local_dht = Arc::new(InMemoryDht::join(&dht_table, PeerInfo::new(local, vec![])).await);

        let orchestrator = DownloadOrchestrator::new(
            Arc::new(DhtService::new(Arc::clone(&local_host) as _, local_dht as _, "v")),
            Arc::new(ChunkProtocolClient::new(
                local_host as _,
                Arc::new(ConnectionManager::default()),
                ChunkProtocolConfig::default(),
            )),
            Arc::new(ChunkStore::new(camino::Utf8PathBuf::from_path_buf(tempdir()?.path().to_path_buf()).unwrap())),
            PeerSelector::round_robin(),
            camino::Utf8PathBuf::from_path_buf(tempdir()?.path().to_path_buf()).unwrap(),
            PeerInfo::new(local, vec![]),
            4,
            3,
            None,
        );

        let sink = Arc::new(MemorySink::new(0));
        let result = orchestrator
            .download(Digest::zero(), sink, DeliveryMode::Ordered, CancellationToken::new(), None)
            .await;
        assert!(matches!(result, Err(CoreError::NotFound(_))));
        Ok(())
    }
}

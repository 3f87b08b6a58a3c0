use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use libp2p_identity::PeerId;
use meshfile_network::{
    serve_announce, serve_data, serve_exists, serve_lookup, ChunkProtocolClient, ChunkProtocolConfig,
    DhtService,
};
use meshfile_network_primitives::{
    AlwaysServe, AntiLeecher, DhtHandle, Host, IncomingStream, ANNOUNCE_PROTOCOL, DATA_PROTOCOL,
    EXISTS_PROTOCOL, LOOKUP_PROTOCOL,
};
use meshfile_peer::{ConnectionManager, ConnectionManagerConfig, PeerSelector};
use meshfile_primitives::{CoreError, PeerInfo};
use meshfile_store::ChunkStore;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{AntiLeecherConfig, NodeConfig};
use crate::orchestrator::{DeliveryMode, DownloadOrchestrator};
use crate::types::{DownloadProgress, NodeStats, NodeStatsSnapshot, PublishReceipt};

const MAX_IDLE_TIME: Duration = Duration::from_secs(600);
const DHT_REFRESH_INTERVAL: Duration = Duration::from_secs(300);
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(5);

/// Consults the same `ConnectionManager` the download path records
/// successes and failures into, so a peer that behaves badly in either
/// direction ends up denied service (spec.md §4.5 blacklist, wired to the
/// open-ended anti-leecher hook from spec.md §9).
struct ManagedAntiLeecher {
    connections: Arc<ConnectionManager>,
    policy: AntiLeecherConfig,
}

#[async_trait]
impl AntiLeecher for ManagedAntiLeecher {
    async fn should_serve(&self, peer: PeerId) -> bool {
        let already_blacklisted = self
            .connections
            .info(peer)
            .await
            .is_some_and(|info| info.blacklisted);
        if already_blacklisted {
            return false;
        }
        !self
            .connections
            .should_blacklist(peer, self.policy.min_success_rate, u64::from(self.policy.min_requests))
            .await
    }
}

/// The node facade (spec.md §4.10): owns the transport handle, the DHT,
/// the chunk store, and the download/publish orchestrator, and dispatches
/// the four inbound protocol handlers against whatever `Host`
/// implementation delivers `IncomingStream`s to it.
pub struct Node {
    host: Arc<dyn Host>,
    dht: Arc<dyn DhtHandle>,
    dht_service: Arc<DhtService>,
    store: Arc<ChunkStore>,
    connections: Arc<ConnectionManager>,
    anti_leecher: Arc<dyn AntiLeecher>,
    orchestrator: Arc<DownloadOrchestrator>,
    stats: Arc<NodeStats>,
    self_info: PeerInfo,
    config: NodeConfig,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Node {
    /// Builds a node around `host`/`dht` and starts its background
    /// dispatch loop over `inbound` (and, when `auto_refresh` is set, a
    /// periodic DHT bootstrap). The constructor never blocks: dispatch
    /// happens on spawned tasks tracked for `shutdown`.
    #[must_use]
    pub fn new(
        host: Arc<dyn Host>,
        dht: Arc<dyn DhtHandle>,
        config: NodeConfig,
        self_info: PeerInfo,
        inbound: mpsc::Receiver<IncomingStream>,
    ) -> Self {
        let connections = Arc::new(ConnectionManager::new({
            let mut manager_config = ConnectionManagerConfig::default();
            manager_config.max_streams = config.buffer_number;
            manager_config.blacklist_timeout = config.anti_leecher.blacklist_timeout;
            manager_config.max_idle_time = MAX_IDLE_TIME;
            manager_config
        }));

        let protocol = Arc::new(ChunkProtocolClient::new(
            Arc::clone(&host),
            Arc::clone(&connections),
            {
                let mut protocol_config = ChunkProtocolConfig::default();
                protocol_config.request_timeout = config.request_timeout;
                protocol_config.data_timeout = config.data_timeout;
                protocol_config
            },
        ));
        let dht_service = Arc::new(DhtService::new(Arc::clone(&host), Arc::clone(&dht), config.namespace.clone()));
        let store = Arc::new(ChunkStore::new(config.chunk_path.clone()));
        let stats = Arc::new(NodeStats::default());

        let anti_leecher: Arc<dyn AntiLeecher> = if config.anti_leecher.enabled {
            Arc::new(ManagedAntiLeecher {
                connections: Arc::clone(&connections),
                policy: config.anti_leecher,
            })
        } else {
            Arc::new(AlwaysServe)
        };

        let orchestrator = Arc::new(DownloadOrchestrator::new(
            Arc::clone(&dht_service),
            protocol,
            Arc::clone(&store),
            PeerSelector::round_robin(),
            config.metadata_path.clone(),
            self_info.clone(),
            config.max_concurrency,
            config.max_retries,
            Some(Arc::clone(&stats)),
        ));

        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        tasks.push(spawn_dispatch_loop(
            inbound,
            Arc::clone(&store),
            Arc::clone(&dht),
            Arc::clone(&connections),
            Arc::clone(&anti_leecher),
            Arc::clone(&stats),
            config.request_timeout,
            config.data_timeout,
            cancel.clone(),
        ));

        if config.auto_refresh {
            tasks.push(spawn_refresh_loop(Arc::clone(&dht), cancel.clone()));
        }

        Self {
            host,
            dht,
            dht_service,
            store,
            connections,
            anti_leecher,
            orchestrator,
            stats,
            self_info,
            config,
            cancel,
            tasks: Mutex::new(tasks),
        }
    }

    #[must_use]
    pub fn local_peer_id(&self) -> PeerId {
        self.host.local_peer_id()
    }

    #[must_use]
    pub fn self_info(&self) -> &PeerInfo {
        &self.self_info
    }

    #[must_use]
    pub const fn config(&self) -> &NodeConfig {
        &self.config
    }

    #[must_use]
    pub fn stats(&self) -> NodeStatsSnapshot {
        self.stats.snapshot()
    }

    #[must_use]
    pub fn store(&self) -> &Arc<ChunkStore> {
        &self.store
    }

    #[must_use]
    pub fn dht(&self) -> &Arc<dyn DhtHandle> {
        &self.dht
    }

    #[must_use]
    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub async fn download(
        &self,
        cid: meshfile_primitives::Digest,
        sink: Arc<dyn meshfile_network_primitives::FileSystemAdapter>,
        mode: DeliveryMode,
        on_progress: Option<Arc<dyn Fn(DownloadProgress) + Send + Sync>>,
    ) -> Result<(), CoreError> {
        self.orchestrator
            .download(cid, sink, mode, self.cancel.child_token(), on_progress)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn publish<R>(
        &self,
        source: R,
        file_name: String,
        description: String,
        tree_type: meshfile_primitives::TreeType,
        chameleon_pk: Option<meshfile_crypto::ChameleonPubKey>,
        on_progress: Option<Arc<dyn Fn(DownloadProgress) + Send + Sync>>,
    ) -> Result<PublishReceipt, CoreError>
    where
        R: std::io::Read + Send + 'static,
    {
        self.orchestrator
            .publish(source, file_name, description, tree_type, chameleon_pk, self.config.block_size, on_progress)
            .await
    }

    /// Cancels every in-flight download and background task, then waits
    /// up to `SHUTDOWN_DRAIN` for the dispatch/refresh loops to exit.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            let _ignore = tokio::time::timeout(SHUTDOWN_DRAIN, task).await;
        }
        info!("node shutdown complete");
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_dispatch_loop(
    mut inbound: mpsc::Receiver<IncomingStream>,
    store: Arc<ChunkStore>,
    dht: Arc<dyn DhtHandle>,
    connections: Arc<ConnectionManager>,
    anti_leecher: Arc<dyn AntiLeecher>,
    stats: Arc<NodeStats>,
    request_timeout: Duration,
    data_timeout: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let incoming = tokio::select! {
                () = cancel.cancelled() => break,
                incoming = inbound.recv() => incoming,
            };
            let Some(incoming) = incoming else { break };

            let store = Arc::clone(&store);
            let dht = Arc::clone(&dht);
            let connections = Arc::clone(&connections);
            let anti_leecher = Arc::clone(&anti_leecher);
            let stats = Arc::clone(&stats);

            tokio::spawn(async move {
                handle_incoming(
                    incoming,
                    &store,
                    dht.as_ref(),
                    &connections,
                    anti_leecher.as_ref(),
                    &stats,
                    request_timeout,
                    data_timeout,
                )
                .await;
            });
        }
    })
}

async fn handle_incoming(
    incoming: IncomingStream,
    store: &ChunkStore,
    dht: &dyn DhtHandle,
    connections: &ConnectionManager,
    anti_leecher: &dyn AntiLeecher,
    stats: &NodeStats,
    request_timeout: Duration,
    data_timeout: Duration,
) {
    let peer = incoming.remote;
    debug!(%peer, protocol = %incoming.protocol, "dispatching inbound stream");

    match incoming.protocol.as_str() {
        EXISTS_PROTOCOL => {
            serve_exists(incoming.stream, peer, store, anti_leecher, request_timeout).await;
        }
        DATA_PROTOCOL => {
            match serve_data(incoming.stream, peer, store, anti_leecher, request_timeout, data_timeout).await {
                Some(bytes) => {
                    stats.record_served(bytes);
                    connections.record_success(peer, Duration::ZERO).await;
                }
                None => connections.record_failure(peer).await,
            }
        }
        ANNOUNCE_PROTOCOL => serve_announce(incoming.stream, dht).await,
        LOOKUP_PROTOCOL => serve_lookup(incoming.stream, dht).await,
        other => warn!(%peer, protocol = %other, "inbound stream on unrecognized protocol"),
    }
}

fn spawn_refresh_loop(dht: Arc<dyn DhtHandle>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(DHT_REFRESH_INTERVAL);
        interval.tick().await; // first tick fires immediately; skip it, bootstrap already ran at startup
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = dht.bootstrap().await {
                        warn!(error = %e, "periodic dht refresh failed");
                    }
                }
            }
        }
    })
}

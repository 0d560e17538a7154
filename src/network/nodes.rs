//! Listing local gateway state across nodes.
//!
//! ```text
//!   RecoveryElection / allocation
//!              │
//!              ▼
//!   ┌────────────────────┐   per node, concurrently, with timeout
//!   │    FanOutLister    │────────────────┬────────────────┐
//!   └────────────────────┘                ▼                ▼
//!                               NodeStateClient    NodeStateClient
//!                                 (loopback)           (tcp)
//!                                     │                   │
//!                                     ▼                   ▼
//!                          GatewayRequestHandler   GatewayRequestHandler
//!                                     │                   │
//!                                     ▼                   ▼
//!                              LocalStateStore      LocalStateStore
//! ```

use crate::checkpoint::{LocalStateStore, MetadataSnapshot};
use crate::error::{Error, NetworkError, Result};
use crate::network::rpc::{
    frame_message, unframe_message, ErrorResponse, ListMetadataRequest, ListStartedShardsRequest,
    Message, MetadataStateResponse, StartedShardStateResponse,
};
use crate::types::{NodeId, ShardId};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, trace, warn};

/// Handler for incoming messages.
pub trait MessageHandler: Send + Sync + 'static {
    /// Handle an incoming message and optionally return a response.
    fn handle(&self, msg: Message) -> Option<Message>;
}

/// Serves list requests from the local state store.
pub struct GatewayRequestHandler {
    node_id: NodeId,
    store: Arc<LocalStateStore>,
}

impl GatewayRequestHandler {
    /// Create a handler answering as `node_id`.
    pub fn new(node_id: NodeId, store: Arc<LocalStateStore>) -> Self {
        Self { node_id, store }
    }

    /// Node this handler answers for.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Decode a frame, handle it and frame the response.
    pub fn handle_frame(&self, frame: &[u8]) -> Result<Vec<u8>> {
        let request = unframe_message(frame)?;
        let request_id = request.request_id();
        let response = self.handle(request).unwrap_or_else(|| {
            Message::Error(ErrorResponse {
                request_id,
                node_id: self.node_id,
                reason: "no response".to_string(),
            })
        });
        frame_message(&response)
    }
}

impl MessageHandler for GatewayRequestHandler {
    fn handle(&self, msg: Message) -> Option<Message> {
        match msg {
            Message::ListMetadata(req) => {
                let snapshot = self.store.current_metadata().map(|s| (*s).clone());
                trace!(
                    node_id = self.node_id,
                    version = snapshot.as_ref().map(|s| s.version),
                    "Serving local metadata"
                );
                Some(Message::MetadataState(MetadataStateResponse {
                    request_id: req.request_id,
                    node_id: self.node_id,
                    snapshot,
                }))
            }
            Message::ListStartedShards(req) => {
                let version = self
                    .store
                    .current_started_shards()
                    .and_then(|s| s.get(&req.shard_id));
                Some(Message::StartedShardState(StartedShardStateResponse {
                    request_id: req.request_id,
                    node_id: self.node_id,
                    shard_id: req.shard_id,
                    version,
                }))
            }
            other => {
                debug!(kind = other.kind(), "Ignoring unexpected gateway message");
                Some(Message::Error(ErrorResponse {
                    request_id: other.request_id(),
                    node_id: self.node_id,
                    reason: format!("unexpected request: {}", other.kind()),
                }))
            }
        }
    }
}

/// Client for one peer's gateway.
#[async_trait]
pub trait NodeStateClient: Send + Sync + 'static {
    /// The peer this client talks to.
    fn node_id(&self) -> NodeId;

    /// Send a request and wait for its response.
    async fn request(&self, msg: Message) -> Result<Message>;

    /// The peer's latest local metadata.
    async fn metadata_state(&self, request_id: u64) -> Result<Option<MetadataSnapshot>> {
        let node_id = self.node_id();
        let response = self
            .request(Message::ListMetadata(ListMetadataRequest { request_id }))
            .await?;
        match response {
            Message::MetadataState(resp) if resp.request_id == request_id => Ok(resp.snapshot),
            other => Err(unexpected(node_id, other)),
        }
    }

    /// The peer's local version of `shard_id`.
    async fn started_shard(&self, request_id: u64, shard_id: &ShardId) -> Result<Option<u64>> {
        let node_id = self.node_id();
        let response = self
            .request(Message::ListStartedShards(ListStartedShardsRequest {
                request_id,
                shard_id: shard_id.clone(),
            }))
            .await?;
        match response {
            Message::StartedShardState(resp) if resp.request_id == request_id => Ok(resp.version),
            other => Err(unexpected(node_id, other)),
        }
    }
}

fn unexpected(node_id: NodeId, msg: Message) -> Error {
    match msg {
        Message::Error(e) => NetworkError::Remote {
            node_id,
            reason: e.reason,
        }
        .into(),
        other => NetworkError::UnexpectedResponse(format!(
            "{} (request {}) from node {}",
            other.kind(),
            other.request_id(),
            node_id
        ))
        .into(),
    }
}

/// Client that reaches an in-process handler through the wire codec.
pub struct LoopbackClient {
    handler: Arc<GatewayRequestHandler>,
}

impl LoopbackClient {
    /// Create a client for `handler`.
    pub fn new(handler: Arc<GatewayRequestHandler>) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl NodeStateClient for LoopbackClient {
    fn node_id(&self) -> NodeId {
        self.handler.node_id()
    }

    async fn request(&self, msg: Message) -> Result<Message> {
        let frame = frame_message(&msg)?;
        let response = self.handler.handle_frame(&frame)?;
        unframe_message(&response)
    }
}

/// A node that could not be listed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeFailure {
    /// The node.
    pub node_id: NodeId,
    /// Why it failed.
    pub reason: String,
}

/// One node's latest local metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeMetadataReport {
    /// The node.
    pub node_id: NodeId,
    /// `None` if the node has no local metadata.
    pub snapshot: Option<MetadataSnapshot>,
}

/// Result of listing metadata across nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodesMetadataResponse {
    /// Nodes that answered, ordered by node id.
    pub reports: Vec<NodeMetadataReport>,
    /// Nodes that did not, ordered by node id.
    pub failures: Vec<NodeFailure>,
}

/// One node's local version of a shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeShardReport {
    /// The node.
    pub node_id: NodeId,
    /// `None` if the node does not hold the shard.
    pub version: Option<u64>,
}

/// Result of listing one shard across nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodesStartedShardsResponse {
    /// The shard that was listed.
    pub shard_id: ShardId,
    /// Nodes that answered, ordered by node id.
    pub reports: Vec<NodeShardReport>,
    /// Nodes that did not, ordered by node id.
    pub failures: Vec<NodeFailure>,
}

impl NodesStartedShardsResponse {
    /// Node holding the highest version of the shard.
    pub fn highest_version(&self) -> Option<&NodeShardReport> {
        self.reports
            .iter()
            .filter(|r| r.version.is_some())
            .max_by(|a, b| a.version.cmp(&b.version).then(b.node_id.cmp(&a.node_id)))
    }
}

/// Lists local gateway state across a set of nodes.
///
/// Partial failure is reported in the response. Only a transport that is
/// unavailable as a whole returns an error.
#[async_trait]
pub trait NodesStateLister: Send + Sync + 'static {
    /// Ask every node for its latest local metadata.
    async fn list_metadata(&self, node_ids: &BTreeSet<NodeId>) -> Result<NodesMetadataResponse>;

    /// Ask every node which version of `shard_id` it holds.
    async fn list_started_shards(
        &self,
        shard_id: &ShardId,
        node_ids: &BTreeSet<NodeId>,
    ) -> Result<NodesStartedShardsResponse>;
}

type FanOutResult<T> = (Vec<(NodeId, T)>, Vec<NodeFailure>);

/// Queries registered peer clients concurrently, each under its own timeout.
pub struct FanOutLister {
    clients: RwLock<HashMap<NodeId, Arc<dyn NodeStateClient>>>,
    node_timeout: Duration,
    next_request_id: AtomicU64,
    closed: AtomicBool,
}

impl FanOutLister {
    /// Create a lister with a per-node timeout.
    pub fn new(node_timeout: Duration) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            node_timeout,
            next_request_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Register (or replace) the client for a node.
    pub fn register(&self, client: Arc<dyn NodeStateClient>) {
        let node_id = client.node_id();
        debug!(node_id, "Registered gateway client");
        self.clients.write().insert(node_id, client);
    }

    /// Nodes with a registered client.
    pub fn node_ids(&self) -> BTreeSet<NodeId> {
        self.clients.read().keys().copied().collect()
    }

    /// Refuse further listings.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn fan_out<T, F, Fut>(&self, node_ids: &BTreeSet<NodeId>, call: F) -> Result<FanOutResult<T>>
    where
        T: Send + 'static,
        F: Fn(Arc<dyn NodeStateClient>, u64) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if self.is_closed() {
            return Err(NetworkError::TransportUnavailable("lister is closed".to_string()).into());
        }

        let mut failures = Vec::new();
        let mut tasks = JoinSet::new();
        let mut task_nodes = HashMap::new();
        let node_timeout = self.node_timeout;

        for &node_id in node_ids {
            let client = self.clients.read().get(&node_id).cloned();
            let Some(client) = client else {
                failures.push(NodeFailure {
                    node_id,
                    reason: NetworkError::NodeNotConnected(node_id).to_string(),
                });
                continue;
            };

            let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
            let fut = call(client, request_id);
            let handle = tasks.spawn(async move {
                let result = match tokio::time::timeout(node_timeout, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(NetworkError::NodeTimeout(node_id).into()),
                };
                (node_id, result)
            });
            task_nodes.insert(handle.id(), node_id);
        }

        let mut answers = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((node_id, Ok(value))) => answers.push((node_id, value)),
                Ok((node_id, Err(e))) => {
                    warn!(node_id, error = %e, "Failed to list gateway state from node");
                    failures.push(NodeFailure {
                        node_id,
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    let Some(node_id) = task_nodes.remove(&e.id()) else {
                        warn!(error = %e, "Gateway listing task failed");
                        continue;
                    };
                    warn!(node_id, error = %e, "Gateway listing task failed");
                    failures.push(NodeFailure {
                        node_id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        answers.sort_by_key(|(node_id, _)| *node_id);
        failures.sort_by_key(|f| f.node_id);
        Ok((answers, failures))
    }
}

#[async_trait]
impl NodesStateLister for FanOutLister {
    async fn list_metadata(&self, node_ids: &BTreeSet<NodeId>) -> Result<NodesMetadataResponse> {
        let (answers, failures) = self
            .fan_out(node_ids, |client, request_id| async move {
                client.metadata_state(request_id).await
            })
            .await?;

        Ok(NodesMetadataResponse {
            reports: answers
                .into_iter()
                .map(|(node_id, snapshot)| NodeMetadataReport { node_id, snapshot })
                .collect(),
            failures,
        })
    }

    async fn list_started_shards(
        &self,
        shard_id: &ShardId,
        node_ids: &BTreeSet<NodeId>,
    ) -> Result<NodesStartedShardsResponse> {
        let (answers, failures) = self
            .fan_out(node_ids, |client, request_id| {
                let shard_id = shard_id.clone();
                async move { client.started_shard(request_id, &shard_id).await }
            })
            .await?;

        Ok(NodesStartedShardsResponse {
            shard_id: shard_id.clone(),
            reports: answers
                .into_iter()
                .map(|(node_id, version)| NodeShardReport { node_id, version })
                .collect(),
            failures,
        })
    }
}

impl std::fmt::Debug for FanOutLister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanOutLister")
            .field("nodes", &self.node_ids())
            .field("node_timeout", &self.node_timeout)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::StartedShardsSnapshot;
    use crate::cluster::MetaData;
    use crate::config::{GatewayConfig, NodeEnvironment};
    use crate::types::NodeRoles;
    use tempfile::{tempdir, TempDir};

    fn handler(node_id: NodeId) -> (Arc<GatewayRequestHandler>, Arc<LocalStateStore>, TempDir) {
        let dir = tempdir().unwrap();
        let store = Arc::new(LocalStateStore::new(
            NodeEnvironment::new([dir.path().to_path_buf()]),
            &GatewayConfig::default(),
            NodeRoles::master_and_data(),
        ));
        (
            Arc::new(GatewayRequestHandler::new(node_id, store.clone())),
            store,
            dir,
        )
    }

    struct SlowClient(NodeId);

    #[async_trait]
    impl NodeStateClient for SlowClient {
        fn node_id(&self) -> NodeId {
            self.0
        }

        async fn request(&self, _msg: Message) -> Result<Message> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Err(NetworkError::ConnectionClosed.into())
        }
    }

    struct PanickingClient(NodeId);

    #[async_trait]
    impl NodeStateClient for PanickingClient {
        fn node_id(&self) -> NodeId {
            self.0
        }

        async fn request(&self, _msg: Message) -> Result<Message> {
            panic!("node {} handler panicked", self.0);
        }
    }

    #[test]
    fn test_handler_serves_local_state() {
        let (handler, store, _dir) = handler(3);
        store
            .write_metadata(MetadataSnapshot::new(4, MetaData::default().with_version(4)))
            .unwrap();
        let mut shards = StartedShardsSnapshot::new(8);
        shards.put(ShardId::new("logs", 1), 6);
        store.write_started_shards(shards).unwrap();

        let response = handler
            .handle(Message::ListMetadata(ListMetadataRequest { request_id: 5 }))
            .unwrap();
        match response {
            Message::MetadataState(resp) => {
                assert_eq!(resp.request_id, 5);
                assert_eq!(resp.node_id, 3);
                assert_eq!(resp.snapshot.unwrap().version, 4);
            }
            other => panic!("Wrong message type: {:?}", other),
        }

        let response = handler
            .handle(Message::ListStartedShards(ListStartedShardsRequest {
                request_id: 6,
                shard_id: ShardId::new("logs", 1),
            }))
            .unwrap();
        match response {
            Message::StartedShardState(resp) => assert_eq!(resp.version, Some(6)),
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_handler_rejects_responses() {
        let (handler, _store, _dir) = handler(1);
        let response = handler
            .handle(Message::Error(ErrorResponse {
                request_id: 2,
                node_id: 9,
                reason: "boom".to_string(),
            }))
            .unwrap();
        assert!(matches!(response, Message::Error(e) if e.request_id == 2 && e.node_id == 1));
    }

    #[tokio::test]
    async fn test_loopback_client() {
        let (handler, store, _dir) = handler(2);
        let client = LoopbackClient::new(handler);

        assert_eq!(client.node_id(), 2);
        assert!(client.metadata_state(1).await.unwrap().is_none());

        store
            .write_metadata(MetadataSnapshot::new(9, MetaData::default().with_version(9)))
            .unwrap();
        assert_eq!(client.metadata_state(2).await.unwrap().unwrap().version, 9);
        assert_eq!(
            client.started_shard(3, &ShardId::new("logs", 0)).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_fan_out_reports_failures() {
        let (h1, s1, _d1) = handler(1);
        let (h2, _s2, _d2) = handler(2);
        s1.write_metadata(MetadataSnapshot::new(3, MetaData::default().with_version(3)))
            .unwrap();

        let lister = FanOutLister::new(Duration::from_millis(100));
        lister.register(Arc::new(LoopbackClient::new(h1)));
        lister.register(Arc::new(LoopbackClient::new(h2)));
        lister.register(Arc::new(SlowClient(4)));

        let nodes: BTreeSet<NodeId> = [1, 2, 3, 4].into_iter().collect();
        let response = lister.list_metadata(&nodes).await.unwrap();

        assert_eq!(response.reports.len(), 2);
        assert_eq!(response.reports[0].node_id, 1);
        assert_eq!(response.reports[0].snapshot.as_ref().unwrap().version, 3);
        assert!(response.reports[1].snapshot.is_none());

        let failed: Vec<NodeId> = response.failures.iter().map(|f| f.node_id).collect();
        assert_eq!(failed, vec![3, 4]);
    }

    #[tokio::test]
    async fn test_fan_out_reports_panicked_node() {
        let (h1, _s1, _d1) = handler(1);

        let lister = FanOutLister::new(Duration::from_secs(1));
        lister.register(Arc::new(LoopbackClient::new(h1)));
        lister.register(Arc::new(PanickingClient(2)));

        let response = lister.list_metadata(&lister.node_ids()).await.unwrap();

        assert_eq!(response.reports.len(), 1);
        assert_eq!(response.reports[0].node_id, 1);
        assert_eq!(response.failures.len(), 1);
        assert_eq!(response.failures[0].node_id, 2);
        assert!(response.failures[0].reason.contains("panic"));
    }

    #[tokio::test]
    async fn test_list_started_shards() {
        let (h1, s1, _d1) = handler(1);
        let (h2, s2, _d2) = handler(2);
        let shard = ShardId::new("logs", 0);

        let mut a = StartedShardsSnapshot::new(5);
        a.put(shard.clone(), 2);
        s1.write_started_shards(a).unwrap();
        let mut b = StartedShardsSnapshot::new(6);
        b.put(shard.clone(), 4);
        s2.write_started_shards(b).unwrap();

        let lister = FanOutLister::new(Duration::from_secs(1));
        lister.register(Arc::new(LoopbackClient::new(h1)));
        lister.register(Arc::new(LoopbackClient::new(h2)));

        let response = lister
            .list_started_shards(&shard, &lister.node_ids())
            .await
            .unwrap();
        assert!(response.failures.is_empty());
        assert_eq!(response.highest_version().unwrap().node_id, 2);
    }

    #[tokio::test]
    async fn test_closed_lister_is_unavailable() {
        let lister = FanOutLister::new(Duration::from_secs(1));
        lister.close();

        let result = lister.list_metadata(&BTreeSet::new()).await;
        assert!(matches!(
            result,
            Err(Error::Network(NetworkError::TransportUnavailable(_)))
        ));
    }
}

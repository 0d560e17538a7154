//! Testing utilities for the local gateway.
//!
//! This module provides a small in-process cluster of gateways for
//! end-to-end tests:
//! - Every node owns its own data location and `LocalGateway`
//! - Nodes list each other through loopback clients over the wire codec
//! - Individual nodes can be crashed so their listings fail
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          TestCluster                            │
//! │                                                                 │
//! │   publish(state) ──► per node: ClusterChangedEvent (local id)   │
//! │                                                                 │
//! │  ┌────────────┐   ┌────────────┐   ┌────────────┐               │
//! │  │  TestNode  │   │  TestNode  │   │  TestNode  │               │
//! │  │  gateway   │   │  gateway   │   │  gateway   │               │
//! │  │  <root>/1  │   │  <root>/2  │   │  <root>/3  │               │
//! │  └────────────┘   └────────────┘   └────────────┘               │
//! │         ▲                ▲                ▲                     │
//! │         └──── FanOutLister (ToggleClient per node) ────┘        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use crema_gateway::testing::{fixtures, TestCluster};
//! use crema_gateway::NodeRoles;
//!
//! let cluster = TestCluster::new(dir.path(), &[NodeRoles::master_and_data(); 3])?;
//! cluster.publish(fixtures::cluster_state(1, meta, routing, cluster.discovery_nodes()));
//! cluster.sync().await?;
//! let recovered = cluster.node(1).gateway.perform_state_recovery(&cluster.discovery_nodes()).await?;
//! ```

pub mod fixtures;

#[cfg(test)]
mod gateway_e2e_tests;

use crate::cluster::{ClusterChangedEvent, ClusterState, ClusterStateListener, DiscoveryNodes};
use crate::config::{GatewayConfig, NodeEnvironment};
use crate::error::{NetworkError, Result};
use crate::gateway::LocalGateway;
use crate::network::{
    FanOutLister, GatewayRequestHandler, LoopbackClient, Message, NodeStateClient,
};
use crate::types::{NodeId, NodeRoles};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Client that fails every request while its node is marked down.
pub struct ToggleClient {
    inner: LoopbackClient,
    node_id: NodeId,
    down: AtomicBool,
}

impl ToggleClient {
    /// Wrap a loopback client to `handler`.
    pub fn new(handler: Arc<GatewayRequestHandler>) -> Self {
        let node_id = handler.node_id();
        Self {
            inner: LoopbackClient::new(handler),
            node_id,
            down: AtomicBool::new(false),
        }
    }

    /// Mark the node down or up.
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Whether the node is marked down.
    pub fn is_down(&self) -> bool {
        self.down.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NodeStateClient for ToggleClient {
    fn node_id(&self) -> NodeId {
        self.node_id
    }

    async fn request(&self, msg: Message) -> Result<Message> {
        if self.is_down() {
            return Err(NetworkError::ConnectionFailed {
                addr: format!("node-{}", self.node_id),
                reason: "node is down".to_string(),
            }
            .into());
        }
        self.inner.request(msg).await
    }
}

/// One gateway node of a [`TestCluster`].
pub struct TestNode {
    /// Node id.
    pub node_id: NodeId,

    /// Configured roles.
    pub roles: NodeRoles,

    /// Data location.
    pub data_path: PathBuf,

    /// The node's gateway.
    pub gateway: Arc<LocalGateway>,

    /// How other nodes reach this one.
    pub client: Arc<ToggleClient>,
}

/// A test cluster of local gateways sharing one lister.
pub struct TestCluster {
    /// Nodes, ordered by id starting at 1.
    pub nodes: Vec<TestNode>,

    /// Lister every node recovers through.
    pub lister: Arc<FanOutLister>,

    /// Last published state, without a local node id.
    last_state: Mutex<Arc<ClusterState>>,
}

impl TestCluster {
    /// Create and start one node per entry of `roles`, with data under
    /// `root/node-<id>`.
    pub fn new(root: &Path, roles: &[NodeRoles]) -> Result<Self> {
        Self::with_config(root, roles, Self::default_config())
    }

    /// Like [`new`](Self::new) with an explicit gateway config.
    pub fn with_config(root: &Path, roles: &[NodeRoles], config: GatewayConfig) -> Result<Self> {
        let lister = Arc::new(FanOutLister::new(config.node_timeout));
        let mut nodes = Vec::with_capacity(roles.len());

        for (i, &node_roles) in roles.iter().enumerate() {
            let node_id = i as NodeId + 1;
            let data_path = root.join(format!("node-{}", node_id));

            let gateway = Arc::new(LocalGateway::new(
                NodeEnvironment::new([data_path.clone()]),
                config.clone(),
                node_roles,
                lister.clone(),
            ));
            gateway.start()?;

            let handler = Arc::new(GatewayRequestHandler::new(node_id, gateway.store().clone()));
            let client = Arc::new(ToggleClient::new(handler));
            lister.register(client.clone());

            nodes.push(TestNode {
                node_id,
                roles: node_roles,
                data_path,
                gateway,
                client,
            });
        }

        debug!(nodes = nodes.len(), "Test cluster started");

        Ok(Self {
            nodes,
            lister,
            last_state: Mutex::new(Arc::new(ClusterState::default())),
        })
    }

    fn default_config() -> GatewayConfig {
        GatewayConfig::default()
            .with_shutdown_timeout(Duration::from_secs(5))
            .with_election_timeout(Duration::from_secs(5))
            .with_node_timeout(Duration::from_secs(1))
    }

    /// Get the number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Get a node by id.
    ///
    /// # Panics
    ///
    /// If no node has that id.
    pub fn node(&self, node_id: NodeId) -> &TestNode {
        self.nodes
            .iter()
            .find(|n| n.node_id == node_id)
            .unwrap_or_else(|| panic!("no test node {}", node_id))
    }

    /// Node set describing this cluster. The first master-eligible node is
    /// the elected master.
    pub fn discovery_nodes(&self) -> DiscoveryNodes {
        let pairs: Vec<(NodeId, NodeRoles)> =
            self.nodes.iter().map(|n| (n.node_id, n.roles)).collect();
        fixtures::discovery_nodes(&pairs)
    }

    /// Deliver `state` to every node, as seen from that node.
    pub fn publish(&self, state: ClusterState) {
        let state = Arc::new(state);
        let previous = std::mem::replace(&mut *self.last_state.lock(), state.clone());

        for node in &self.nodes {
            let mut local = (*state).clone();
            local.nodes.local_node_id = Some(node.node_id);
            let mut local_previous = (*previous).clone();
            local_previous.nodes.local_node_id = Some(node.node_id);

            let event = ClusterChangedEvent::new("test", Arc::new(local), Arc::new(local_previous));
            node.gateway.cluster_changed(&event);
        }
    }

    /// Wait for every node's queued writes.
    pub async fn sync(&self) -> Result<()> {
        for node in &self.nodes {
            node.gateway.sync().await?;
        }
        Ok(())
    }

    /// Stop every node's gateway.
    pub async fn stop(&self) {
        for node in &self.nodes {
            node.gateway.stop().await;
        }
    }

    /// Make a node's listings fail.
    pub fn crash_node(&self, node_id: NodeId) {
        self.node(node_id).client.set_down(true);
    }

    /// Let a crashed node answer again.
    pub fn recover_node(&self, node_id: NodeId) {
        self.node(node_id).client.set_down(false);
    }
}

//! The local gateway: lifecycle around store, trigger, worker and election.

use crate::checkpoint::{LocalStateStore, MetadataSnapshot, StartedShardsSnapshot};
use crate::cluster::{ClusterChangedEvent, ClusterState, ClusterStateListener, DiscoveryNodes};
use crate::config::{GatewayConfig, NodeEnvironment};
use crate::error::{Error, Result};
use crate::gateway::election::RecoveryElection;
use crate::gateway::listener::PersistenceTrigger;
use crate::gateway::persist::PersistenceWorker;
use crate::network::NodesStateLister;
use crate::types::NodeRoles;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Gateway type name reported by [`LocalGateway::gateway_type`].
pub const LOCAL_GATEWAY_TYPE: &str = "local";

/// Persists cluster state on the local node and recovers it from peers.
///
/// # Example
///
/// ```no_run
/// use crema_gateway::{FanOutLister, GatewayConfig, LocalGateway, NodeEnvironment, NodeRoles};
/// use std::sync::Arc;
///
/// # async fn example() -> crema_gateway::Result<()> {
/// let config = GatewayConfig::default();
/// let lister = Arc::new(FanOutLister::new(config.node_timeout));
/// let gateway = LocalGateway::new(
///     NodeEnvironment::new(["/var/lib/node/data"]),
///     config,
///     NodeRoles::master_and_data(),
///     lister,
/// );
///
/// gateway.start()?;
/// // feed cluster state events via ClusterStateListener::cluster_changed
/// gateway.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct LocalGateway {
    config: GatewayConfig,
    store: Arc<LocalStateStore>,
    lister: Arc<dyn NodesStateLister>,

    /// Shared with the worker; set after the first metadata write.
    metadata_persisted: Arc<AtomicBool>,

    worker: RwLock<Option<Arc<PersistenceWorker>>>,
    trigger: RwLock<Option<Arc<PersistenceTrigger>>>,
}

impl LocalGateway {
    /// Create a stopped gateway.
    pub fn new(
        env: NodeEnvironment,
        config: GatewayConfig,
        roles: NodeRoles,
        lister: Arc<dyn NodesStateLister>,
    ) -> Self {
        let store = Arc::new(LocalStateStore::new(env, &config, roles));
        Self {
            config,
            store,
            lister,
            metadata_persisted: Arc::new(AtomicBool::new(false)),
            worker: RwLock::new(None),
            trigger: RwLock::new(None),
        }
    }

    /// Always `"local"`.
    pub fn gateway_type(&self) -> &'static str {
        LOCAL_GATEWAY_TYPE
    }

    /// The underlying state store.
    pub fn store(&self) -> &Arc<LocalStateStore> {
        &self.store
    }

    /// Configuration.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Whether [`start`](Self::start) ran and [`stop`](Self::stop) did not.
    pub fn is_started(&self) -> bool {
        self.trigger.read().is_some()
    }

    /// Whether metadata was written at least once since start.
    pub fn metadata_persisted_at_least_once(&self) -> bool {
        self.metadata_persisted.load(Ordering::SeqCst)
    }

    /// Load local state and start listening. Idempotent.
    pub fn start(&self) -> Result<()> {
        let mut trigger_slot = self.trigger.write();
        if trigger_slot.is_some() {
            return Ok(());
        }

        self.store.ensure_initialized();

        let worker = Arc::new(PersistenceWorker::start(
            self.store.clone(),
            self.metadata_persisted.clone(),
        )?);
        let trigger = Arc::new(PersistenceTrigger::new(
            self.store.clone(),
            worker.clone(),
            self.metadata_persisted.clone(),
        ));

        *self.worker.write() = Some(worker);
        *trigger_slot = Some(trigger);

        info!(
            metadata_version = self.store.current_metadata().map(|s| s.version),
            started_shards_version = self.store.current_started_shards().map(|s| s.version),
            persistence = self.store.requires_state_persistence(),
            "Local gateway started"
        );
        Ok(())
    }

    /// Stop listening and drain queued writes for at most the configured
    /// shutdown timeout.
    pub async fn stop(&self) {
        let trigger = self.trigger.write().take();
        let worker = self.worker.write().take();
        if trigger.is_none() && worker.is_none() {
            return;
        }

        if let Some(worker) = worker {
            worker.shutdown(self.config.shutdown_timeout).await;
        }
        info!("Local gateway stopped");
    }

    /// Stop the gateway and release its resources.
    pub async fn close(&self) {
        self.stop().await;
        debug!("Local gateway closed");
    }

    /// Wait until every queued write has run.
    pub async fn sync(&self) -> Result<()> {
        let worker = self.worker.read().clone();
        match worker {
            Some(worker) => worker.sync().await,
            None => Err(Error::NotStarted),
        }
    }

    /// The persistence worker, while started.
    pub fn worker(&self) -> Option<Arc<PersistenceWorker>> {
        self.worker.read().clone()
    }

    /// Elect the cluster state to recover from among the master-eligible
    /// nodes in `nodes`.
    pub async fn perform_state_recovery(&self, nodes: &DiscoveryNodes) -> Result<ClusterState> {
        let node_ids = nodes.master_node_ids();
        if node_ids.is_empty() {
            warn!("No master-eligible nodes known, recovering empty state");
        }

        RecoveryElection::new(self.lister.clone(), self.config.election_timeout)
            .elect(&node_ids)
            .await
    }

    /// Delete all node data locations. Irrecoverable.
    pub fn reset(&self) -> Result<()> {
        warn!(
            locations = self.store.env().node_data_locations().len(),
            "Resetting local gateway, deleting all node data"
        );
        self.store.reset()
    }

    /// Current metadata snapshot.
    pub fn current_metadata(&self) -> Option<Arc<MetadataSnapshot>> {
        self.store.current_metadata()
    }

    /// Current started shards snapshot.
    pub fn current_started_shards(&self) -> Option<Arc<StartedShardsSnapshot>> {
        self.store.current_started_shards()
    }
}

impl ClusterStateListener for LocalGateway {
    fn cluster_changed(&self, event: &ClusterChangedEvent) {
        let trigger = self.trigger.read().clone();
        match trigger {
            Some(trigger) => trigger.cluster_changed(event),
            None => debug!(
                version = event.state().version,
                "Local gateway not started, ignoring cluster state"
            ),
        }
    }
}

impl std::fmt::Debug for LocalGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalGateway")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("started", &self.is_started())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{IndexMetaData, MetaData};
    use crate::network::FanOutLister;
    use crate::types::DiscoveryNode;
    use std::time::Duration;
    use tempfile::tempdir;

    fn new_gateway(path: &std::path::Path) -> LocalGateway {
        LocalGateway::new(
            NodeEnvironment::new([path.to_path_buf()]),
            GatewayConfig::default().with_shutdown_timeout(Duration::from_secs(5)),
            NodeRoles::master_and_data(),
            Arc::new(FanOutLister::new(Duration::from_secs(1))),
        )
    }

    fn event(version: u64) -> ClusterChangedEvent {
        let state = ClusterState::builder()
            .version(version)
            .meta_data(
                MetaData::default()
                    .with_version(version)
                    .with_index(IndexMetaData::new("logs", 1, 0)),
            )
            .nodes(
                DiscoveryNodes::default()
                    .with_node(DiscoveryNode::new(1, "node-1", NodeRoles::master_and_data()))
                    .with_local(1),
            )
            .build();
        ClusterChangedEvent::new("test", Arc::new(state), Arc::new(ClusterState::default()))
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let dir = tempdir().unwrap();
        let gateway = new_gateway(dir.path());
        assert_eq!(gateway.gateway_type(), "local");
        assert!(!gateway.is_started());
        assert!(matches!(gateway.sync().await, Err(Error::NotStarted)));

        // Events before start are ignored.
        gateway.cluster_changed(&event(1));

        gateway.start().unwrap();
        gateway.start().unwrap();
        assert!(gateway.is_started());
        assert!(gateway.current_metadata().is_none());

        gateway.cluster_changed(&event(2));
        gateway.sync().await.unwrap();
        assert_eq!(gateway.current_metadata().unwrap().version, 2);
        assert!(gateway.metadata_persisted_at_least_once());

        gateway.close().await;
        assert!(!gateway.is_started());

        // A new gateway over the same data recovers the persisted state.
        let restarted = new_gateway(dir.path());
        restarted.start().unwrap();
        assert_eq!(restarted.current_metadata().unwrap().version, 2);
        assert!(!restarted.metadata_persisted_at_least_once());
        restarted.stop().await;
    }

    #[tokio::test]
    async fn test_recovery_with_no_master_nodes() {
        let dir = tempdir().unwrap();
        let gateway = new_gateway(dir.path());

        let state = gateway
            .perform_state_recovery(&DiscoveryNodes::default())
            .await
            .unwrap();
        assert!(state.is_empty());
    }

    #[tokio::test]
    async fn test_reset_wipes_disk() {
        let dir = tempdir().unwrap();
        let data = dir.path().join("node-0");
        let gateway = new_gateway(&data);
        gateway.start().unwrap();
        gateway.cluster_changed(&event(3));
        gateway.sync().await.unwrap();
        gateway.stop().await;
        assert!(data.exists());

        gateway.reset().unwrap();
        assert!(!data.exists());
        // Memory is untouched.
        assert_eq!(gateway.current_metadata().unwrap().version, 3);
    }
}

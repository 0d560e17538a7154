//! Cluster state as delivered by the cluster-state engine.
//!
//! This is the read-only view the gateway needs: metadata (what indices
//! exist), the routing table (where shard copies live), the node set, and
//! the global blocks. Allocation decisions are made elsewhere.

use crate::types::{DiscoveryNode, NodeId, ShardId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Metadata of a single index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetaData {
    /// Index name.
    pub name: String,
    /// Number of primary shards.
    pub number_of_shards: u32,
    /// Number of replicas per primary.
    pub number_of_replicas: u32,
    /// Whether the index is closed.
    pub closed: bool,
    /// Index-level settings.
    pub settings: BTreeMap<String, String>,
}

impl IndexMetaData {
    /// Create open index metadata.
    pub fn new(name: impl Into<String>, number_of_shards: u32, number_of_replicas: u32) -> Self {
        Self {
            name: name.into(),
            number_of_shards,
            number_of_replicas,
            closed: false,
            settings: BTreeMap::new(),
        }
    }

    /// Mark the index closed.
    pub fn closed(mut self) -> Self {
        self.closed = true;
        self
    }
}

/// Cluster-wide metadata. Opaque to the gateway apart from its version and
/// the set of index names.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MetaData {
    /// Metadata version, bumped on every metadata change.
    pub version: u64,
    /// Indices by name.
    pub indices: BTreeMap<String, IndexMetaData>,
    /// Persistent cluster settings.
    pub persistent_settings: BTreeMap<String, String>,
}

impl MetaData {
    /// Whether an index with this name exists.
    pub fn has_index(&self, name: &str) -> bool {
        self.indices.contains_key(name)
    }

    /// Copy of this metadata stamped with a different version.
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Add or replace an index.
    pub fn with_index(mut self, index: IndexMetaData) -> Self {
        self.indices.insert(index.name.clone(), index);
        self
    }

    /// Remove an index.
    pub fn without_index(mut self, name: &str) -> Self {
        self.indices.remove(name);
        self
    }
}

/// Lifecycle state of a shard copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShardRoutingState {
    /// Not assigned to any node.
    Unassigned,
    /// Assigned and recovering.
    Initializing,
    /// Assigned and serving.
    Started,
    /// Started, and being moved to another node.
    Relocating,
}

/// One copy of a shard and where it is routed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardRouting {
    /// Which shard this is a copy of.
    pub shard_id: ShardId,
    /// Node holding the copy.
    pub node_id: Option<NodeId>,
    /// Target node while relocating.
    pub relocating_node_id: Option<NodeId>,
    /// Whether this is the primary copy.
    pub primary: bool,
    /// Current state.
    pub state: ShardRoutingState,
    /// Routing version, bumped on every state change of this copy.
    pub version: u64,
}

impl ShardRouting {
    /// Create a routing entry.
    pub fn new(
        shard_id: ShardId,
        node_id: Option<NodeId>,
        primary: bool,
        state: ShardRoutingState,
        version: u64,
    ) -> Self {
        Self {
            shard_id,
            node_id,
            relocating_node_id: None,
            primary,
            state,
            version,
        }
    }

    /// Started or relocating away.
    pub fn active(&self) -> bool {
        matches!(
            self.state,
            ShardRoutingState::Started | ShardRoutingState::Relocating
        )
    }

    /// Whether the copy is started.
    pub fn started(&self) -> bool {
        self.state == ShardRoutingState::Started
    }
}

/// All copies of one shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexShardRoutingTable {
    /// The shard.
    pub shard_id: ShardId,
    /// Primary and replica copies.
    pub shards: Vec<ShardRouting>,
}

impl IndexShardRoutingTable {
    /// Number of copies.
    pub fn size(&self) -> usize {
        self.shards.len()
    }

    /// Number of copies in the given state.
    pub fn count_with_state(&self, state: ShardRoutingState) -> usize {
        self.shards.iter().filter(|s| s.state == state).count()
    }

    /// Whether every copy is started.
    pub fn all_started(&self) -> bool {
        self.count_with_state(ShardRoutingState::Started) == self.size()
    }
}

/// Routing of all shards of one index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRoutingTable {
    /// Index name.
    pub index: String,
    /// Shard groups by shard number.
    pub shards: BTreeMap<u32, IndexShardRoutingTable>,
}

impl IndexRoutingTable {
    /// Create an empty routing table for an index.
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            shards: BTreeMap::new(),
        }
    }

    /// Add a shard copy, creating its group on first use.
    pub fn with_shard(mut self, routing: ShardRouting) -> Self {
        let shard_id = routing.shard_id.clone();
        self.shards
            .entry(shard_id.id)
            .or_insert_with(|| IndexShardRoutingTable {
                shard_id,
                shards: Vec::new(),
            })
            .shards
            .push(routing);
        self
    }

    /// Iterate over shard groups.
    pub fn shard_groups(&self) -> impl Iterator<Item = &IndexShardRoutingTable> {
        self.shards.values()
    }
}

/// Routing of every index in the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RoutingTable {
    /// Routing version.
    pub version: u64,
    /// Per-index routing.
    pub indices: BTreeMap<String, IndexRoutingTable>,
}

impl RoutingTable {
    /// Add or replace an index routing table.
    pub fn with_index(mut self, table: IndexRoutingTable) -> Self {
        self.indices.insert(table.index.clone(), table);
        self
    }

    /// Set the routing version.
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Iterate over every shard group of every index.
    pub fn shard_groups(&self) -> impl Iterator<Item = &IndexShardRoutingTable> {
        self.indices.values().flat_map(|t| t.shard_groups())
    }

    /// Shard copies assigned to `node_id`.
    pub fn shards_on_node(&self, node_id: NodeId) -> impl Iterator<Item = &ShardRouting> {
        self.shard_groups()
            .flat_map(|g| g.shards.iter())
            .filter(move |s| s.node_id == Some(node_id))
    }
}

/// The node set, with the local node and the current master.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DiscoveryNodes {
    /// This node's id.
    pub local_node_id: Option<NodeId>,
    /// Elected master, if any.
    pub master_node_id: Option<NodeId>,
    /// All known nodes.
    pub nodes: BTreeMap<NodeId, DiscoveryNode>,
}

impl DiscoveryNodes {
    /// Add a node.
    pub fn with_node(mut self, node: DiscoveryNode) -> Self {
        self.nodes.insert(node.id, node);
        self
    }

    /// Set the local node id.
    pub fn with_local(mut self, node_id: NodeId) -> Self {
        self.local_node_id = Some(node_id);
        self
    }

    /// Set the elected master.
    pub fn with_master(mut self, node_id: NodeId) -> Self {
        self.master_node_id = Some(node_id);
        self
    }

    /// The local node, if known.
    pub fn local_node(&self) -> Option<&DiscoveryNode> {
        self.local_node_id.and_then(|id| self.nodes.get(&id))
    }

    /// Whether the local node is the elected master.
    pub fn local_node_master(&self) -> bool {
        self.local_node_id.is_some() && self.local_node_id == self.master_node_id
    }

    /// Ids of all master-eligible nodes.
    pub fn master_node_ids(&self) -> BTreeSet<NodeId> {
        self.nodes
            .values()
            .filter(|n| n.is_master_eligible())
            .map(|n| n.id)
            .collect()
    }
}

/// A global block on cluster operations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClusterBlock {
    /// Block id.
    pub id: u32,
    /// Human readable description.
    pub description: String,
    /// When set, nothing may be persisted by the gateway.
    pub disable_state_persistence: bool,
}

/// Block id of [`state_not_recovered_block`].
pub const STATE_NOT_RECOVERED_BLOCK_ID: u32 = 1;

/// Present until the gateway has recovered cluster state. Persisting before
/// recovery would overwrite good on-disk state with an empty one.
pub fn state_not_recovered_block() -> ClusterBlock {
    ClusterBlock {
        id: STATE_NOT_RECOVERED_BLOCK_ID,
        description: "state not recovered / initialized".to_string(),
        disable_state_persistence: true,
    }
}

/// Global blocks of a cluster state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClusterBlocks {
    /// Active global blocks.
    pub global: BTreeSet<ClusterBlock>,
}

impl ClusterBlocks {
    /// Add a block.
    pub fn with_block(mut self, block: ClusterBlock) -> Self {
        self.global.insert(block);
        self
    }

    /// Whether any block disables state persistence.
    pub fn disable_state_persistence(&self) -> bool {
        self.global.iter().any(|b| b.disable_state_persistence)
    }
}

/// An immutable view of the whole cluster.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClusterState {
    /// Cluster state version.
    pub version: u64,
    /// Cluster metadata.
    pub meta_data: MetaData,
    /// Shard routing.
    pub routing_table: RoutingTable,
    /// Known nodes.
    pub nodes: DiscoveryNodes,
    /// Global blocks.
    pub blocks: ClusterBlocks,
}

impl ClusterState {
    /// Start building a cluster state.
    pub fn builder() -> ClusterStateBuilder {
        ClusterStateBuilder::default()
    }

    /// Whether this is the empty bootstrap state.
    pub fn is_empty(&self) -> bool {
        self.version == 0 && self.meta_data.indices.is_empty()
    }
}

/// Builder for [`ClusterState`].
#[derive(Debug, Clone, Default)]
pub struct ClusterStateBuilder {
    state: ClusterState,
}

impl ClusterStateBuilder {
    /// Start from an existing state.
    pub fn from_state(state: &ClusterState) -> Self {
        Self {
            state: state.clone(),
        }
    }

    /// Set the cluster state version.
    pub fn version(mut self, version: u64) -> Self {
        self.state.version = version;
        self
    }

    /// Set the metadata.
    pub fn meta_data(mut self, meta_data: MetaData) -> Self {
        self.state.meta_data = meta_data;
        self
    }

    /// Set the routing table.
    pub fn routing_table(mut self, routing_table: RoutingTable) -> Self {
        self.state.routing_table = routing_table;
        self
    }

    /// Set the nodes.
    pub fn nodes(mut self, nodes: DiscoveryNodes) -> Self {
        self.state.nodes = nodes;
        self
    }

    /// Set the blocks.
    pub fn blocks(mut self, blocks: ClusterBlocks) -> Self {
        self.state.blocks = blocks;
        self
    }

    /// Finish building.
    pub fn build(self) -> ClusterState {
        self.state
    }
}

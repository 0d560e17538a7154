//! Cluster state model and change events.

pub mod events;
pub mod state;

pub use events::{ClusterChangedEvent, ClusterStateListener};
pub use state::{
    state_not_recovered_block, ClusterBlock, ClusterBlocks, ClusterState, ClusterStateBuilder,
    DiscoveryNodes, IndexMetaData, IndexRoutingTable, IndexShardRoutingTable, MetaData,
    RoutingTable, ShardRouting, ShardRoutingState, STATE_NOT_RECOVERED_BLOCK_ID,
};

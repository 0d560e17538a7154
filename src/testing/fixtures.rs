//! Cluster state builders for tests and demos.

use crate::cluster::{
    ClusterState, DiscoveryNodes, IndexMetaData, IndexRoutingTable, MetaData, RoutingTable,
    ShardRouting, ShardRoutingState,
};
use crate::types::{DiscoveryNode, NodeId, NodeRoles, ShardId};

/// A shard copy on `node`.
pub fn shard_copy(
    index: &str,
    id: u32,
    node: NodeId,
    primary: bool,
    state: ShardRoutingState,
    version: u64,
) -> ShardRouting {
    ShardRouting::new(ShardId::new(index, id), Some(node), primary, state, version)
}

/// Group shard copies into a routing table.
pub fn routing_table(copies: impl IntoIterator<Item = ShardRouting>) -> RoutingTable {
    let mut table = RoutingTable::default();
    for copy in copies {
        let index = copy.shard_id.index.clone();
        let existing = table
            .indices
            .remove(&index)
            .unwrap_or_else(|| IndexRoutingTable::new(index));
        table = table.with_index(existing.with_shard(copy));
    }
    table
}

/// Metadata at `version` holding open `indices` with one shard each.
pub fn meta_data(version: u64, indices: &[&str]) -> MetaData {
    indices.iter().fold(
        MetaData::default().with_version(version),
        |meta, index| meta.with_index(IndexMetaData::new(*index, 1, 0)),
    )
}

/// Node set from `(id, roles)` pairs. The first master-eligible node is
/// the elected master.
pub fn discovery_nodes(nodes: &[(NodeId, NodeRoles)]) -> DiscoveryNodes {
    let mut discovery = DiscoveryNodes::default();
    for &(id, roles) in nodes {
        discovery = discovery.with_node(DiscoveryNode::new(id, format!("node-{}", id), roles));
    }
    if let Some(&(master, _)) = nodes.iter().find(|(_, roles)| roles.master_eligible) {
        discovery = discovery.with_master(master);
    }
    discovery
}

/// A cluster state at `version` with the given parts.
pub fn cluster_state(
    version: u64,
    meta_data: MetaData,
    routing_table: RoutingTable,
    nodes: DiscoveryNodes,
) -> ClusterState {
    ClusterState::builder()
        .version(version)
        .meta_data(meta_data)
        .routing_table(routing_table)
        .nodes(nodes)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_table_groups_by_index() {
        let table = routing_table([
            shard_copy("a", 0, 1, true, ShardRoutingState::Started, 1),
            shard_copy("a", 0, 2, false, ShardRoutingState::Started, 1),
            shard_copy("b", 1, 1, true, ShardRoutingState::Initializing, 1),
        ]);

        assert_eq!(table.indices.len(), 2);
        assert_eq!(table.shard_groups().count(), 2);
        assert!(table.shard_groups().any(|g| g.size() == 2 && g.all_started()));
        assert_eq!(table.shards_on_node(1).count(), 2);
    }

    #[test]
    fn test_discovery_nodes_pick_master() {
        let nodes = discovery_nodes(&[
            (1, NodeRoles::data_only()),
            (2, NodeRoles::master_only()),
            (3, NodeRoles::master_and_data()),
        ]);
        assert_eq!(nodes.master_node_id, Some(2));
        assert_eq!(nodes.master_node_ids().into_iter().collect::<Vec<_>>(), vec![2, 3]);
    }
}

//! End-to-end tests: persistence across nodes, restart and recovery election.

use super::fixtures::{cluster_state, meta_data, routing_table, shard_copy};
use super::TestCluster;
use crate::checkpoint::{list_state_files, MetadataSnapshot, StateKind};
use crate::cluster::{
    state_not_recovered_block, ClusterBlocks, ClusterState, RoutingTable, ShardRoutingState,
};
use crate::network::NodesStateLister;
use crate::types::{NodeId, NodeRoles, ShardId};
use std::path::Path;
use tempfile::tempdir;

const ROLES: [NodeRoles; 3] = [
    NodeRoles {
        master_eligible: true,
        data: true,
    },
    NodeRoles {
        master_eligible: true,
        data: true,
    },
    NodeRoles {
        master_eligible: false,
        data: true,
    },
];

fn versions(path: &Path, kind: StateKind) -> Vec<u64> {
    let mut versions: Vec<u64> = list_state_files(path, kind)
        .unwrap()
        .into_iter()
        .map(|f| f.version)
        .collect();
    versions.sort_unstable();
    versions
}

/// logs/0 primary on node 1, replica on node 3.
fn state(cluster: &TestCluster, version: u64, replica: ShardRoutingState) -> ClusterState {
    cluster_state(
        version,
        meta_data(version, &["logs"]),
        routing_table([
            shard_copy("logs", 0, 1, true, ShardRoutingState::Started, version),
            shard_copy("logs", 0, 3, false, replica, version),
        ]),
        cluster.discovery_nodes(),
    )
}

#[tokio::test]
async fn test_blocked_state_is_not_persisted() {
    let dir = tempdir().unwrap();
    let cluster = TestCluster::new(dir.path(), &ROLES).unwrap();

    let mut blocked = state(&cluster, 1, ShardRoutingState::Started);
    blocked.blocks = ClusterBlocks::default().with_block(state_not_recovered_block());
    cluster.publish(blocked);
    cluster.sync().await.unwrap();

    for node in &cluster.nodes {
        assert!(versions(&node.data_path, StateKind::Metadata).is_empty());
        assert!(versions(&node.data_path, StateKind::StartedShards).is_empty());
    }
    cluster.stop().await;
}

#[tokio::test]
async fn test_persistence_follows_roles_and_routing() {
    let dir = tempdir().unwrap();
    let cluster = TestCluster::new(dir.path(), &ROLES).unwrap();

    cluster.publish(state(&cluster, 2, ShardRoutingState::Initializing));
    cluster.sync().await.unwrap();

    let node1 = &cluster.node(1).data_path;
    let node2 = &cluster.node(2).data_path;
    let node3 = &cluster.node(3).data_path;

    // Masters persist metadata; only node 1 has an active shard.
    assert_eq!(versions(node1, StateKind::Metadata), vec![2]);
    assert_eq!(versions(node2, StateKind::Metadata), vec![2]);
    assert!(versions(node3, StateKind::Metadata).is_empty());
    assert_eq!(versions(node1, StateKind::StartedShards), vec![2]);
    assert!(versions(node2, StateKind::StartedShards).is_empty());
    assert!(versions(node3, StateKind::StartedShards).is_empty());

    cluster.publish(state(&cluster, 3, ShardRoutingState::Started));
    cluster.sync().await.unwrap();

    // Older versions are cleaned up.
    assert_eq!(versions(node1, StateKind::Metadata), vec![3]);
    assert_eq!(versions(node1, StateKind::StartedShards), vec![3]);
    assert_eq!(versions(node3, StateKind::StartedShards), vec![3]);

    let shard = ShardId::new("logs", 0);
    let started = cluster.node(3).gateway.current_started_shards().unwrap();
    assert_eq!(started.get(&shard), Some(3));

    // Deleting the index forgets its shards everywhere.
    cluster.publish(cluster_state(
        4,
        meta_data(4, &[]),
        RoutingTable::default(),
        cluster.discovery_nodes(),
    ));
    cluster.sync().await.unwrap();

    for node_id in [1, 3] {
        let started = cluster.node(node_id).gateway.current_started_shards().unwrap();
        assert_eq!(started.version, 4);
        assert!(started.is_empty());
    }
    cluster.stop().await;
}

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = tempdir().unwrap();
    {
        let cluster = TestCluster::new(dir.path(), &ROLES).unwrap();
        cluster.publish(state(&cluster, 5, ShardRoutingState::Started));
        cluster.sync().await.unwrap();
        cluster.stop().await;
    }

    let cluster = TestCluster::new(dir.path(), &ROLES).unwrap();
    assert_eq!(cluster.node(1).gateway.current_metadata().unwrap().version, 5);
    assert!(cluster.node(3).gateway.current_metadata().is_none());
    assert_eq!(
        cluster
            .node(3)
            .gateway
            .current_started_shards()
            .unwrap()
            .get(&ShardId::new("logs", 0)),
        Some(5)
    );

    let recovered = cluster
        .node(3)
        .gateway
        .perform_state_recovery(&cluster.discovery_nodes())
        .await
        .unwrap();
    assert_eq!(recovered.version, 5);
    assert_eq!(recovered.meta_data.version, 5);
    assert!(recovered.meta_data.has_index("logs"));
    cluster.stop().await;
}

#[tokio::test]
async fn test_election_skips_crashed_nodes() {
    let dir = tempdir().unwrap();
    let cluster = TestCluster::new(dir.path(), &ROLES).unwrap();

    cluster.publish(state(&cluster, 3, ShardRoutingState::Started));
    cluster.sync().await.unwrap();

    // Node 2 holds newer metadata than anybody else.
    cluster
        .node(2)
        .gateway
        .store()
        .write_metadata(MetadataSnapshot::new(9, meta_data(9, &["logs", "metrics"])))
        .unwrap();

    let nodes = cluster.discovery_nodes();
    let elect = |node_id: NodeId| {
        let gateway = cluster.node(node_id).gateway.clone();
        let nodes = nodes.clone();
        async move { gateway.perform_state_recovery(&nodes).await.unwrap() }
    };

    assert_eq!(elect(1).await.version, 9);

    cluster.crash_node(2);
    let recovered = elect(1).await;
    assert_eq!(recovered.version, 3);
    assert!(!recovered.meta_data.has_index("metrics"));

    cluster.crash_node(1);
    assert!(elect(3).await.is_empty());

    cluster.recover_node(1);
    cluster.recover_node(2);
    assert_eq!(elect(3).await.version, 9);
    cluster.stop().await;
}

#[tokio::test]
async fn test_list_started_shards_across_nodes() {
    let dir = tempdir().unwrap();
    let cluster = TestCluster::new(dir.path(), &ROLES).unwrap();

    cluster.publish(state(&cluster, 6, ShardRoutingState::Relocating));
    cluster.sync().await.unwrap();

    let shard = ShardId::new("logs", 0);
    let all: std::collections::BTreeSet<NodeId> = [1, 2, 3].into_iter().collect();
    let response = cluster
        .lister
        .list_started_shards(&shard, &all)
        .await
        .unwrap();

    assert!(response.failures.is_empty());
    let held: Vec<(NodeId, Option<u64>)> = response
        .reports
        .iter()
        .map(|r| (r.node_id, r.version))
        .collect();
    assert_eq!(held, vec![(1, Some(6)), (2, None), (3, Some(6))]);
    assert_eq!(response.highest_version().unwrap().node_id, 1);
    cluster.stop().await;
}

//! Started-shards derivation from routing table changes.

use crate::checkpoint::StartedShardsSnapshot;
use crate::cluster::ClusterState;
use crate::types::ShardId;

/// Outcome of [`derive_started_shards`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedShards {
    /// The snapshot to persist.
    pub snapshot: StartedShardsSnapshot,
    /// Whether any shard entry was added, updated or removed.
    pub changed: bool,
}

/// Compute the started shards this node should remember after `state`.
///
/// Starts from `previous` (or empty), stamped with the cluster state
/// version, then:
///
/// 1. forgets shards whose every copy is started, since they no longer
///    need this node's copy for recovery;
/// 2. forgets shards whose index was deleted;
/// 3. remembers every active shard routed to the local node, with its
///    routing version.
///
/// Removals run before additions, so a shard that is active here always
/// ends up remembered. A closed index has no routing entries, so its
/// shards are kept until the index is deleted.
///
/// Pure: the same inputs always yield the same output.
pub fn derive_started_shards(
    previous: Option<&StartedShardsSnapshot>,
    state: &ClusterState,
) -> DerivedShards {
    let mut snapshot = previous.cloned().unwrap_or_default();
    snapshot.version = state.version;

    let mut changed = false;

    for group in state.routing_table.shard_groups() {
        if group.all_started() {
            changed |= snapshot.remove(&group.shard_id);
        }
    }

    let deleted: Vec<ShardId> = snapshot
        .shards
        .keys()
        .filter(|shard_id| !state.meta_data.has_index(shard_id.index_name()))
        .cloned()
        .collect();
    for shard_id in &deleted {
        changed |= snapshot.remove(shard_id);
    }

    // our node is not in play yet if it has no id
    if let Some(local_node_id) = state.nodes.local_node_id {
        for routing in state.routing_table.shards_on_node(local_node_id) {
            if routing.active() {
                changed |= snapshot.put(routing.shard_id.clone(), routing.version);
            }
        }
    }

    DerivedShards { snapshot, changed }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{
        DiscoveryNodes, IndexMetaData, IndexRoutingTable, MetaData, RoutingTable, ShardRouting,
        ShardRoutingState,
    };
    use crate::types::NodeId;

    const LOCAL: NodeId = 1;
    const REMOTE: NodeId = 2;

    fn copy(index: &str, id: u32, node: NodeId, state: ShardRoutingState, version: u64) -> ShardRouting {
        ShardRouting::new(ShardId::new(index, id), Some(node), node == LOCAL, state, version)
    }

    fn state_with(version: u64, indices: &[&str], routing: Vec<ShardRouting>) -> ClusterState {
        let mut meta = MetaData::default().with_version(version);
        for index in indices {
            meta = meta.with_index(IndexMetaData::new(*index, 2, 1));
        }

        let mut table = RoutingTable::default();
        for r in routing {
            let index = r.shard_id.index.clone();
            let existing = table
                .indices
                .remove(&index)
                .unwrap_or_else(|| IndexRoutingTable::new(index));
            table = table.with_index(existing.with_shard(r));
        }

        ClusterState::builder()
            .version(version)
            .meta_data(meta)
            .routing_table(table)
            .nodes(DiscoveryNodes::default().with_local(LOCAL))
            .build()
    }

    fn previous(entries: &[(&str, u32, u64)]) -> StartedShardsSnapshot {
        let mut snapshot = StartedShardsSnapshot::new(1);
        for (index, id, version) in entries {
            snapshot.put(ShardId::new(*index, *id), *version);
        }
        snapshot
    }

    #[test]
    fn test_deleted_index_is_forgotten() {
        let prev = previous(&[("a", 0, 1)]);
        let state = state_with(5, &[], vec![]);

        let derived = derive_started_shards(Some(&prev), &state);
        assert!(derived.changed);
        assert!(derived.snapshot.is_empty());
        assert_eq!(derived.snapshot.version, 5);
    }

    #[test]
    fn test_active_local_shards_are_remembered() {
        let state = state_with(
            3,
            &["a"],
            vec![
                copy("a", 0, LOCAL, ShardRoutingState::Started, 4),
                copy("a", 0, REMOTE, ShardRoutingState::Initializing, 2),
                copy("a", 1, LOCAL, ShardRoutingState::Relocating, 6),
                copy("a", 1, REMOTE, ShardRoutingState::Initializing, 1),
                copy("a", 2, LOCAL, ShardRoutingState::Initializing, 9),
            ],
        );

        let derived = derive_started_shards(None, &state);
        assert!(derived.changed);
        assert_eq!(derived.snapshot.len(), 2);
        assert_eq!(derived.snapshot.get(&ShardId::new("a", 0)), Some(4));
        assert_eq!(derived.snapshot.get(&ShardId::new("a", 1)), Some(6));
        assert_eq!(derived.snapshot.get(&ShardId::new("a", 2)), None);
    }

    #[test]
    fn test_fully_started_remote_shard_is_forgotten() {
        let prev = previous(&[("a", 0, 3)]);
        let state = state_with(
            7,
            &["a"],
            vec![
                copy("a", 0, REMOTE, ShardRoutingState::Started, 4),
                copy("a", 0, 3, ShardRoutingState::Started, 5),
            ],
        );

        let derived = derive_started_shards(Some(&prev), &state);
        assert!(derived.changed);
        assert!(derived.snapshot.is_empty());
    }

    #[test]
    fn test_fully_started_local_shard_is_kept() {
        let prev = previous(&[("a", 0, 3)]);
        let state = state_with(
            7,
            &["a"],
            vec![
                copy("a", 0, LOCAL, ShardRoutingState::Started, 3),
                copy("a", 0, REMOTE, ShardRoutingState::Started, 5),
            ],
        );

        // Removed then re-added with the same version: the map is unchanged
        // in content but was mutated along the way.
        let derived = derive_started_shards(Some(&prev), &state);
        assert_eq!(derived.snapshot.get(&ShardId::new("a", 0)), Some(3));
        assert!(derived.changed);
    }

    #[test]
    fn test_closed_index_shards_are_kept() {
        let prev = previous(&[("closed", 0, 2)]);
        let mut state = state_with(4, &[], vec![]);
        state.meta_data = state
            .meta_data
            .clone()
            .with_index(IndexMetaData::new("closed", 1, 0).closed());

        let derived = derive_started_shards(Some(&prev), &state);
        assert!(!derived.changed);
        assert_eq!(derived.snapshot.get(&ShardId::new("closed", 0)), Some(2));
        assert_eq!(derived.snapshot.version, 4);
    }

    #[test]
    fn test_unassigned_local_node_adds_nothing() {
        let mut state = state_with(
            2,
            &["a"],
            vec![copy("a", 0, LOCAL, ShardRoutingState::Started, 1)],
        );
        state.nodes = DiscoveryNodes::default();

        let derived = derive_started_shards(None, &state);
        assert!(!derived.changed);
        assert!(derived.snapshot.is_empty());
    }

    #[test]
    fn test_derivation_is_idempotent() {
        let prev = previous(&[("a", 0, 1), ("gone", 0, 1)]);
        let state = state_with(
            9,
            &["a", "b"],
            vec![
                copy("a", 0, LOCAL, ShardRoutingState::Started, 2),
                copy("a", 0, REMOTE, ShardRoutingState::Initializing, 1),
                copy("b", 0, LOCAL, ShardRoutingState::Relocating, 3),
            ],
        );

        let first = derive_started_shards(Some(&prev), &state);
        let second = derive_started_shards(Some(&prev), &state);
        assert_eq!(first, second);
        assert_eq!(prev, previous(&[("a", 0, 1), ("gone", 0, 1)]));

        // Feeding the output back in reports no further change.
        let again = derive_started_shards(Some(&first.snapshot), &state);
        assert!(!again.changed);
        assert_eq!(again.snapshot, first.snapshot);
    }
}

//! Core types used throughout the gateway.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Node identifier in the cluster.
pub type NodeId = u64;

/// Identifies one shard of one index.
///
/// Ordered by index name, then shard number, so maps keyed by it serialize
/// in a stable order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardId {
    /// Name of the owning index.
    pub index: String,
    /// Shard number within the index.
    pub id: u32,
}

impl ShardId {
    /// Create a new shard id.
    pub fn new(index: impl Into<String>, id: u32) -> Self {
        Self {
            index: index.into(),
            id,
        }
    }

    /// Name of the index this shard belongs to.
    pub fn index_name(&self) -> &str {
        &self.index
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}][{}]", self.index, self.id)
    }
}

/// Roles a node plays in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRoles {
    /// Whether the node may be elected master.
    pub master_eligible: bool,
    /// Whether the node holds shard data.
    pub data: bool,
}

impl Default for NodeRoles {
    fn default() -> Self {
        Self {
            master_eligible: true,
            data: true,
        }
    }
}

impl NodeRoles {
    /// A node that is both master-eligible and holds data.
    pub fn master_and_data() -> Self {
        Self::default()
    }

    /// A dedicated master-eligible node.
    pub fn master_only() -> Self {
        Self {
            master_eligible: true,
            data: false,
        }
    }

    /// A data-only node.
    pub fn data_only() -> Self {
        Self {
            master_eligible: false,
            data: true,
        }
    }

    /// A coordinating-only node.
    pub fn coordinating_only() -> Self {
        Self {
            master_eligible: false,
            data: false,
        }
    }

    /// Coordinating-only nodes keep no local state.
    pub fn requires_state_persistence(&self) -> bool {
        self.master_eligible || self.data
    }
}

/// A node as seen in the cluster state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryNode {
    /// Unique node identifier.
    pub id: NodeId,
    /// Human readable node name.
    pub name: String,
    /// Roles of the node.
    pub roles: NodeRoles,
}

impl DiscoveryNode {
    /// Create a new node description.
    pub fn new(id: NodeId, name: impl Into<String>, roles: NodeRoles) -> Self {
        Self {
            id,
            name: name.into(),
            roles,
        }
    }

    /// Whether this node may be elected master.
    pub fn is_master_eligible(&self) -> bool {
        self.roles.master_eligible
    }

    /// Whether this node holds shard data.
    pub fn is_data_node(&self) -> bool {
        self.roles.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_shard_id_ordering() {
        let mut map = BTreeMap::new();
        map.insert(ShardId::new("b", 0), 1);
        map.insert(ShardId::new("a", 1), 2);
        map.insert(ShardId::new("a", 0), 3);

        let keys: Vec<_> = map.keys().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["[a][0]", "[a][1]", "[b][0]"]);
    }

    #[test]
    fn test_roles_require_persistence() {
        assert!(NodeRoles::master_and_data().requires_state_persistence());
        assert!(NodeRoles::master_only().requires_state_persistence());
        assert!(NodeRoles::data_only().requires_state_persistence());
        assert!(!NodeRoles::coordinating_only().requires_state_persistence());
    }
}

//! Snapshot types persisted by the local gateway.

use crate::checkpoint::format::{PersistedState, StateKind};
use crate::cluster::MetaData;
use crate::types::ShardId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Last cluster metadata this node observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataSnapshot {
    /// Metadata version; also the file version.
    pub version: u64,
    /// The cluster metadata itself.
    pub meta_data: MetaData,
}

impl MetadataSnapshot {
    /// Create a snapshot.
    pub fn new(version: u64, meta_data: MetaData) -> Self {
        Self { version, meta_data }
    }

    /// Build the next snapshot from the previous one, overwriting version
    /// and metadata.
    pub fn next(previous: Option<&MetadataSnapshot>, meta_data: &MetaData) -> Self {
        let mut snapshot = previous.cloned().unwrap_or_else(|| Self::new(0, MetaData::default()));
        snapshot.version = meta_data.version;
        snapshot.meta_data = meta_data.clone();
        snapshot
    }
}

impl PersistedState for MetadataSnapshot {
    const KIND: StateKind = StateKind::Metadata;

    fn version(&self) -> u64 {
        self.version
    }
}

/// Shards this node had active, with the routing version of each.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StartedShardsSnapshot {
    /// Cluster state version the snapshot was derived from.
    pub version: u64,
    /// Shard id to routing version.
    #[serde(with = "shard_entries")]
    pub shards: BTreeMap<ShardId, u64>,
}

impl StartedShardsSnapshot {
    /// Create an empty snapshot.
    pub fn new(version: u64) -> Self {
        Self {
            version,
            shards: BTreeMap::new(),
        }
    }

    /// Routing version of a shard, if remembered.
    pub fn get(&self, shard_id: &ShardId) -> Option<u64> {
        self.shards.get(shard_id).copied()
    }

    /// Insert or update a shard. Returns whether the map changed.
    pub fn put(&mut self, shard_id: ShardId, version: u64) -> bool {
        self.shards.insert(shard_id, version) != Some(version)
    }

    /// Forget a shard. Returns whether the map changed.
    pub fn remove(&mut self, shard_id: &ShardId) -> bool {
        self.shards.remove(shard_id).is_some()
    }

    /// Number of remembered shards.
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    /// Whether no shard is remembered.
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }
}

impl PersistedState for StartedShardsSnapshot {
    const KIND: StateKind = StateKind::StartedShards;

    fn version(&self) -> u64 {
        self.version
    }
}

/// Serializes the shard map as a list of entries, since JSON object keys
/// must be strings.
mod shard_entries {
    use crate::types::ShardId;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    #[derive(Serialize, Deserialize)]
    struct ShardEntry {
        index: String,
        id: u32,
        version: u64,
    }

    pub fn serialize<S: Serializer>(
        shards: &BTreeMap<ShardId, u64>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let entries: Vec<ShardEntry> = shards
            .iter()
            .map(|(shard_id, version)| ShardEntry {
                index: shard_id.index.clone(),
                id: shard_id.id,
                version: *version,
            })
            .collect();
        entries.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<ShardId, u64>, D::Error> {
        let entries = Vec::<ShardEntry>::deserialize(deserializer)?;
        Ok(entries
            .into_iter()
            .map(|e| (ShardId::new(e.index, e.id), e.version))
            .collect())
    }
}

//! Persistence trigger: decides what each cluster state change persists.

use crate::checkpoint::LocalStateStore;
use crate::cluster::{ClusterChangedEvent, ClusterStateListener};
use crate::gateway::persist::{MetadataJob, PersistJob, PersistenceWorker, StartedShardsJob};
use crate::gateway::shards::derive_started_shards;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// The persistence work one event calls for.
#[derive(Debug, Default)]
pub struct PersistDecision {
    /// Metadata to persist.
    pub metadata: Option<MetadataJob>,
    /// Started shards to persist.
    pub started_shards: Option<StartedShardsJob>,
}

impl PersistDecision {
    /// Whether nothing needs persisting.
    pub fn is_empty(&self) -> bool {
        self.metadata.is_none() && self.started_shards.is_none()
    }

    /// The jobs to submit, metadata first.
    pub fn into_jobs(self) -> impl Iterator<Item = PersistJob> {
        self.metadata
            .map(PersistJob::Metadata)
            .into_iter()
            .chain(self.started_shards.map(PersistJob::StartedShards))
    }
}

/// Listens to cluster state changes and queues persistence jobs.
///
/// Never touches the disk itself: the only I/O on this path is the lazy
/// first load of the store's current snapshots.
pub struct PersistenceTrigger {
    store: Arc<LocalStateStore>,
    worker: Arc<PersistenceWorker>,
    metadata_persisted: Arc<AtomicBool>,
}

impl PersistenceTrigger {
    /// Create a trigger feeding `worker`.
    ///
    /// `metadata_persisted` is shared with the worker, which sets it after
    /// the first successful metadata write.
    pub fn new(
        store: Arc<LocalStateStore>,
        worker: Arc<PersistenceWorker>,
        metadata_persisted: Arc<AtomicBool>,
    ) -> Self {
        Self {
            store,
            worker,
            metadata_persisted,
        }
    }

    /// Whether metadata was written at least once since start.
    pub fn metadata_persisted_at_least_once(&self) -> bool {
        self.metadata_persisted.load(Ordering::SeqCst)
    }

    /// Decide what `event` requires persisting.
    pub fn evaluate(&self, event: &ClusterChangedEvent) -> PersistDecision {
        let mut decision = PersistDecision::default();

        if !self.store.requires_state_persistence() {
            return decision;
        }

        let state = event.state();

        // nothing to do until we actually recover from the gateway or any other block indicates we need to disable persistency
        if state.blocks.disable_state_persistence() {
            trace!(version = state.version, "State persistence disabled by block");
            return decision;
        }

        let roles = self.store.roles();
        let (master_eligible, data) = match state.nodes.local_node() {
            Some(node) => (node.is_master_eligible(), node.is_data_node()),
            None => (roles.master_eligible, roles.data),
        };

        if master_eligible
            && (event.meta_data_changed() || !self.metadata_persisted_at_least_once())
        {
            decision.metadata = Some(MetadataJob {
                cluster_version: state.version,
                meta_data: state.meta_data.clone(),
            });
        }

        if data && event.routing_table_changed() {
            let current = self.store.current_started_shards();
            let derived = derive_started_shards(current.as_deref(), state);

            // only write if something changed
            if derived.changed {
                decision.started_shards = Some(StartedShardsJob {
                    snapshot: derived.snapshot,
                });
            } else {
                trace!(version = state.version, "Started shards unchanged");
            }
        }

        decision
    }
}

impl ClusterStateListener for PersistenceTrigger {
    fn cluster_changed(&self, event: &ClusterChangedEvent) {
        let decision = self.evaluate(event);
        if decision.is_empty() {
            return;
        }

        debug!(
            source = event.source(),
            version = event.state().version,
            metadata = decision.metadata.is_some(),
            started_shards = decision.started_shards.is_some(),
            "Queueing local gateway persistence"
        );
        for job in decision.into_jobs() {
            self.worker.submit(job);
        }
    }
}

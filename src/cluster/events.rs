//! Cluster state change events.

use crate::cluster::state::ClusterState;
use std::sync::Arc;

/// A transition from one cluster state to the next.
///
/// The change flags are derived from the two states on construction but
/// can be overridden, since the cluster-state engine knows better when it
/// published a change.
#[derive(Debug, Clone)]
pub struct ClusterChangedEvent {
    source: String,
    state: Arc<ClusterState>,
    previous_state: Arc<ClusterState>,
    meta_data_changed: bool,
    routing_table_changed: bool,
}

impl ClusterChangedEvent {
    /// Create an event for the transition `previous_state -> state`.
    pub fn new(
        source: impl Into<String>,
        state: Arc<ClusterState>,
        previous_state: Arc<ClusterState>,
    ) -> Self {
        let meta_data_changed = state.meta_data.version != previous_state.meta_data.version
            || state.meta_data.indices != previous_state.meta_data.indices;
        let routing_table_changed = state.routing_table != previous_state.routing_table;

        Self {
            source: source.into(),
            state,
            previous_state,
            meta_data_changed,
            routing_table_changed,
        }
    }

    /// Override the metadata change flag.
    pub fn with_meta_data_changed(mut self, changed: bool) -> Self {
        self.meta_data_changed = changed;
        self
    }

    /// Override the routing change flag.
    pub fn with_routing_table_changed(mut self, changed: bool) -> Self {
        self.routing_table_changed = changed;
        self
    }

    /// What caused the transition.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The new state.
    pub fn state(&self) -> &Arc<ClusterState> {
        &self.state
    }

    /// The state before the transition.
    pub fn previous_state(&self) -> &Arc<ClusterState> {
        &self.previous_state
    }

    /// Whether metadata changed.
    pub fn meta_data_changed(&self) -> bool {
        self.meta_data_changed
    }

    /// Whether the routing table changed.
    pub fn routing_table_changed(&self) -> bool {
        self.routing_table_changed
    }
}

/// Listener for cluster state transitions.
pub trait ClusterStateListener: Send + Sync + 'static {
    /// Called once per applied cluster state. Must not block on I/O.
    fn cluster_changed(&self, event: &ClusterChangedEvent);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::state::{IndexMetaData, IndexRoutingTable, MetaData, RoutingTable};

    #[test]
    fn test_change_flags_derived() {
        let previous = Arc::new(ClusterState::default());
        let state = Arc::new(
            ClusterState::builder()
                .version(1)
                .meta_data(
                    MetaData::default()
                        .with_version(1)
                        .with_index(IndexMetaData::new("a", 1, 0)),
                )
                .build(),
        );

        let event = ClusterChangedEvent::new("create-index", state.clone(), previous);
        assert!(event.meta_data_changed());
        assert!(!event.routing_table_changed());
        assert_eq!(event.source(), "create-index");

        let routed = Arc::new(
            ClusterState::builder()
                .version(2)
                .meta_data(state.meta_data.clone())
                .routing_table(RoutingTable::default().with_index(IndexRoutingTable::new("a")))
                .build(),
        );
        let event = ClusterChangedEvent::new("reroute", routed, state);
        assert!(!event.meta_data_changed());
        assert!(event.routing_table_changed());
    }

    #[test]
    fn test_change_flags_override() {
        let state = Arc::new(ClusterState::default());
        let event = ClusterChangedEvent::new("noop", state.clone(), state)
            .with_meta_data_changed(true)
            .with_routing_table_changed(true);
        assert!(event.meta_data_changed());
        assert!(event.routing_table_changed());
    }
}

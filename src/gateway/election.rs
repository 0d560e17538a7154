//! Recovery election: pick the most advanced metadata among peers.

use crate::cluster::ClusterState;
use crate::error::{Error, Result};
use crate::network::{NodeMetadataReport, NodesMetadataResponse, NodesStateLister};
use crate::types::NodeId;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pick the report with the highest metadata version.
///
/// Nodes without metadata do not take part. Among equal versions the
/// lowest node id wins, so the outcome does not depend on the order in
/// which nodes answered.
pub fn select_elected(response: &NodesMetadataResponse) -> Option<&NodeMetadataReport> {
    let mut elected: Option<(&NodeMetadataReport, u64)> = None;

    for report in &response.reports {
        let Some(snapshot) = &report.snapshot else {
            continue;
        };
        let better = match elected {
            None => true,
            Some((best, version)) => {
                snapshot.version > version
                    || (snapshot.version == version && report.node_id < best.node_id)
            }
        };
        if better {
            elected = Some((report, snapshot.version));
        }
    }

    elected.map(|(report, _)| report)
}

/// Asks master-eligible nodes for their local metadata and elects the
/// cluster state to recover from.
pub struct RecoveryElection {
    lister: Arc<dyn NodesStateLister>,
    timeout: Duration,
}

impl RecoveryElection {
    /// Create an election over `lister`, bounded by `timeout` overall.
    pub fn new(lister: Arc<dyn NodesStateLister>, timeout: Duration) -> Self {
        Self { lister, timeout }
    }

    /// Run the election among `node_ids`.
    ///
    /// Nodes that fail to answer are logged and left out. If no node has
    /// metadata the empty bootstrap state is returned.
    pub async fn elect(&self, node_ids: &BTreeSet<NodeId>) -> Result<ClusterState> {
        debug!(nodes = ?node_ids, "Listing local metadata for recovery");

        let response = tokio::time::timeout(self.timeout, self.lister.list_metadata(node_ids))
            .await
            .map_err(|_| Error::Timeout)??;

        for failure in &response.failures {
            warn!(
                node_id = failure.node_id,
                reason = %failure.reason,
                "failed to fetch state from node"
            );
        }

        let Some(elected) = select_elected(&response) else {
            info!(
                responded = response.reports.len(),
                failed = response.failures.len(),
                "No local metadata found on any node, recovering empty state"
            );
            return Ok(ClusterState::default());
        };

        // select_elected only returns reports carrying a snapshot
        let snapshot = match &elected.snapshot {
            Some(snapshot) => snapshot,
            None => return Ok(ClusterState::default()),
        };

        info!(
            node_id = elected.node_id,
            version = snapshot.version,
            indices = snapshot.meta_data.indices.len(),
            "Elected local metadata for recovery"
        );

        let mut meta_data = snapshot.meta_data.clone();
        meta_data.version = snapshot.version;

        Ok(ClusterState::builder()
            .version(snapshot.version)
            .meta_data(meta_data)
            .build())
    }
}

//! Node-local state persistence and recovery election for a sharded cluster.
//!
//! Every node remembers, across restarts, the last cluster metadata it
//! observed and the shards it had active. On cluster bootstrap the
//! master-eligible nodes are asked for their local metadata and the most
//! advanced one seeds the recovered cluster state.
//!
//! # Features
//!
//! - Versioned snapshot files under each data location's `_state` folder
//! - Atomic replace (temp file, fsync, rename) and cleanup of old versions
//! - Change-driven persistence off the cluster state apply path
//! - Incremental started-shards derivation from routing table changes
//! - Quorumless "highest version wins" recovery election
//!
//! # Example
//!
//! ```rust,no_run
//! use crema_gateway::{FanOutLister, GatewayConfig, LocalGateway, NodeEnvironment, NodeRoles};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = GatewayConfig::default()
//!         .with_compression(true)
//!         .with_shutdown_timeout(Duration::from_secs(10));
//!
//!     // Peers are registered on the lister as they are discovered
//!     let lister = Arc::new(FanOutLister::new(config.node_timeout));
//!
//!     let gateway = LocalGateway::new(
//!         NodeEnvironment::new(["/var/lib/node/data"]),
//!         config,
//!         NodeRoles::master_and_data(),
//!         lister,
//!     );
//!     gateway.start()?;
//!
//!     // On bootstrap, elect the state to recover from
//!     let nodes = crema_gateway::cluster::DiscoveryNodes::default();
//!     let recovered = gateway.perform_state_recovery(&nodes).await?;
//!     println!("recovered cluster state version {}", recovered.version);
//!
//!     // Afterwards, every applied cluster state goes through
//!     // `gateway.cluster_changed(&event)`
//!
//!     gateway.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │        Cluster state engine (external)      │
//! └─────────────────────────────────────────────┘
//!          │ cluster_changed        ▲ perform_state_recovery
//!          ▼                        │
//! ┌─────────────────────────────────────────────┐
//! │               LocalGateway                  │
//! │  • PersistenceTrigger                       │
//! │  • PersistenceWorker (single lane)          │
//! │  • RecoveryElection                         │
//! └─────────────────────────────────────────────┘
//!          │                        │
//!          ▼                        ▼
//! ┌─────────────────┐      ┌─────────────────┐
//! │ LocalStateStore │◄─────│  FanOutLister   │
//! │  (_state files) │ peers│ (bincode/TCP)   │
//! └─────────────────┘      └─────────────────┘
//! ```
//!
//! # Durability Model
//!
//! - **Writes**: succeed if at least one data location took the file
//! - **Reads**: newest version that decodes wins; corrupt files are skipped
//! - **Election**: best effort; failed peers are left out, never fatal

pub mod checkpoint;
pub mod cluster;
pub mod config;
pub mod error;
pub mod gateway;
pub mod network;
pub mod testing;
pub mod types;

// Re-export main types for convenience
pub use config::{GatewayConfig, NodeEnvironment};
pub use error::{Error, NetworkError, Result, StorageError};
pub use types::{DiscoveryNode, NodeId, NodeRoles, ShardId};

// Re-export checkpoint types
pub use checkpoint::{
    FormatError, LocalStateStore, MetadataSnapshot, StartedShardsSnapshot, StateCodec, StateKind,
};

// Re-export cluster types
pub use cluster::{ClusterChangedEvent, ClusterState, ClusterStateListener};

// Re-export gateway types
pub use gateway::{
    derive_started_shards, LocalGateway, PersistenceTrigger, PersistenceWorker, RecoveryElection,
};

// Re-export network types
pub use network::{
    FanOutLister, GatewayRequestHandler, GatewayServer, LoopbackClient, NodeStateClient,
    NodesStateLister, TcpNodeClient,
};

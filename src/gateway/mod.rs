//! Local gateway: persist cluster state on every node, elect it back on
//! cluster bootstrap.
//!
//! # Architecture
//!
//! ```text
//!   cluster state applied
//!            │
//!            ▼
//! ┌──────────────────────┐  derive_started_shards()
//! │  PersistenceTrigger  │───────────────────────────┐
//! └──────────────────────┘                           │
//!            │ PersistJob (FIFO)                     │
//!            ▼                                       │
//! ┌──────────────────────┐                           │
//! │  PersistenceWorker   │  single thread            │
//! └──────────────────────┘                           │
//!            │                                       │
//!            ▼                                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │                   LocalStateStore                    │
//! │   <data>/_state/metadata-<v>   <data>/_state/shards-<v>
//! └──────────────────────────────────────────────────────┘
//!            ▲
//!            │ ListMetadata (per master-eligible node)
//! ┌──────────────────────┐
//! │   RecoveryElection   │  highest version wins
//! └──────────────────────┘
//! ```

pub mod election;
pub mod listener;
pub mod local;
pub mod persist;
pub mod shards;

pub use election::{select_elected, RecoveryElection};
pub use listener::{PersistDecision, PersistenceTrigger};
pub use local::{LocalGateway, LOCAL_GATEWAY_TYPE};
pub use persist::{MetadataJob, PersistJob, PersistenceWorker, StartedShardsJob, WorkerStats};
pub use shards::{derive_started_shards, DerivedShards};

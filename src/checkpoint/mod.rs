//! Local state persistence.
//!
//! This module keeps the node's last observed cluster metadata and the set
//! of shards it had active, so both survive a restart. Key features:
//!
//! - One `_state` folder per data location, written independently
//! - Versioned file names (`metadata-<v>`, `shards-<v>`); no manifest
//! - Write to temp, fsync, rename; then drop older versions
//! - Optional LZ4 compression, detected on read by the frame magic
//! - Corrupt or truncated files are skipped when looking for the latest
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    LocalStateStore                          │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────┐ │
//! │  │ write_state_file│  │ list_state_files│  │ StateCodec  │ │
//! │  │ (tmp + rename)  │  │ (version scan)  │  │ (json, lz4) │ │
//! │  └────────┬────────┘  └────────┬────────┘  └─────────────┘ │
//! │           ▼                    ▼                            │
//! │  ┌─────────────────────────────────────────────────────┐   │
//! │  │   <data location>/_state/{metadata,shards}-<v>       │   │
//! │  └─────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use crema_gateway::checkpoint::{LocalStateStore, MetadataSnapshot};
//! use crema_gateway::cluster::MetaData;
//! use crema_gateway::config::{GatewayConfig, NodeEnvironment};
//! use crema_gateway::types::NodeRoles;
//!
//! let store = LocalStateStore::new(
//!     NodeEnvironment::new(["/var/lib/node/data0", "/var/lib/node/data1"]),
//!     &GatewayConfig::default(),
//!     NodeRoles::master_and_data(),
//! );
//!
//! // Loads from disk on first access
//! if let Some(current) = store.current_metadata() {
//!     println!("recovered metadata version {}", current.version);
//! }
//!
//! store.write_metadata(MetadataSnapshot::new(4, MetaData::default().with_version(4)))?;
//! # Ok::<(), crema_gateway::Error>(())
//! ```

mod format;
mod reader;
mod state;
mod store;
mod writer;

pub use format::{FormatError, PersistedState, StateCodec, StateKind, LZ4_FRAME_MAGIC};
pub use reader::{list_state_files, StateFile};
pub use state::{MetadataSnapshot, StartedShardsSnapshot};
pub use store::{LatestState, LocalStateStore};
pub use writer::{state_dir, STATE_DIR_NAME};

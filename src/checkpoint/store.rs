//! Local state store: versioned snapshots across all node data locations.

use crate::checkpoint::format::{PersistedState, StateCodec, StateKind};
use crate::checkpoint::reader::{list_state_files, read_state_file, StateFile};
use crate::checkpoint::state::{MetadataSnapshot, StartedShardsSnapshot};
use crate::checkpoint::writer::{remove_temp_files, state_dir, write_state_file};
use crate::config::{GatewayConfig, NodeEnvironment};
use crate::error::{Result, StorageError};
use crate::types::NodeRoles;
use parking_lot::{Mutex, RwLock};
use std::fs;
use std::io;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// The newest decodable state of one kind, and where it was found.
#[derive(Debug, Clone)]
pub struct LatestState<S> {
    /// File the state was read from.
    pub file: StateFile,
    /// Decoded state.
    pub state: S,
}

/// Owns the on-disk `_state` folders and the in-memory current snapshots.
///
/// The current snapshots are loaded from disk on first access and replaced
/// only after a write reached at least one data location. Writes are
/// expected from a single persistence lane; reads may come from anywhere.
pub struct LocalStateStore {
    /// Data locations.
    env: NodeEnvironment,

    /// Snapshot codec.
    codec: StateCodec,

    /// Roles of the local node; decides which kinds are loaded.
    roles: NodeRoles,

    /// Set once the first disk scan ran (successfully or not).
    initialized: Mutex<bool>,

    /// Current metadata snapshot.
    metadata: RwLock<Option<Arc<MetadataSnapshot>>>,

    /// Current started shards snapshot.
    started_shards: RwLock<Option<Arc<StartedShardsSnapshot>>>,
}

impl LocalStateStore {
    /// Create a store. Nothing is read from disk until first access.
    pub fn new(env: NodeEnvironment, config: &GatewayConfig, roles: NodeRoles) -> Self {
        Self {
            env,
            codec: StateCodec::from_config(config),
            roles,
            initialized: Mutex::new(false),
            metadata: RwLock::new(None),
            started_shards: RwLock::new(None),
        }
    }

    /// Data locations managed by this store.
    pub fn env(&self) -> &NodeEnvironment {
        &self.env
    }

    /// Roles of the local node.
    pub fn roles(&self) -> NodeRoles {
        self.roles
    }

    /// Whether this node keeps any local state at all.
    pub fn requires_state_persistence(&self) -> bool {
        self.roles.requires_state_persistence()
    }

    /// Whether the first disk scan already ran.
    pub fn is_initialized(&self) -> bool {
        *self.initialized.lock()
    }

    /// Current metadata snapshot, loading it from disk on first access.
    pub fn current_metadata(&self) -> Option<Arc<MetadataSnapshot>> {
        self.ensure_initialized();
        self.metadata.read().clone()
    }

    /// Current started shards snapshot, loading it from disk on first access.
    pub fn current_started_shards(&self) -> Option<Arc<StartedShardsSnapshot>> {
        self.ensure_initialized();
        self.started_shards.read().clone()
    }

    /// Run the first disk scan exactly once. Concurrent callers block until
    /// it completes. A failed scan leaves the snapshots unset and is not
    /// retried.
    pub fn ensure_initialized(&self) {
        let mut initialized = self.initialized.lock();
        if *initialized {
            return;
        }
        *initialized = true;

        // if this is not a possible master node or data node, we won't save anything here
        if !self.requires_state_persistence() {
            debug!("Node keeps no local state, skipping recovery");
            return;
        }

        if !self.env.has_data_locations() {
            warn!("No data locations configured, local state cannot be recovered");
            return;
        }

        for location in self.env.node_data_locations() {
            if let Err(e) = remove_temp_files(&state_dir(location)) {
                warn!(path = %location.display(), error = %e, "Failed to clean up temp files");
            }
        }

        if self.roles.master_eligible {
            match self.find_latest::<MetadataSnapshot>() {
                Some(latest) => {
                    debug!(
                        path = %latest.file.path.display(),
                        version = latest.file.version,
                        "[find_latest_state]: loading metadata"
                    );
                    let mut slot = self.metadata.write();
                    if slot.is_none() {
                        *slot = Some(Arc::new(latest.state));
                    }
                }
                None => debug!("[find_latest_state]: no metadata state loaded"),
            }
        }

        if self.roles.data {
            match self.find_latest::<StartedShardsSnapshot>() {
                Some(latest) => {
                    debug!(
                        path = %latest.file.path.display(),
                        version = latest.file.version,
                        "[find_latest_state]: loading started shards"
                    );
                    let mut slot = self.started_shards.write();
                    if slot.is_none() {
                        *slot = Some(Arc::new(latest.state));
                    }
                }
                None => debug!("[find_latest_state]: no started shards loaded"),
            }
        }
    }

    /// Find the newest state of kind `S` that decodes, across all data
    /// locations.
    ///
    /// Candidates are tried from the highest version down; a file that is
    /// empty or fails to decode is skipped in favour of the next one.
    pub fn find_latest<S: PersistedState>(&self) -> Option<LatestState<S>> {
        let kind = S::KIND;
        let mut candidates = Vec::new();

        for location in self.env.node_data_locations() {
            match list_state_files(location, kind) {
                Ok(files) => candidates.extend(files),
                Err(e) => {
                    warn!(
                        path = %location.display(),
                        %kind,
                        error = %e,
                        "[find_latest_state]: failed to list state files"
                    );
                }
            }
        }

        // Sort by version descending
        candidates.sort_by(|a, b| b.version.cmp(&a.version));

        for file in candidates {
            let data = match read_state_file(&file.path) {
                Ok(data) => data,
                Err(e) => {
                    warn!(
                        path = %file.path.display(),
                        error = %e,
                        "[find_latest_state]: failed to read state, ignoring"
                    );
                    continue;
                }
            };

            if data.is_empty() {
                debug!(path = %file.path.display(), "[find_latest_state]: no data, ignoring");
                continue;
            }

            match self.codec.decode::<S>(&data) {
                Ok(state) => return Some(LatestState { file, state }),
                Err(e) => {
                    warn!(
                        path = %file.path.display(),
                        error = %e,
                        "[find_latest_state]: failed to decode state, ignoring"
                    );
                }
            }
        }

        None
    }

    /// Persist a metadata snapshot and make it current.
    pub fn write_metadata(&self, snapshot: MetadataSnapshot) -> Result<()> {
        let version = snapshot.version;
        self.write_files(&snapshot)?;

        *self.metadata.write() = Some(Arc::new(snapshot));
        self.cleanup(StateKind::Metadata, version);
        Ok(())
    }

    /// Persist a started shards snapshot and make it current.
    pub fn write_started_shards(&self, snapshot: StartedShardsSnapshot) -> Result<()> {
        let version = snapshot.version;
        self.write_files(&snapshot)?;

        *self.started_shards.write() = Some(Arc::new(snapshot));
        self.cleanup(StateKind::StartedShards, version);
        Ok(())
    }

    /// Write the encoded state to every data location. Succeeds if at least
    /// one location took it; returns the number that did.
    fn write_files<S: PersistedState>(&self, state: &S) -> Result<usize> {
        let locations = self.env.node_data_locations();
        if locations.is_empty() {
            return Err(StorageError::NoDataLocations.into());
        }

        let name = S::KIND.file_name(state.version());
        let data = self.codec.encode(state)?;

        let mut written = 0;
        for location in locations {
            let dir = state_dir(location);
            match write_state_file(&dir, &name, &data) {
                Ok(path) => {
                    trace!(path = %path.display(), bytes = data.len(), "Wrote state file");
                    written += 1;
                }
                Err(e) => {
                    warn!(
                        path = %dir.join(&name).display(),
                        error = %e,
                        "Failed to write local gateway state"
                    );
                }
            }
        }

        if written == 0 {
            error!(
                file = %name,
                locations = locations.len(),
                "Failed to write local gateway state to any data location"
            );
            return Err(StorageError::WriteFailed {
                name,
                attempted: locations.len(),
            }
            .into());
        }

        debug!(
            file = %name,
            written,
            compressed = self.codec.compresses(),
            "Persisted local gateway state"
        );
        Ok(written)
    }

    /// Delete every file of `kind` except `keep_version`. Best-effort.
    fn cleanup(&self, kind: StateKind, keep_version: u64) {
        for location in self.env.node_data_locations() {
            let files = match list_state_files(location, kind) {
                Ok(files) => files,
                Err(e) => {
                    warn!(path = %location.display(), error = %e, "Failed to list state files for cleanup");
                    continue;
                }
            };

            for file in files.into_iter().filter(|f| f.version != keep_version) {
                debug!(path = %file.path.display(), "Removing old state file");
                if let Err(e) = fs::remove_file(&file.path) {
                    warn!(
                        path = %file.path.display(),
                        error = %e,
                        "Failed to remove old state file"
                    );
                }
            }
        }
    }

    /// Delete every data location recursively.
    ///
    /// Irrecoverable. In-memory snapshots are left as they are.
    pub fn reset(&self) -> Result<()> {
        let mut first_error: Option<io::Error> = None;

        for location in self.env.node_data_locations() {
            if !location.exists() {
                continue;
            }
            info!(path = %location.display(), "Deleting node data location");
            if let Err(e) = fs::remove_dir_all(location) {
                warn!(path = %location.display(), error = %e, "Failed to delete data location");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(StorageError::Io(e).into()),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for LocalStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStateStore")
            .field("locations", &self.env.node_data_locations())
            .field("roles", &self.roles)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

//! Configuration types for the gateway.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Settings key: compress snapshot bytes before writing.
pub const SETTING_COMPRESS: &str = "gateway.local.compress";

/// Settings key: write human readable snapshots.
pub const SETTING_PRETTY: &str = "gateway.local.pretty";

/// Settings key: bounded drain on shutdown, in milliseconds.
pub const SETTING_SHUTDOWN_TIMEOUT_MS: &str = "gateway.local.shutdown_timeout_ms";

/// Settings key: overall election timeout, in milliseconds.
pub const SETTING_ELECTION_TIMEOUT_MS: &str = "gateway.local.election_timeout_ms";

/// Settings key: timeout for a single peer query, in milliseconds.
pub const SETTING_NODE_TIMEOUT_MS: &str = "gateway.local.node_timeout_ms";

/// Configuration for the local gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Whether snapshot bytes are LZ4 compressed before being written.
    pub compress: bool,

    /// Whether the serialized form is pretty printed.
    pub pretty_print: bool,

    /// How long `stop()` waits for queued persistence jobs.
    pub shutdown_timeout: Duration,

    /// Upper bound on a whole recovery election.
    pub election_timeout: Duration,

    /// Upper bound on a single peer query during fan-out.
    pub node_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            compress: true,
            pretty_print: false,
            shutdown_timeout: Duration::from_secs(10),
            election_timeout: Duration::from_secs(30),
            node_timeout: Duration::from_secs(10),
        }
    }
}

impl GatewayConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a configuration from flat node settings.
    ///
    /// Unknown keys are ignored; known keys with unparseable values fail.
    pub fn from_settings(settings: &HashMap<String, String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(value) = settings.get(SETTING_COMPRESS) {
            config.compress = parse_bool(SETTING_COMPRESS, value)?;
        }
        if let Some(value) = settings.get(SETTING_PRETTY) {
            config.pretty_print = parse_bool(SETTING_PRETTY, value)?;
        }
        if let Some(value) = settings.get(SETTING_SHUTDOWN_TIMEOUT_MS) {
            config.shutdown_timeout = parse_millis(SETTING_SHUTDOWN_TIMEOUT_MS, value)?;
        }
        if let Some(value) = settings.get(SETTING_ELECTION_TIMEOUT_MS) {
            config.election_timeout = parse_millis(SETTING_ELECTION_TIMEOUT_MS, value)?;
        }
        if let Some(value) = settings.get(SETTING_NODE_TIMEOUT_MS) {
            config.node_timeout = parse_millis(SETTING_NODE_TIMEOUT_MS, value)?;
        }

        Ok(config)
    }

    /// Set compression.
    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Set pretty printing.
    pub fn with_pretty_print(mut self, pretty: bool) -> Self {
        self.pretty_print = pretty;
        self
    }

    /// Set the shutdown drain timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the election timeout.
    pub fn with_election_timeout(mut self, timeout: Duration) -> Self {
        self.election_timeout = timeout;
        self
    }

    /// Set the per-node query timeout.
    pub fn with_node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout = timeout;
        self
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        other => Err(Error::Config(format!(
            "invalid boolean for {}: {:?}",
            key, other
        ))),
    }
}

fn parse_millis(key: &str, value: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| Error::Config(format!("invalid duration for {}: {}", key, e)))
}

/// Data directories owned by this node.
///
/// A node may have several data locations; each holds its own `_state`
/// folder independently.
#[derive(Debug, Clone, Default)]
pub struct NodeEnvironment {
    data_locations: Vec<PathBuf>,
}

impl NodeEnvironment {
    /// Create an environment over the given data locations.
    pub fn new<I, P>(locations: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            data_locations: locations.into_iter().map(Into::into).collect(),
        }
    }

    /// All node data locations.
    pub fn node_data_locations(&self) -> &[PathBuf] {
        &self.data_locations
    }

    /// Whether any data location is configured.
    pub fn has_data_locations(&self) -> bool {
        !self.data_locations.is_empty()
    }
}

//! State file naming and snapshot encoding.
//!
//! # File Layout
//!
//! ```text
//! <data location>/
//!   └── _state/
//!       ├── metadata-<version>      # MetadataSnapshot
//!       ├── shards-<version>        # StartedShardsSnapshot
//!       └── *.tmp                   # in-flight writes, removed on startup
//! ```
//!
//! # Content
//!
//! A file holds one JSON document (compact or pretty). When compression is
//! on, the JSON is wrapped in an LZ4 frame with a content checksum. Readers
//! don't need to know which: an LZ4 frame always starts with the frame
//! magic number, and JSON never does.

use crate::config::GatewayConfig;
use bytes::Bytes;
use lz4_flex::frame::{FrameDecoder, FrameEncoder, FrameInfo};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Read, Write};

/// LZ4 frame magic number (0x184D2204, little endian).
pub const LZ4_FRAME_MAGIC: [u8; 4] = [0x04, 0x22, 0x4D, 0x18];

/// Category of persisted state. Each kind has its own file prefix and its
/// own version sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKind {
    /// Last cluster metadata seen by a master-eligible node.
    Metadata,
    /// Shards that were active on a data node.
    StartedShards,
}

impl StateKind {
    /// File name prefix, including the separator.
    pub fn prefix(&self) -> &'static str {
        match self {
            StateKind::Metadata => "metadata-",
            StateKind::StartedShards => "shards-",
        }
    }

    /// Name of the file holding `version` of this kind.
    pub fn file_name(&self, version: u64) -> String {
        format!("{}{}", self.prefix(), version)
    }

    /// Parse the version out of a file name of this kind.
    ///
    /// Returns `None` for other kinds and for malformed suffixes, including
    /// in-flight `.tmp` files.
    pub fn parse_version(&self, file_name: &str) -> Option<u64> {
        file_name.strip_prefix(self.prefix())?.parse::<u64>().ok()
    }
}

impl std::fmt::Display for StateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateKind::Metadata => f.write_str("metadata"),
            StateKind::StartedShards => f.write_str("started shards"),
        }
    }
}

/// A state object that can be written to and recovered from `_state`.
pub trait PersistedState: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Which kind of state this is.
    const KIND: StateKind;

    /// Version used in the file name.
    fn version(&self) -> u64;
}

/// Encodes and decodes snapshots.
#[derive(Debug, Clone, Copy)]
pub struct StateCodec {
    compress: bool,
    pretty: bool,
}

impl Default for StateCodec {
    fn default() -> Self {
        Self::new(true, false)
    }
}

impl StateCodec {
    /// Create a codec.
    pub fn new(compress: bool, pretty: bool) -> Self {
        Self { compress, pretty }
    }

    /// Create a codec from gateway configuration.
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(config.compress, config.pretty_print)
    }

    /// Whether encoded output is compressed.
    pub fn compresses(&self) -> bool {
        self.compress
    }

    /// Encode a state object.
    pub fn encode<S: Serialize>(&self, state: &S) -> Result<Bytes, FormatError> {
        let json = if self.pretty {
            serde_json::to_vec_pretty(state)?
        } else {
            serde_json::to_vec(state)?
        };

        if !self.compress {
            return Ok(Bytes::from(json));
        }

        let info = FrameInfo::new().content_checksum(true);
        let mut encoder = FrameEncoder::with_frame_info(info, Vec::with_capacity(json.len() / 2));
        encoder
            .write_all(&json)
            .map_err(|e| FormatError::CompressionFailed(e.to_string()))?;
        let compressed = encoder
            .finish()
            .map_err(|e| FormatError::CompressionFailed(e.to_string()))?;

        Ok(Bytes::from(compressed))
    }

    /// Decode a state object, detecting compression from the header.
    pub fn decode<S: DeserializeOwned>(&self, data: &[u8]) -> Result<S, FormatError> {
        if data.is_empty() {
            return Err(FormatError::Empty);
        }

        if Self::is_compressed(data) {
            let mut decoder = FrameDecoder::new(data);
            let mut json = Vec::with_capacity(data.len() * 2);
            decoder
                .read_to_end(&mut json)
                .map_err(|e| FormatError::DecompressionFailed(e.to_string()))?;
            Ok(serde_json::from_slice(&json)?)
        } else {
            Ok(serde_json::from_slice(data)?)
        }
    }

    /// Whether the bytes start with an LZ4 frame header.
    pub fn is_compressed(data: &[u8]) -> bool {
        data.len() >= LZ4_FRAME_MAGIC.len() && data[..LZ4_FRAME_MAGIC.len()] == LZ4_FRAME_MAGIC
    }
}

/// Format-related errors
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("empty state file")]
    Empty,

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("compression failed: {0}")]
    CompressionFailed(String),

    #[error("decompression failed: {0}")]
    DecompressionFailed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

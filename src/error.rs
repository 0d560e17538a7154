//! Error types for the gateway.

use crate::checkpoint::FormatError;
use crate::types::NodeId;
use std::io;
use thiserror::Error;

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the gateway.
#[derive(Error, Debug)]
pub enum Error {
    /// Local state storage errors.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Snapshot encoding or decoding errors.
    #[error("format error: {0}")]
    Format(#[from] FormatError),

    /// Peer communication errors.
    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),

    /// The operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// The gateway has not been started or was already stopped.
    #[error("gateway not started")]
    NotStarted,

    /// Generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Local state storage errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The node environment has no data locations configured.
    #[error("no data locations configured")]
    NoDataLocations,

    /// Writing a state file failed in every data location.
    #[error("failed to write {name} to any of {attempted} data locations")]
    WriteFailed { name: String, attempted: usize },

    /// I/O error.
    #[error("storage io error: {0}")]
    Io(#[from] io::Error),
}

/// Peer communication errors.
#[derive(Error, Debug)]
pub enum NetworkError {
    /// The transport cannot reach any node.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// No client is registered for the node.
    #[error("node not connected: {0}")]
    NodeNotConnected(NodeId),

    /// The node did not answer in time.
    #[error("node {0} timed out")]
    NodeTimeout(NodeId),

    /// The node answered with an error.
    #[error("remote error from node {node_id}: {reason}")]
    Remote { node_id: NodeId, reason: String },

    /// The node answered with a message of the wrong type.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Connection failed.
    #[error("connection failed to {addr}: {reason}")]
    ConnectionFailed { addr: String, reason: String },

    /// Connection was closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// A frame exceeded the maximum message size.
    #[error("message too large: {0} bytes")]
    MessageTooLarge(usize),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Network(NetworkError::Serialization(e.to_string()))
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Storage(StorageError::Io(e))
    }
}

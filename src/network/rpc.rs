//! Wire messages exchanged between gateways.

use crate::checkpoint::MetadataSnapshot;
use crate::error::{NetworkError, Result};
use crate::types::{NodeId, ShardId};
use serde::{Deserialize, Serialize};

/// Upper bound on a single frame's payload.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Network message wrapper for all gateway communication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Ask a node for its latest local metadata.
    ListMetadata(ListMetadataRequest),

    /// Answer to [`Message::ListMetadata`].
    MetadataState(MetadataStateResponse),

    /// Ask a node which version of a shard it holds locally.
    ListStartedShards(ListStartedShardsRequest),

    /// Answer to [`Message::ListStartedShards`].
    StartedShardState(StartedShardStateResponse),

    /// The node failed to serve a request.
    Error(ErrorResponse),
}

impl Message {
    /// Correlation id of the request this message belongs to.
    pub fn request_id(&self) -> u64 {
        match self {
            Message::ListMetadata(m) => m.request_id,
            Message::MetadataState(m) => m.request_id,
            Message::ListStartedShards(m) => m.request_id,
            Message::StartedShardState(m) => m.request_id,
            Message::Error(m) => m.request_id,
        }
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::ListMetadata(_) => "list_metadata",
            Message::MetadataState(_) => "metadata_state",
            Message::ListStartedShards(_) => "list_started_shards",
            Message::StartedShardState(_) => "started_shard_state",
            Message::Error(_) => "error",
        }
    }
}

/// Request for a node's latest local metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListMetadataRequest {
    /// Unique request ID for correlation.
    pub request_id: u64,
}

/// A node's latest local metadata, if it has any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataStateResponse {
    /// The request ID this is responding to.
    pub request_id: u64,

    /// Responder's node ID.
    pub node_id: NodeId,

    /// `None` when the node never persisted metadata.
    pub snapshot: Option<MetadataSnapshot>,
}

/// Request for a node's local version of one shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListStartedShardsRequest {
    /// Unique request ID for correlation.
    pub request_id: u64,

    /// Shard to look up.
    pub shard_id: ShardId,
}

/// A node's local version of one shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartedShardStateResponse {
    /// The request ID this is responding to.
    pub request_id: u64,

    /// Responder's node ID.
    pub node_id: NodeId,

    /// Shard that was looked up.
    pub shard_id: ShardId,

    /// Routing version held locally; `None` if the node does not have it.
    pub version: Option<u64>,
}

/// Failure to serve a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// The request ID this is responding to.
    pub request_id: u64,

    /// Responder's node ID.
    pub node_id: NodeId,

    /// Error message.
    pub reason: String,
}

/// Encode a message to bytes.
pub fn encode_message(msg: &Message) -> Result<Vec<u8>> {
    bincode::serialize(msg).map_err(|e| NetworkError::Serialization(e.to_string()).into())
}

/// Decode a message from bytes.
pub fn decode_message(data: &[u8]) -> Result<Message> {
    bincode::deserialize(data).map_err(|e| NetworkError::Deserialization(e.to_string()).into())
}

/// Frame a message with length prefix for TCP transmission.
pub fn frame_message(msg: &Message) -> Result<Vec<u8>> {
    let data = encode_message(msg)?;
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(NetworkError::MessageTooLarge(data.len()).into());
    }
    let len = data.len() as u32;

    let mut framed = Vec::with_capacity(4 + data.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(&data);

    Ok(framed)
}

/// Decode a complete length-prefixed frame.
pub fn unframe_message(frame: &[u8]) -> Result<Message> {
    let Some((len_buf, payload)) = frame.split_first_chunk::<4>() else {
        return Err(NetworkError::Deserialization("frame shorter than length prefix".into()).into());
    };

    let len = u32::from_be_bytes(*len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(NetworkError::MessageTooLarge(len).into());
    }
    if len != payload.len() {
        return Err(NetworkError::Deserialization(format!(
            "frame length {} does not match payload of {} bytes",
            len,
            payload.len()
        ))
        .into());
    }

    decode_message(payload)
}

//! Network communication layer.

pub mod nodes;
pub mod rpc;
pub mod server;

pub use nodes::{
    FanOutLister, GatewayRequestHandler, LoopbackClient, MessageHandler, NodeFailure,
    NodeMetadataReport, NodeShardReport, NodeStateClient, NodesMetadataResponse,
    NodesStartedShardsResponse, NodesStateLister,
};
pub use rpc::{
    ErrorResponse, ListMetadataRequest, ListStartedShardsRequest, Message, MetadataStateResponse,
    StartedShardStateResponse,
};
pub use server::{GatewayServer, TcpNodeClient};

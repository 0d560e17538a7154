//! Example demonstrating local state persistence and recovery election.
//!
//! This example shows how to:
//! - Run three local gateways, each with its own data location
//! - Serve each gateway's state over TCP
//! - Persist metadata and started shards from cluster state changes
//! - Restart the nodes and elect the state to recover from
//!
//! Run with:
//!   RUST_LOG=info cargo run --example recovery

use crema_gateway::cluster::{
    ClusterChangedEvent, ClusterState, ClusterStateListener, DiscoveryNodes, IndexMetaData,
    IndexRoutingTable, MetaData, RoutingTable, ShardRouting, ShardRoutingState,
};
use crema_gateway::network::{FanOutLister, GatewayRequestHandler, GatewayServer, TcpNodeClient};
use crema_gateway::types::{DiscoveryNode, NodeId, NodeRoles, ShardId};
use crema_gateway::{GatewayConfig, LocalGateway, NodeEnvironment};
use std::env;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const NODES: [(NodeId, NodeRoles); 3] = [
    (
        1,
        NodeRoles {
            master_eligible: true,
            data: true,
        },
    ),
    (
        2,
        NodeRoles {
            master_eligible: true,
            data: true,
        },
    ),
    (
        3,
        NodeRoles {
            master_eligible: false,
            data: true,
        },
    ),
];

struct DemoNode {
    node_id: NodeId,
    gateway: Arc<LocalGateway>,
    shutdown_tx: mpsc::Sender<()>,
}

async fn start_nodes(
    root: &Path,
    config: &GatewayConfig,
) -> Result<Vec<DemoNode>, Box<dyn std::error::Error>> {
    let lister = Arc::new(FanOutLister::new(config.node_timeout));
    let mut nodes = Vec::new();

    for (node_id, roles) in NODES {
        let gateway = Arc::new(LocalGateway::new(
            NodeEnvironment::new([root.join(format!("node-{}", node_id))]),
            config.clone(),
            roles,
            lister.clone(),
        ));
        gateway.start()?;

        let handler = Arc::new(GatewayRequestHandler::new(node_id, gateway.store().clone()));
        let (server, shutdown_tx) = GatewayServer::bind("127.0.0.1:0".parse()?, handler).await?;
        let addr = server.local_addr()?;
        tokio::spawn(server.run());

        lister.register(Arc::new(TcpNodeClient::new(node_id, addr)));
        println!("  node-{} listening on {} ({:?})", node_id, addr, roles);

        nodes.push(DemoNode {
            node_id,
            gateway,
            shutdown_tx,
        });
    }

    Ok(nodes)
}

async fn stop_nodes(nodes: Vec<DemoNode>) {
    for node in nodes {
        node.gateway.close().await;
        let _ = node.shutdown_tx.send(()).await;
    }
}

fn discovery_nodes() -> DiscoveryNodes {
    NODES
        .iter()
        .fold(DiscoveryNodes::default().with_master(1), |nodes, &(id, roles)| {
            nodes.with_node(DiscoveryNode::new(id, format!("node-{}", id), roles))
        })
}

fn cluster_state(version: u64, indices: &[&str]) -> ClusterState {
    let mut meta = MetaData::default().with_version(version);
    let mut routing = RoutingTable::default().with_version(version);

    for index in indices {
        meta = meta.with_index(IndexMetaData::new(*index, 1, 1));
        let table = IndexRoutingTable::new(*index)
            .with_shard(ShardRouting::new(
                ShardId::new(*index, 0),
                Some(1),
                true,
                ShardRoutingState::Started,
                version,
            ))
            .with_shard(ShardRouting::new(
                ShardId::new(*index, 0),
                Some(3),
                false,
                ShardRoutingState::Started,
                version,
            ));
        routing = routing.with_index(table);
    }

    ClusterState::builder()
        .version(version)
        .meta_data(meta)
        .routing_table(routing)
        .nodes(discovery_nodes())
        .build()
}

fn publish(nodes: &[DemoNode], previous: &ClusterState, state: &ClusterState) {
    for node in nodes {
        let mut local = state.clone();
        local.nodes.local_node_id = Some(node.node_id);
        let mut local_previous = previous.clone();
        local_previous.nodes.local_node_id = Some(node.node_id);

        let event = ClusterChangedEvent::new("demo", Arc::new(local), Arc::new(local_previous));
        node.gateway.cluster_changed(&event);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();

    println!("===========================================");
    println!("     Local Gateway Recovery Example");
    println!("===========================================");
    println!();

    let data_dir = Path::new("./demo_gateway_data");
    if data_dir.exists() {
        fs::remove_dir_all(data_dir)?;
    }

    let config = GatewayConfig::default()
        .with_compression(true)
        .with_shutdown_timeout(Duration::from_secs(5))
        .with_election_timeout(Duration::from_secs(5))
        .with_node_timeout(Duration::from_secs(1));

    println!("Gateway Configuration:");
    println!("  Compress:          {}", config.compress);
    println!("  Pretty print:      {}", config.pretty_print);
    println!("  Shutdown timeout:  {:?}", config.shutdown_timeout);
    println!("  Election timeout:  {:?}", config.election_timeout);
    println!();

    // Part 1: persist state from cluster changes
    println!("===========================================");
    println!("      Part 1: Persisting State");
    println!("===========================================");
    println!();

    let nodes = start_nodes(data_dir, &config).await?;

    let mut previous = ClusterState::default();
    for (version, indices) in [(1, vec!["logs"]), (2, vec!["logs", "metrics"])] {
        let state = cluster_state(version, &indices);
        publish(&nodes, &previous, &state);
        previous = state;
    }
    for node in &nodes {
        node.gateway.sync().await?;
        println!(
            "  node-{}: metadata={:?} started_shards={:?}",
            node.node_id,
            node.gateway.current_metadata().map(|s| s.version),
            node.gateway.current_started_shards().map(|s| s.len()),
        );
    }
    stop_nodes(nodes).await;
    println!();

    // Part 2: restart and elect
    println!("===========================================");
    println!("      Part 2: Recovery Election");
    println!("===========================================");
    println!();

    let nodes = start_nodes(data_dir, &config).await?;
    let recovered = nodes[0]
        .gateway
        .perform_state_recovery(&discovery_nodes())
        .await?;

    println!("  Recovered version: {}", recovered.version);
    println!(
        "  Recovered indices: {:?}",
        recovered.meta_data.indices.keys().collect::<Vec<_>>()
    );
    stop_nodes(nodes).await;

    fs::remove_dir_all(data_dir)?;
    println!();
    println!("Done.");
    Ok(())
}

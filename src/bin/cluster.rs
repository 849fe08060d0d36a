//! Local cluster simulation binary
//!
//! Runs several nodes against a shared in-memory coordination store to
//! exercise election and membership failover in one process.

use std::sync::Arc;

use flock_core::node::{ClusterNode, NodeConfig};
use flock_core::store::MemoryStore;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let node_count: usize = std::env::var("FLOCK_NODES")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3);
    let base_port: u16 = std::env::var("FLOCK_BASE_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(flock_core::DEFAULT_HTTP_PORT);
    let host = std::env::var("FLOCK_HOST").unwrap_or_else(|_| "127.0.0.1".into());

    info!("starting local cluster of {} nodes", node_count);
    let store = MemoryStore::new();

    let mut nodes = Vec::with_capacity(node_count);
    for i in 0..node_count {
        let config = NodeConfig {
            host: host.clone(),
            port: base_port + i as u16,
            ..Default::default()
        };
        let node = Arc::new(ClusterNode::new(config, store.session()));
        node.start().await?;
        info!("node {} started on port {}", node.node_id(), base_port + i as u16);
        nodes.push(node);
    }

    info!("cluster running, ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    for node in &nodes {
        node.stop();
    }
    Ok(())
}

//! Permissioned ledger node daemon
//!
//! Every node is a symmetric cluster member: it gossips with its peers,
//! takes part in leader election and applies committed blocks. State is
//! optionally persisted to disk and survives restarts.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod node;

use config::{NodeConfig, PeerConfig};
use node::Node;

/// Parse a `name=host:port` peer argument.
fn parse_peer(value: &str) -> Result<PeerConfig, String> {
    match value.split_once('=') {
        Some((name, addr)) if !name.is_empty() && !addr.is_empty() => Ok(PeerConfig {
            name: name.to_string(),
            addr: addr.to_string(),
        }),
        _ => Err(format!("invalid peer '{value}', expected name=host:port")),
    }
}

/// Permissioned ledger cluster node
#[derive(Parser, Debug)]
#[command(name = "ledgerd")]
#[command(about = "Permissioned blockchain node with raft-style block consensus", long_about = None)]
struct Args {
    /// JSON configuration file; CLI flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Cluster-unique node name
    #[arg(long)]
    node_name: Option<String>,

    /// Fixed cluster size, including this node
    #[arg(long)]
    cluster_size: Option<usize>,

    /// Gossip bind address
    #[arg(long)]
    listen_addr: Option<String>,

    /// Cluster peer as name=host:port (repeatable)
    #[arg(long = "peer", value_parser = parse_peer)]
    peers: Vec<PeerConfig>,

    /// Data directory for persistent state (in-memory when omitted)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::load(path)?,
            None => NodeConfig::default(),
        };
        if let Some(node_name) = self.node_name {
            config.node_name = node_name;
        }
        if let Some(cluster_size) = self.cluster_size {
            config.cluster_size = cluster_size;
        }
        if let Some(listen_addr) = self.listen_addr {
            config.listen_addr = listen_addr;
        }
        if !self.peers.is_empty() {
            config.peers = self.peers;
        }
        if let Some(data_dir) = self.data_dir {
            config.data_dir = Some(data_dir);
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = args.into_config()?;

    tracing::info!("Starting ledger node");
    tracing::info!("  Node name: {}", config.node_name);
    tracing::info!("  Cluster size: {}", config.cluster_size);
    tracing::info!("  Gossip listen: {}", config.listen_addr);
    tracing::info!("  Peers: {}", config.peers.len());
    match &config.data_dir {
        Some(dir) => tracing::info!("  Data directory: {:?}", dir),
        None => tracing::info!("  Data directory: in-memory"),
    }

    let node = Node::new(config)?;
    node.initialize().await?;

    tracing::info!("Node running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down...");
    node.shutdown().await;

    Ok(())
}

//! Node configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A cluster peer this node gossips with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Cluster-unique node name
    pub name: String,
    /// Gossip listen address, `host:port`
    pub addr: String,
}

/// Node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// This node's cluster-unique name
    pub node_name: String,
    /// Fixed cluster size, including this node
    pub cluster_size: usize,
    /// Gossip bind address
    pub listen_addr: String,
    /// The other cluster members
    pub peers: Vec<PeerConfig>,
    /// Election timeout lower bound (ms)
    pub election_timeout_min_ms: u64,
    /// Election timeout upper bound (ms)
    pub election_timeout_max_ms: u64,
    /// Leader heartbeat interval (ms)
    pub heartbeat_interval_ms: u64,
    /// Pending pool poll interval while leading (ms)
    pub block_builder_poll_interval_ms: u64,
    /// Transaction freshness window (ms)
    pub transaction_expiration_ms: u64,
    /// How often the expired-transaction sweep runs (ms)
    pub expiry_sweep_interval_ms: u64,
    /// Data directory for persistent state; in-memory when unset
    pub data_dir: Option<PathBuf>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_name: "node1".to_string(),
            cluster_size: 1,
            listen_addr: "127.0.0.1:9000".to_string(),
            peers: Vec::new(),
            election_timeout_min_ms: 2000,
            election_timeout_max_ms: 4000,
            heartbeat_interval_ms: 100,
            block_builder_poll_interval_ms: 500,
            transaction_expiration_ms: 10 * 60 * 1000,
            expiry_sweep_interval_ms: 30 * 1000,
            data_dir: None,
        }
    }
}

impl NodeConfig {
    /// Load configuration from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_file_fills_defaults() {
        let parsed: NodeConfig =
            serde_json::from_str(r#"{"node_name": "n2", "cluster_size": 3}"#).unwrap();
        assert_eq!(parsed.node_name, "n2");
        assert_eq!(parsed.cluster_size, 3);
        assert_eq!(parsed.heartbeat_interval_ms, 100);
        assert_eq!(parsed.transaction_expiration_ms, 600_000);
    }
}

use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::raft::RaftConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Node configuration, loadable from JSON. Missing fields take defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub node_id: String,
    /// gRPC bind address.
    pub listen_addr: String,
    /// HTTP admin bind address.
    pub http_addr: String,
    pub peers: Vec<PeerConfig>,
    pub election_timeout_min_ms: u64,
    pub election_timeout_max_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub rpc_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub id: String,
    pub address: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            listen_addr: "127.0.0.1:9000".to_string(),
            http_addr: "127.0.0.1:8000".to_string(),
            peers: vec![],
            election_timeout_min_ms: 150,
            election_timeout_max_ms: 300,
            heartbeat_interval_ms: 50,
            rpc_timeout_ms: 100,
        }
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Parses `B=127.0.0.1:9001,C=127.0.0.1:9002`.
    pub fn parse_peers(list: &str) -> Result<Vec<PeerConfig>, ConfigError> {
        list.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| match entry.split_once('=') {
                Some((id, address)) if !id.trim().is_empty() && !address.trim().is_empty() => {
                    Ok(PeerConfig {
                        id: id.trim().to_string(),
                        address: address.trim().to_string(),
                    })
                }
                _ => Err(ConfigError::Invalid(format!(
                    "peer entry '{entry}' is not of the form id=address"
                ))),
            })
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_id.trim().is_empty() {
            return Err(ConfigError::Invalid("node_id must not be empty".to_string()));
        }
        if self.election_timeout_min_ms == 0 {
            return Err(ConfigError::Invalid(
                "election_timeout_min_ms must be positive".to_string(),
            ));
        }
        if self.election_timeout_min_ms > self.election_timeout_max_ms {
            return Err(ConfigError::Invalid(format!(
                "election timeout range {}..{} is inverted",
                self.election_timeout_min_ms, self.election_timeout_max_ms
            )));
        }
        if self.heartbeat_interval_ms == 0
            || self.heartbeat_interval_ms >= self.election_timeout_min_ms
        {
            return Err(ConfigError::Invalid(format!(
                "heartbeat_interval_ms ({}) must be positive and below election_timeout_min_ms ({})",
                self.heartbeat_interval_ms, self.election_timeout_min_ms
            )));
        }
        if self.rpc_timeout_ms == 0 {
            return Err(ConfigError::Invalid("rpc_timeout_ms must be positive".to_string()));
        }

        let mut seen = HashSet::new();
        for peer in &self.peers {
            if peer.id == self.node_id {
                return Err(ConfigError::Invalid(format!(
                    "peer list contains the node itself ({})",
                    peer.id
                )));
            }
            if !seen.insert(peer.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate peer id {}", peer.id)));
            }
        }

        self.listen_socket()?;
        self.http_socket()?;
        Ok(())
    }

    pub fn listen_socket(&self) -> Result<SocketAddr, ConfigError> {
        parse_socket("listen_addr", &self.listen_addr)
    }

    pub fn http_socket(&self) -> Result<SocketAddr, ConfigError> {
        parse_socket("http_addr", &self.http_addr)
    }

    pub fn raft_config(&self) -> RaftConfig {
        let mut cfg = RaftConfig::new(&self.node_id);
        cfg.election_timeout_min = self.election_timeout_min_ms;
        cfg.election_timeout_max = self.election_timeout_max_ms;
        cfg.heartbeat_interval = self.heartbeat_interval_ms;
        cfg.rpc_timeout = self.rpc_timeout_ms;
        for peer in &self.peers {
            cfg.add_peer(&peer.id, &peer.address);
        }
        cfg
    }
}

fn parse_socket(field: &str, value: &str) -> Result<SocketAddr, ConfigError> {
    value
        .parse()
        .map_err(|e| ConfigError::Invalid(format!("{field} '{value}': {e}")))
}

use std::time::Duration;

use super::Peer;

#[derive(Debug, Clone)]
pub struct RaftConfig {
    pub node_id: String,
    pub peers: Vec<Peer>,
    pub election_timeout_min: u64, // in milliseconds
    pub election_timeout_max: u64, // in milliseconds
    pub heartbeat_interval: u64,   // in milliseconds
    pub rpc_timeout: u64,          // in milliseconds
}

impl RaftConfig {
    pub fn new(node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            peers: Vec::new(),
            election_timeout_min: 150,
            election_timeout_max: 300,
            heartbeat_interval: 50,
            rpc_timeout: 100,
        }
    }

    pub fn add_peer(&mut self, peer_id: &str, address: &str) {
        if peer_id == self.node_id || self.peers.iter().any(|p| p.id == peer_id) {
            return;
        }
        self.peers.push(Peer::new(peer_id, address));
    }

    pub fn with_peer(mut self, peer_id: &str, address: &str) -> Self {
        self.add_peer(peer_id, address);
        self
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout)
    }

    /// Heartbeat sends never outlive their tick.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout.min(self.heartbeat_interval).max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_randomized_range_and_short_heartbeat() {
        let cfg = RaftConfig::new("A");
        assert_eq!(cfg.election_timeout_min, 150);
        assert_eq!(cfg.election_timeout_max, 300);
        assert_eq!(cfg.heartbeat_interval, 50);
        assert_eq!(cfg.rpc_timeout, 100);
        assert!(cfg.peers.is_empty());
    }

    #[test]
    fn add_peer_skips_self_and_duplicates() {
        let cfg = RaftConfig::new("A")
            .with_peer("A", "127.0.0.1:9000")
            .with_peer("B", "127.0.0.1:9001")
            .with_peer("B", "127.0.0.1:9002")
            .with_peer("C", "127.0.0.1:9003");

        let ids: Vec<&str> = cfg.peers.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["B", "C"]);
    }

    #[test]
    fn heartbeat_timeout_is_capped_by_interval() {
        let mut cfg = RaftConfig::new("A");
        assert_eq!(cfg.heartbeat_timeout(), Duration::from_millis(50));

        cfg.rpc_timeout = 20;
        assert_eq!(cfg.heartbeat_timeout(), Duration::from_millis(20));
    }
}

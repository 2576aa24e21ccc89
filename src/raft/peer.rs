use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A remote cluster member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Peer {
    pub id: String,
    pub address: String,
}

impl Peer {
    pub fn new(id: &str, address: &str) -> Self {
        Self {
            id: id.to_string(),
            address: address.to_string(),
        }
    }
}

/// Static, read-only view of the cluster as seen from one node.
///
/// The registry never contains the local node itself; `cluster_size` adds it
/// back when computing the quorum.
#[derive(Debug, Clone)]
pub struct PeerRegistry {
    self_id: String,
    peers: Arc<[Peer]>,
}

impl PeerRegistry {
    /// Builds the registry, dropping the local node and repeated ids (first
    /// occurrence wins).
    pub fn new(self_id: &str, peers: impl IntoIterator<Item = Peer>) -> Self {
        let mut seen = HashSet::new();
        let peers: Vec<Peer> = peers
            .into_iter()
            .filter(|p| p.id != self_id && seen.insert(p.id.clone()))
            .collect();

        Self {
            self_id: self_id.to_string(),
            peers: peers.into(),
        }
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.peers.iter()
    }

    pub fn get(&self, id: &str) -> Option<&Peer> {
        self.peers.iter().find(|p| p.id == id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Peers plus self.
    pub fn cluster_size(&self) -> usize {
        self.peers.len() + 1
    }

    /// `floor(N/2) + 1` of the static cluster size.
    pub fn quorum(&self) -> usize {
        self.cluster_size() / 2 + 1
    }
}

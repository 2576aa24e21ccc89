use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use log::{debug, info};

use crate::raft::{
    AppendEntries, AppendEntriesResponse, Peer, PeerTransport, RaftNode, RequestVote,
    RequestVoteResponse,
};

use super::NetworkError;

#[derive(Default)]
struct Inner {
    nodes: HashMap<String, Weak<RaftNode>>,
    isolated: HashSet<String>,
    heartbeats: HashMap<String, u64>,
}

/// In-process network connecting nodes by id. Used to run whole clusters
/// inside one runtime, with partitions simulated by isolating node ids.
#[derive(Clone, Default)]
pub struct LocalNetwork {
    inner: Arc<RwLock<Inner>>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, node: &Arc<RaftNode>) {
        self.write()
            .nodes
            .insert(node.id().to_string(), Arc::downgrade(node));
    }

    pub fn transport_for(&self, id: &str) -> Arc<InMemoryTransport> {
        Arc::new(InMemoryTransport {
            from: id.to_string(),
            network: self.clone(),
        })
    }

    /// Cuts `id` off: nothing it sends is delivered and nothing reaches it.
    pub fn isolate(&self, id: &str) {
        info!("Isolating {id}");
        self.write().isolated.insert(id.to_string());
    }

    pub fn heal(&self, id: &str) {
        info!("Reconnecting {id}");
        self.write().isolated.remove(id);
    }

    /// Heartbeats `id` has attempted to send, delivered or not.
    pub fn heartbeats_from(&self, id: &str) -> u64 {
        self.read().heartbeats.get(id).copied().unwrap_or(0)
    }

    fn route(&self, from: &str, to: &Peer) -> Result<Arc<RaftNode>, NetworkError> {
        let inner = self.read();
        if inner.isolated.contains(from) || inner.isolated.contains(&to.id) {
            return Err(NetworkError::ConnectionError(format!(
                "{from} -> {} partitioned",
                to.id
            )));
        }
        inner
            .nodes
            .get(&to.id)
            .and_then(Weak::upgrade)
            .ok_or_else(|| NetworkError::ConnectionError(format!("unknown node {}", to.id)))
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct InMemoryTransport {
    from: String,
    network: LocalNetwork,
}

#[tonic::async_trait]
impl PeerTransport for InMemoryTransport {
    async fn request_vote(
        &self,
        peer: &Peer,
        request: RequestVote,
    ) -> Result<RequestVoteResponse, NetworkError> {
        tokio::task::yield_now().await;
        let target = self.network.route(&self.from, peer)?;
        debug!("{} -> {}: {:?}", self.from, peer.id, request);
        Ok(target.handle_request_vote(request).await)
    }

    async fn append_entries(
        &self,
        peer: &Peer,
        request: AppendEntries,
    ) -> Result<AppendEntriesResponse, NetworkError> {
        *self
            .network
            .write()
            .heartbeats
            .entry(self.from.clone())
            .or_insert(0) += 1;

        tokio::task::yield_now().await;
        let target = self.network.route(&self.from, peer)?;
        Ok(target.handle_append_entries(request).await)
    }
}

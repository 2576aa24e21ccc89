mod config;
mod error;
mod log;
mod message;
mod node;
mod peer;
mod state;
pub mod timer;
mod transport;

pub use self::config::RaftConfig;
pub use self::error::RaftError;
pub use self::log::{Log, LogEntry};
pub use self::message::{AppendEntries, AppendEntriesResponse, RequestVote, RequestVoteResponse};
pub use self::node::{CommandReceipt, CrashReport, NodeStatus, RaftNode};
pub use self::peer::{Peer, PeerRegistry};
pub use self::state::{LeadershipEpoch, NodeRole, NodeState, VoteTally};
pub use self::transport::PeerTransport;

use std::sync::Arc;

use tokio::task::JoinHandle;
// Use external log crate, not our own log module
use ::log::info;

/// Handle to a running election node.
pub struct Raft {
    pub node: Arc<RaftNode>,
}

impl Raft {
    pub fn new(config: RaftConfig, transport: Arc<dyn PeerTransport>) -> Self {
        Self {
            node: RaftNode::new(config, transport),
        }
    }

    pub fn node(&self) -> &Arc<RaftNode> {
        &self.node
    }

    /// Spawns the election timer. Heartbeat broadcasters are spawned by the
    /// node itself whenever it wins an election.
    pub fn start(&self) -> JoinHandle<()> {
        info!(
            "Starting node {} with {} peer(s), quorum {}",
            self.node.id(),
            self.node.peers().len(),
            self.node.peers().quorum()
        );
        tokio::spawn(Arc::clone(&self.node).run_election_timer())
    }

    pub fn shutdown(&self) {
        self.node.shutdown();
    }

    pub async fn submit_command(&self, command: Vec<u8>) -> Result<CommandReceipt, RaftError> {
        self.node.submit_command(command).await
    }
}

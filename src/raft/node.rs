use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep, timeout, Instant};
// Use external log crate, not our own log module
use ::log::{debug, error, info, trace, warn};

use crate::network::{NetworkError, RaftMetrics};

use super::timer::{heartbeat_ticker, ElectionTimer};
use super::{
    AppendEntries, AppendEntriesResponse, LeadershipEpoch, NodeRole, NodeState, Peer,
    PeerRegistry, PeerTransport, RaftConfig, RaftError, RequestVote, RequestVoteResponse,
    VoteTally,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub id: String,
    #[serde(rename = "state")]
    pub role: NodeRole,
    pub term: u64,
    pub voted_for: Option<String>,
    pub is_leader: bool,
    pub log_length: usize,
    pub leader_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandReceipt {
    pub leader_id: String,
    pub term: u64,
    pub log_index: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashReport {
    pub status: String,
    #[serde(rename = "node")]
    pub id: String,
}

pub struct RaftNode {
    id: String,
    config: RaftConfig,
    peers: PeerRegistry,
    timer: ElectionTimer,
    state: Mutex<NodeState>,
    transport: Arc<dyn PeerTransport>,
    // Only locked while `state` is held.
    broadcaster: Mutex<Option<JoinHandle<()>>>,
    metrics: RaftMetrics,
    shutdown_tx: watch::Sender<bool>,
}

impl RaftNode {
    pub fn new(config: RaftConfig, transport: Arc<dyn PeerTransport>) -> Arc<Self> {
        let id = config.node_id.clone();
        let peers = PeerRegistry::new(&id, config.peers.iter().cloned());
        let timer = ElectionTimer::new(config.election_timeout_min, config.election_timeout_max);
        let state = NodeState::new(&id, peers.quorum());
        let (shutdown_tx, _) = watch::channel(false);

        Arc::new(Self {
            id,
            config,
            peers,
            timer,
            state: Mutex::new(state),
            transport,
            broadcaster: Mutex::new(None),
            metrics: RaftMetrics::default(),
            shutdown_tx,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &RaftConfig {
        &self.config
    }

    pub fn peers(&self) -> &PeerRegistry {
        &self.peers
    }

    pub fn metrics(&self) -> &RaftMetrics {
        &self.metrics
    }

    pub async fn is_leader(&self) -> bool {
        self.state.lock().await.is_leader()
    }

    pub async fn current_term(&self) -> u64 {
        self.state.lock().await.current_term()
    }

    pub async fn role(&self) -> NodeRole {
        self.state.lock().await.role()
    }

    pub async fn status(&self) -> NodeStatus {
        let state = self.state.lock().await;
        NodeStatus {
            id: self.id.clone(),
            role: state.role(),
            term: state.current_term(),
            voted_for: state.voted_for().map(str::to_string),
            is_leader: state.is_leader(),
            log_length: state.log().len(),
            leader_id: state.leader_id().map(str::to_string),
        }
    }

    pub async fn handle_request_vote(&self, request: RequestVote) -> RequestVoteResponse {
        let mut state = self.state.lock().await;
        let before = state.role();

        let vote_granted = state.try_grant_vote(&request.candidate_id, request.term);
        if vote_granted {
            self.metrics.record_vote_granted();
        }
        self.note_role_change(before, state.role()).await;

        debug!(
            "Node {} {} vote for {} (request term {}, current term {})",
            self.id,
            if vote_granted { "granted" } else { "refused" },
            request.candidate_id,
            request.term,
            state.current_term()
        );

        RequestVoteResponse {
            term: state.current_term(),
            vote_granted,
        }
    }

    pub async fn handle_append_entries(&self, request: AppendEntries) -> AppendEntriesResponse {
        let mut state = self.state.lock().await;
        let before = state.role();

        let success = match state.accept_heartbeat(request.term, &request.leader_id) {
            Ok(()) => true,
            Err(e) => {
                debug!(
                    "Node {} rejecting heartbeat from {}: {e}",
                    self.id, request.leader_id
                );
                false
            }
        };
        self.note_role_change(before, state.role()).await;

        AppendEntriesResponse {
            term: state.current_term(),
            success,
        }
    }

    pub async fn submit_command(&self, command: Vec<u8>) -> Result<CommandReceipt, RaftError> {
        let mut state = self.state.lock().await;
        let log_index = state.append_command(command)?;
        let term = state.current_term();

        info!(
            "Leader {} accepted command at index {log_index} (term {term})",
            self.id
        );

        Ok(CommandReceipt {
            leader_id: self.id.clone(),
            term,
            log_index,
        })
    }

    /// Fault injection: demotes the node and kills its heartbeat broadcaster.
    /// The node keeps answering RPCs.
    pub async fn simulate_crash(&self) -> CrashReport {
        let mut state = self.state.lock().await;
        let before = state.role();
        state.step_down();
        self.stop_broadcaster().await;
        if before != NodeRole::Follower {
            self.metrics.record_step_down();
        }

        warn!(
            "Node {} crash simulated ({} in term {})",
            self.id,
            before,
            state.current_term()
        );

        CrashReport {
            status: "killed".to_string(),
            id: self.id.clone(),
        }
    }

    /// Runs one election to completion: candidacy, vote fan-out, tally.
    pub async fn start_election(self: &Arc<Self>) {
        if let Some(term) = self.begin_candidacy().await {
            self.solicit_votes(term).await;
        }
    }

    /// Watches the election clock until shutdown. Each clock reset draws a
    /// fresh randomized timeout.
    pub async fn run_election_timer(self: Arc<Self>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut election_timeout = self.timer.next_timeout();
        let mut armed_at: Option<Instant> = None;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let wait = {
                let state = self.state.lock().await;
                if state.is_leader() {
                    armed_at = None;
                    Some(self.config.heartbeat_interval())
                } else {
                    let last_reset = state.last_heartbeat();
                    if armed_at != Some(last_reset) {
                        armed_at = Some(last_reset);
                        election_timeout = self.timer.next_timeout();
                    }
                    let deadline = last_reset + election_timeout;
                    let now = Instant::now();
                    (deadline > now).then(|| deadline - now)
                }
            };

            match wait {
                Some(wait) => {
                    tokio::select! {
                        _ = sleep(wait) => {}
                        _ = shutdown.changed() => break,
                    }
                }
                None => {
                    if let Some(term) = self.begin_candidacy().await {
                        let node = Arc::clone(&self);
                        tokio::spawn(async move { node.solicit_votes(term).await });
                    }
                }
            }
        }

        debug!("Node {} election timer stopped", self.id);
    }

    /// Stops the timer loop and any heartbeat broadcaster.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    async fn begin_candidacy(self: &Arc<Self>) -> Option<u64> {
        let mut state = self.state.lock().await;
        if state.is_leader() {
            return None;
        }

        let term = state.become_candidate();
        self.metrics.record_election();
        info!(
            "Node {} election timeout, candidate for term {term} (needs {} of {} votes)",
            self.id,
            self.peers.quorum(),
            self.peers.cluster_size()
        );

        if state.has_quorum() {
            self.promote(&mut state).await;
            return None;
        }
        Some(term)
    }

    async fn solicit_votes(self: &Arc<Self>, term: u64) {
        let request = RequestVote {
            term,
            candidate_id: self.id.clone(),
        };
        let limit = self.config.rpc_timeout();

        let mut ballots = JoinSet::new();
        for peer in self.peers.iter() {
            let transport = Arc::clone(&self.transport);
            let peer = peer.clone();
            let request = request.clone();
            ballots.spawn(async move {
                let result = bounded(&peer, limit, transport.request_vote(&peer, request)).await;
                (peer.id, result)
            });
        }

        // Responses are folded one at a time; dropping `ballots` on return
        // cancels whatever is still in flight.
        while let Some(joined) = ballots.join_next().await {
            let (peer_id, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Vote request task failed: {e}");
                    continue;
                }
            };
            let response = match result {
                Ok(response) => response,
                Err(e) => {
                    debug!("Node {} term {term}: {e}", self.id);
                    continue;
                }
            };

            let mut state = self.state.lock().await;
            let before = state.role();
            if let Err(e) = state.check_response_term(response.term) {
                warn!(
                    "Node {} abandoning candidacy for term {term} after reply from {peer_id}: {e}",
                    self.id
                );
                self.note_role_change(before, state.role()).await;
                return;
            }

            if !response.vote_granted {
                debug!("Node {} vote for term {term} refused by {peer_id}", self.id);
                continue;
            }

            match state.record_vote(term, &peer_id) {
                VoteTally::Won => {
                    info!(
                        "Node {} won election for term {term} ({} votes)",
                        self.id,
                        state.votes_granted()
                    );
                    self.promote(&mut state).await;
                    return;
                }
                VoteTally::Pending { votes, needed } => {
                    debug!(
                        "Node {} vote from {peer_id} for term {term} ({votes}/{needed})",
                        self.id
                    );
                }
                VoteTally::Ignored => {
                    debug!(
                        "Node {} no longer candidate for term {term}, ignoring remaining votes",
                        self.id
                    );
                    return;
                }
            }
        }

        debug!(
            "Node {} election for term {term} ended without quorum",
            self.id
        );
    }

    async fn promote(self: &Arc<Self>, state: &mut NodeState) {
        let Some(epoch) = state.become_leader() else {
            return;
        };

        info!(
            "Node {} became leader for term {} (epoch {})",
            self.id,
            state.current_term(),
            epoch.value()
        );

        let mut slot = self.broadcaster.lock().await;
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        let node = Arc::clone(self);
        *slot = Some(tokio::spawn(node.broadcast_heartbeats(epoch)));
    }

    async fn broadcast_heartbeats(self: Arc<Self>, epoch: LeadershipEpoch) {
        let mut ticker = heartbeat_ticker(self.config.heartbeat_interval());
        let mut shutdown = self.shutdown_tx.subscribe();
        let limit = self.config.heartbeat_timeout();

        loop {
            if *shutdown.borrow() {
                return;
            }
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => return,
            }

            let term = {
                let state = self.state.lock().await;
                if !state.is_current_epoch(epoch) {
                    debug!(
                        "Node {} heartbeat broadcaster for epoch {} exiting",
                        self.id,
                        epoch.value()
                    );
                    return;
                }
                state.current_term()
            };

            let request = AppendEntries {
                term,
                leader_id: self.id.clone(),
            };
            let mut sends = JoinSet::new();
            for peer in self.peers.iter() {
                let transport = Arc::clone(&self.transport);
                let peer = peer.clone();
                let request = request.clone();
                sends.spawn(async move {
                    let result =
                        bounded(&peer, limit, transport.append_entries(&peer, request)).await;
                    (peer.id, result)
                });
                self.metrics.record_heartbeat();
            }
            trace!("Leader {} sent heartbeats for term {term}", self.id);

            while let Some(joined) = sends.join_next().await {
                let Ok((peer_id, result)) = joined else {
                    continue;
                };
                match result {
                    Ok(response) => {
                        let mut state = self.state.lock().await;
                        if let Err(e) = state.check_response_term(response.term) {
                            warn!(
                                "Leader {} stepping down after heartbeat reply from {peer_id}: {e}",
                                self.id
                            );
                            self.metrics.record_step_down();
                            return;
                        }
                        if !state.is_current_epoch(epoch) {
                            return;
                        }
                    }
                    Err(e) => trace!("Leader {} heartbeat skipped: {e}", self.id),
                }
            }
        }
    }

    async fn note_role_change(&self, before: NodeRole, after: NodeRole) {
        if before == after || after != NodeRole::Follower {
            return;
        }
        self.metrics.record_step_down();
        if before == NodeRole::Leader {
            self.stop_broadcaster().await;
        }
    }

    async fn stop_broadcaster(&self) {
        if let Some(handle) = self.broadcaster.lock().await.take() {
            handle.abort();
        }
    }
}

async fn bounded<T>(
    peer: &Peer,
    limit: Duration,
    call: impl Future<Output = Result<T, NetworkError>>,
) -> Result<T, RaftError> {
    match timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(RaftError::PeerUnreachable {
            peer: peer.id.clone(),
            reason: e.to_string(),
        }),
        Err(_) => Err(RaftError::PeerUnreachable {
            peer: peer.id.clone(),
            reason: NetworkError::TimeoutError.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Answers every peer the same way, optionally after a delay.
    struct ScriptedTransport {
        vote: Option<RequestVoteResponse>,
        heartbeat_term: AtomicU64,
        delay: Duration,
        heartbeats: AtomicU64,
    }

    impl ScriptedTransport {
        fn granting(term: u64) -> Arc<Self> {
            Arc::new(Self {
                vote: Some(RequestVoteResponse {
                    term,
                    vote_granted: true,
                }),
                heartbeat_term: AtomicU64::new(term),
                delay: Duration::ZERO,
                heartbeats: AtomicU64::new(0),
            })
        }

        fn unreachable() -> Arc<Self> {
            Arc::new(Self {
                vote: None,
                heartbeat_term: AtomicU64::new(0),
                delay: Duration::ZERO,
                heartbeats: AtomicU64::new(0),
            })
        }
    }

    #[tonic::async_trait]
    impl PeerTransport for ScriptedTransport {
        async fn request_vote(
            &self,
            _peer: &Peer,
            _request: RequestVote,
        ) -> Result<RequestVoteResponse, NetworkError> {
            sleep(self.delay).await;
            self.vote
                .clone()
                .ok_or_else(|| NetworkError::ConnectionError("connection refused".to_string()))
        }

        async fn append_entries(
            &self,
            _peer: &Peer,
            request: AppendEntries,
        ) -> Result<AppendEntriesResponse, NetworkError> {
            self.heartbeats.fetch_add(1, Ordering::SeqCst);
            Ok(AppendEntriesResponse {
                term: self.heartbeat_term.load(Ordering::SeqCst).max(request.term),
                success: true,
            })
        }
    }

    fn three_node_config(id: &str) -> RaftConfig {
        let mut cfg = RaftConfig::new(id);
        for (peer, addr) in [("A", "a:1"), ("B", "b:1"), ("C", "c:1")] {
            cfg.add_peer(peer, addr);
        }
        cfg
    }

    #[tokio::test]
    async fn single_node_election_becomes_leader_immediately() {
        let node = RaftNode::new(RaftConfig::new("solo"), ScriptedTransport::unreachable());

        node.start_election().await;

        let status = node.status().await;
        assert!(status.is_leader);
        assert_eq!(status.term, 1);
        assert_eq!(status.voted_for.as_deref(), Some("solo"));
        assert_eq!(status.leader_id.as_deref(), Some("solo"));
        node.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn granted_votes_promote_candidate() {
        let transport = ScriptedTransport::granting(1);
        let node = RaftNode::new(three_node_config("A"), transport.clone());

        node.start_election().await;
        assert!(node.is_leader().await);
        assert_eq!(node.current_term().await, 1);

        // Broadcaster fires its first tick right away.
        sleep(Duration::from_millis(1)).await;
        assert!(transport.heartbeats.load(Ordering::SeqCst) >= 2);
        node.shutdown();
    }

    #[tokio::test]
    async fn unreachable_peers_leave_node_candidate() {
        let node = RaftNode::new(three_node_config("A"), ScriptedTransport::unreachable());

        node.start_election().await;

        let status = node.status().await;
        assert_eq!(status.role, NodeRole::Candidate);
        assert_eq!(status.term, 1);
        assert!(!status.is_leader);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_peers_are_bounded_by_rpc_timeout() {
        let transport = Arc::new(ScriptedTransport {
            vote: Some(RequestVoteResponse {
                term: 1,
                vote_granted: true,
            }),
            heartbeat_term: AtomicU64::new(1),
            delay: Duration::from_secs(30),
            heartbeats: AtomicU64::new(0),
        });
        let node = RaftNode::new(three_node_config("A"), transport);

        let started = Instant::now();
        node.start_election().await;

        let elapsed = started.elapsed();
        assert!(elapsed >= node.config().rpc_timeout());
        assert!(elapsed < Duration::from_secs(1));
        assert_eq!(node.role().await, NodeRole::Candidate);
    }

    #[tokio::test]
    async fn higher_term_vote_reply_abandons_candidacy() {
        let transport = Arc::new(ScriptedTransport {
            vote: Some(RequestVoteResponse {
                term: 9,
                vote_granted: false,
            }),
            heartbeat_term: AtomicU64::new(9),
            delay: Duration::ZERO,
            heartbeats: AtomicU64::new(0),
        });
        let node = RaftNode::new(three_node_config("A"), transport);

        node.start_election().await;

        let status = node.status().await;
        assert_eq!(status.role, NodeRole::Follower);
        assert_eq!(status.term, 9);
        assert_eq!(status.voted_for, None);
    }

    #[tokio::test(start_paused = true)]
    async fn higher_term_heartbeat_reply_stops_broadcaster() {
        let transport = Arc::new(ScriptedTransport {
            vote: Some(RequestVoteResponse {
                term: 1,
                vote_granted: true,
            }),
            heartbeat_term: AtomicU64::new(4),
            delay: Duration::ZERO,
            heartbeats: AtomicU64::new(0),
        });
        let node = RaftNode::new(three_node_config("A"), transport.clone());

        node.start_election().await;
        sleep(Duration::from_millis(10)).await;

        assert_eq!(node.role().await, NodeRole::Follower);
        assert_eq!(node.current_term().await, 4);

        let sent = transport.heartbeats.load(Ordering::SeqCst);
        sleep(Duration::from_millis(500)).await;
        assert_eq!(transport.heartbeats.load(Ordering::SeqCst), sent);
    }

    #[tokio::test(start_paused = true)]
    async fn leader_deposed_by_heartbeat_reply_waits_full_timeout() {
        let transport = ScriptedTransport::granting(1);
        let node = RaftNode::new(three_node_config("A"), transport.clone());
        let timer = tokio::spawn(Arc::clone(&node).run_election_timer());
        node.start_election().await;
        sleep(Duration::from_millis(550)).await;
        assert!(node.is_leader().await);

        // Next heartbeat round learns of term 4.
        transport.heartbeat_term.store(4, Ordering::SeqCst);
        sleep(Duration::from_millis(60)).await;
        assert_eq!(node.role().await, NodeRole::Follower);
        assert_eq!(node.current_term().await, 4);

        // Step-down happened no earlier than 550ms; the minimum timeout is 150ms.
        sleep(Duration::from_millis(85)).await;
        let status = node.status().await;
        assert_eq!(status.role, NodeRole::Follower);
        assert_eq!(status.term, 4);
        assert_eq!(node.metrics().snapshot().elections_started, 1);

        node.shutdown();
        timer.await.expect("timer task");
    }

    #[tokio::test]
    async fn vote_request_with_higher_term_demotes_leader_before_reply() {
        let node = RaftNode::new(three_node_config("A"), ScriptedTransport::granting(1));
        node.start_election().await;
        assert!(node.is_leader().await);

        let reply = node
            .handle_request_vote(RequestVote {
                term: 3,
                candidate_id: "B".to_string(),
            })
            .await;

        assert!(reply.vote_granted);
        assert_eq!(reply.term, 3);
        let status = node.status().await;
        assert_eq!(status.role, NodeRole::Follower);
        assert_eq!(status.voted_for.as_deref(), Some("B"));
        assert_eq!(node.metrics().snapshot().step_downs, 1);
        node.shutdown();
    }

    #[tokio::test]
    async fn stale_heartbeat_is_refused() {
        let node = RaftNode::new(three_node_config("B"), ScriptedTransport::unreachable());
        node.handle_request_vote(RequestVote {
            term: 5,
            candidate_id: "C".to_string(),
        })
        .await;

        let reply = node
            .handle_append_entries(AppendEntries {
                term: 4,
                leader_id: "A".to_string(),
            })
            .await;

        assert!(!reply.success);
        assert_eq!(reply.term, 5);
        assert_eq!(node.status().await.leader_id, None);
    }

    #[tokio::test]
    async fn submit_command_requires_leadership() {
        let node = RaftNode::new(three_node_config("A"), ScriptedTransport::granting(1));

        let err = node.submit_command(b"noop".to_vec()).await.unwrap_err();
        assert_eq!(err, RaftError::NotLeader { leader_id: None });

        node.start_election().await;
        let first = node.submit_command(b"one".to_vec()).await.expect("leader");
        let second = node.submit_command(b"two".to_vec()).await.expect("leader");
        assert_eq!(first.log_index, 0);
        assert_eq!(second.log_index, 1);
        assert_eq!(second.leader_id, "A");
        assert_eq!(node.status().await.log_length, 2);
        node.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn simulate_crash_demotes_and_silences_leader() {
        let transport = ScriptedTransport::granting(1);
        let node = RaftNode::new(three_node_config("A"), transport.clone());
        node.start_election().await;
        sleep(Duration::from_millis(120)).await;

        let report = node.simulate_crash().await;
        assert_eq!(report.status, "killed");
        assert_eq!(report.id, "A");

        let status = node.status().await;
        assert!(!status.is_leader);
        assert_eq!(status.role, NodeRole::Follower);
        assert_eq!(status.term, 1);

        let sent = transport.heartbeats.load(Ordering::SeqCst);
        sleep(Duration::from_millis(500)).await;
        assert_eq!(transport.heartbeats.load(Ordering::SeqCst), sent);
    }

    #[tokio::test(start_paused = true)]
    async fn election_timer_starts_candidacy_after_timeout() {
        let node = RaftNode::new(three_node_config("A"), ScriptedTransport::unreachable());
        let timer = tokio::spawn(Arc::clone(&node).run_election_timer());

        sleep(Duration::from_millis(140)).await;
        assert_eq!(node.current_term().await, 0);

        sleep(Duration::from_millis(200)).await;
        assert!(node.current_term().await >= 1);
        assert_eq!(node.role().await, NodeRole::Candidate);

        node.shutdown();
        timer.await.expect("timer task");
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeats_keep_follower_from_timing_out() {
        let node = RaftNode::new(three_node_config("B"), ScriptedTransport::unreachable());
        let timer = tokio::spawn(Arc::clone(&node).run_election_timer());

        for _ in 0..40 {
            node.handle_append_entries(AppendEntries {
                term: 1,
                leader_id: "A".to_string(),
            })
            .await;
            sleep(Duration::from_millis(50)).await;
        }

        let status = node.status().await;
        assert_eq!(status.role, NodeRole::Follower);
        assert_eq!(status.term, 1);
        assert_eq!(node.metrics().snapshot().elections_started, 0);

        node.shutdown();
        timer.await.expect("timer task");
    }
}

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
// Use external log crate, not our own log module
use ::log::{debug, info, warn};

use super::{Log, LogEntry, RaftError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Follower,
    Candidate,
    Leader,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Follower => "follower",
            NodeRole::Candidate => "candidate",
            NodeRole::Leader => "leader",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one continuous leadership tenure of a node. Strictly increasing
/// per node, so a token from an earlier tenure never matches a later one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LeadershipEpoch(u64);

impl LeadershipEpoch {
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Outcome of folding one granted vote into the candidacy tally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteTally {
    Won,
    Pending { votes: usize, needed: usize },
    /// No longer a candidate in that term; the vote is meaningless.
    Ignored,
}

/// Term, role and vote record of the local node.
///
/// Every method is a complete read-modify-write; callers hold the node lock
/// for the duration of a call and never across network I/O.
#[derive(Debug)]
pub struct NodeState {
    id: String,
    quorum: usize,
    current_term: u64,
    role: NodeRole,
    voted_for: Option<String>,
    leader_id: Option<String>,
    last_heartbeat: Instant,
    votes: BTreeSet<String>,
    epoch: Option<LeadershipEpoch>,
    epochs_issued: u64,
    log: Log,
}

impl NodeState {
    pub fn new(id: &str, quorum: usize) -> Self {
        Self {
            id: id.to_string(),
            quorum: quorum.max(1),
            current_term: 0,
            role: NodeRole::Follower,
            voted_for: None,
            leader_id: None,
            last_heartbeat: Instant::now(),
            votes: BTreeSet::new(),
            epoch: None,
            epochs_issued: 0,
            log: Log::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn current_term(&self) -> u64 {
        self.current_term
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn is_leader(&self) -> bool {
        self.role == NodeRole::Leader
    }

    pub fn voted_for(&self) -> Option<&str> {
        self.voted_for.as_deref()
    }

    pub fn leader_id(&self) -> Option<&str> {
        self.leader_id.as_deref()
    }

    /// Last time the election clock was reset.
    pub fn last_heartbeat(&self) -> Instant {
        self.last_heartbeat
    }

    pub fn votes_granted(&self) -> usize {
        self.votes.len()
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    pub fn log(&self) -> &Log {
        &self.log
    }

    /// Adopts `remote_term` if it is newer, stepping down to follower and
    /// forgetting this term's vote. Returns true when the term advanced.
    pub fn observe_term(&mut self, remote_term: u64) -> bool {
        if remote_term <= self.current_term {
            return false;
        }

        if self.role != NodeRole::Follower {
            warn!(
                "Node {} stepping down from {} (term {} -> {})",
                self.id, self.role, self.current_term, remote_term
            );
        }
        // A deposed leader's clock still dates from its candidacy.
        if self.role == NodeRole::Leader {
            self.last_heartbeat = Instant::now();
        }

        self.current_term = remote_term;
        self.voted_for = None;
        self.leader_id = None;
        self.enter_follower();
        true
    }

    /// Term check for responses to our own requests.
    pub fn check_response_term(&mut self, term: u64) -> Result<(), RaftError> {
        if self.observe_term(term) {
            Err(RaftError::HigherTermObserved { term })
        } else {
            Ok(())
        }
    }

    /// At most one candidate per term gets a vote. Granting resets the
    /// election clock.
    pub fn try_grant_vote(&mut self, candidate_id: &str, candidate_term: u64) -> bool {
        self.observe_term(candidate_term);

        if candidate_term < self.current_term {
            return false;
        }

        match self.voted_for.as_deref() {
            Some(existing) if existing != candidate_id => {
                debug!(
                    "Node {} already voted for {} in term {}",
                    self.id, existing, self.current_term
                );
                false
            }
            _ => {
                self.voted_for = Some(candidate_id.to_string());
                self.last_heartbeat = Instant::now();
                true
            }
        }
    }

    /// Starts a new candidacy and returns its term.
    pub fn become_candidate(&mut self) -> u64 {
        self.current_term += 1;
        self.role = NodeRole::Candidate;
        self.voted_for = Some(self.id.clone());
        self.leader_id = None;
        self.epoch = None;
        self.votes.clear();
        self.votes.insert(self.id.clone());
        self.last_heartbeat = Instant::now();
        self.current_term
    }

    /// Counts a granted vote from `voter` for the candidacy of `term`.
    pub fn record_vote(&mut self, term: u64, voter: &str) -> VoteTally {
        if self.role != NodeRole::Candidate || term != self.current_term {
            return VoteTally::Ignored;
        }

        self.votes.insert(voter.to_string());
        if self.votes.len() >= self.quorum {
            VoteTally::Won
        } else {
            VoteTally::Pending {
                votes: self.votes.len(),
                needed: self.quorum,
            }
        }
    }

    pub fn has_quorum(&self) -> bool {
        self.role == NodeRole::Candidate && self.votes.len() >= self.quorum
    }

    /// Promotes a candidate holding a quorum. Returns the epoch token of the
    /// new tenure, or `None` if the node is not a candidate with enough votes.
    pub fn become_leader(&mut self) -> Option<LeadershipEpoch> {
        if !self.has_quorum() {
            return None;
        }

        self.role = NodeRole::Leader;
        self.leader_id = Some(self.id.clone());
        self.votes.clear();
        self.epochs_issued += 1;
        let epoch = LeadershipEpoch(self.epochs_issued);
        self.epoch = Some(epoch);
        Some(epoch)
    }

    pub fn is_current_epoch(&self, epoch: LeadershipEpoch) -> bool {
        self.role == NodeRole::Leader && self.epoch == Some(epoch)
    }

    /// Applies a heartbeat. Same-or-newer terms reset the election clock and
    /// demote a candidate or leader; older terms are refused untouched.
    pub fn accept_heartbeat(&mut self, term: u64, leader_id: &str) -> Result<(), RaftError> {
        self.observe_term(term);

        if term < self.current_term {
            return Err(RaftError::StaleTerm {
                received: term,
                current: self.current_term,
            });
        }

        self.last_heartbeat = Instant::now();
        self.leader_id = Some(leader_id.to_string());

        if self.role != NodeRole::Follower {
            info!(
                "Node {} becoming follower of {} in term {}",
                self.id, leader_id, self.current_term
            );
            self.enter_follower();
        }

        Ok(())
    }

    /// Forced demotion without a term change. The election clock restarts so
    /// the node waits a full timeout before competing again.
    pub fn step_down(&mut self) {
        self.enter_follower();
        self.leader_id = None;
        self.last_heartbeat = Instant::now();
    }

    pub fn append_command(&mut self, command: Vec<u8>) -> Result<u64, RaftError> {
        if self.role != NodeRole::Leader {
            return Err(RaftError::NotLeader {
                leader_id: self.leader_id.clone(),
            });
        }

        Ok(self.log.append(LogEntry {
            term: self.current_term,
            command,
        }))
    }

    fn enter_follower(&mut self) {
        self.role = NodeRole::Follower;
        self.votes.clear();
        self.epoch = None;
    }
}

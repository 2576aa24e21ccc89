use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RaftError {
    #[error("Not the leader (known leader: {leader_id:?})")]
    NotLeader { leader_id: Option<String> },

    #[error("Peer {peer} unreachable: {reason}")]
    PeerUnreachable { peer: String, reason: String },

    #[error("Stale term {received} (current term is {current})")]
    StaleTerm { received: u64, current: u64 },

    #[error("Observed higher term {term}")]
    HigherTermObserved { term: u64 },
}

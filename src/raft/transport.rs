use crate::network::NetworkError;

use super::{AppendEntries, AppendEntriesResponse, Peer, RequestVote, RequestVoteResponse};

/// Outbound side of the election protocol. Implementations only move
/// messages; timeouts are applied by the caller.
#[tonic::async_trait]
pub trait PeerTransport: Send + Sync + 'static {
    async fn request_vote(
        &self,
        peer: &Peer,
        request: RequestVote,
    ) -> Result<RequestVoteResponse, NetworkError>;

    async fn append_entries(
        &self,
        peer: &Peer,
        request: AppendEntries,
    ) -> Result<AppendEntriesResponse, NetworkError>;
}

use std::sync::Arc;

use log::{debug, warn};
use tonic::{Request, Response, Status};

use crate::network::proto::raft_service_server::RaftService;
use crate::raft::{AppendEntries, RaftNode, RequestVote};

use super::proto::*;

/// Inbound gRPC side: unpacks the wire messages and hands them to the node.
pub struct RaftServer {
    node: Arc<RaftNode>,
}

impl RaftServer {
    pub fn new(node: Arc<RaftNode>) -> Self {
        Self { node }
    }
}

#[tonic::async_trait]
impl RaftService for RaftServer {
    async fn request_vote(
        &self,
        request: Request<RequestVoteRequest>,
    ) -> Result<Response<RequestVoteResponse>, Status> {
        let req = request.into_inner();
        debug!("Received RequestVote: {:?}", req);

        if req.candidate_id.is_empty() {
            warn!("Rejecting RequestVote without candidate id");
            return Err(Status::invalid_argument("candidate_id must not be empty"));
        }

        let reply = self
            .node
            .handle_request_vote(RequestVote {
                term: req.term,
                candidate_id: req.candidate_id,
            })
            .await;

        Ok(Response::new(RequestVoteResponse {
            term: reply.term,
            vote_granted: reply.vote_granted,
        }))
    }

    async fn append_entries(
        &self,
        request: Request<AppendEntriesRequest>,
    ) -> Result<Response<AppendEntriesResponse>, Status> {
        let req = request.into_inner();
        debug!("Received AppendEntries: term={}, leader={}", req.term, req.leader_id);

        if req.leader_id.is_empty() {
            warn!("Rejecting AppendEntries without leader id");
            return Err(Status::invalid_argument("leader_id must not be empty"));
        }

        let reply = self
            .node
            .handle_append_entries(AppendEntries {
                term: req.term,
                leader_id: req.leader_id,
            })
            .await;

        Ok(Response::new(AppendEntriesResponse {
            term: reply.term,
            success: reply.success,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::memory::LocalNetwork;
    use crate::raft::{NodeRole, RaftConfig};

    fn server() -> (RaftServer, Arc<RaftNode>) {
        let network = LocalNetwork::new();
        let config = RaftConfig::new("B").with_peer("A", "a:1").with_peer("C", "c:1");
        let node = RaftNode::new(config, network.transport_for("B"));
        network.register(&node);
        (RaftServer::new(Arc::clone(&node)), node)
    }

    #[tokio::test]
    async fn vote_request_is_forwarded_to_node() {
        let (server, node) = server();

        let reply = server
            .request_vote(Request::new(RequestVoteRequest {
                term: 2,
                candidate_id: "A".to_string(),
            }))
            .await
            .expect("vote reply")
            .into_inner();

        assert!(reply.vote_granted);
        assert_eq!(reply.term, 2);
        assert_eq!(node.status().await.voted_for.as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn heartbeat_sets_known_leader() {
        let (server, node) = server();

        let reply = server
            .append_entries(Request::new(AppendEntriesRequest {
                term: 1,
                leader_id: "C".to_string(),
            }))
            .await
            .expect("heartbeat reply")
            .into_inner();

        assert!(reply.success);
        let status = node.status().await;
        assert_eq!(status.role, NodeRole::Follower);
        assert_eq!(status.leader_id.as_deref(), Some("C"));
    }

    #[tokio::test]
    async fn empty_candidate_id_is_invalid_argument() {
        let (server, _node) = server();

        let status = server
            .request_vote(Request::new(RequestVoteRequest {
                term: 1,
                candidate_id: String::new(),
            }))
            .await
            .unwrap_err();

        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }
}

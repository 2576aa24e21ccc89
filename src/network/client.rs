use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tonic::transport::{Channel, Endpoint};
use tonic::Request;

use log::debug;

use crate::network::proto::raft_service_client::RaftServiceClient;
use crate::network::proto::{AppendEntriesRequest, RequestVoteRequest};
use crate::raft::{
    AppendEntries, AppendEntriesResponse, Peer, PeerTransport, RequestVote, RequestVoteResponse,
};

use super::NetworkError;

/// gRPC transport. Connections are opened on first use and cached per peer;
/// a failed call evicts the cached client so the next call reconnects.
pub struct GrpcTransport {
    connect_timeout: Duration,
    clients: Mutex<HashMap<String, RaftServiceClient<Channel>>>,
}

impl GrpcTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            clients: Mutex::new(HashMap::new()),
        }
    }

    async fn client_for(&self, peer: &Peer) -> Result<RaftServiceClient<Channel>, NetworkError> {
        if let Some(client) = self.clients.lock().await.get(&peer.id) {
            return Ok(client.clone());
        }

        let endpoint = Endpoint::from_shared(peer_uri(&peer.address))
            .map_err(|e| NetworkError::ConnectionError(e.to_string()))?;

        let channel = endpoint
            .connect_timeout(self.connect_timeout)
            .connect()
            .await?;

        debug!("Connected to peer {} at {}", peer.id, peer.address);
        let client = RaftServiceClient::new(channel);
        self.clients
            .lock()
            .await
            .insert(peer.id.clone(), client.clone());
        Ok(client)
    }

    async fn evict(&self, peer: &Peer) {
        self.clients.lock().await.remove(&peer.id);
    }
}

impl Default for GrpcTransport {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

#[tonic::async_trait]
impl PeerTransport for GrpcTransport {
    async fn request_vote(
        &self,
        peer: &Peer,
        request: RequestVote,
    ) -> Result<RequestVoteResponse, NetworkError> {
        let mut client = self.client_for(peer).await?;

        let request = RequestVoteRequest {
            term: request.term,
            candidate_id: request.candidate_id,
        };

        match client.request_vote(Request::new(request)).await {
            Ok(response) => {
                let response = response.into_inner();
                Ok(RequestVoteResponse {
                    term: response.term,
                    vote_granted: response.vote_granted,
                })
            }
            Err(status) => {
                self.evict(peer).await;
                Err(status.into())
            }
        }
    }

    async fn append_entries(
        &self,
        peer: &Peer,
        request: AppendEntries,
    ) -> Result<AppendEntriesResponse, NetworkError> {
        let mut client = self.client_for(peer).await?;

        let request = AppendEntriesRequest {
            term: request.term,
            leader_id: request.leader_id,
        };

        match client.append_entries(Request::new(request)).await {
            Ok(response) => {
                let response = response.into_inner();
                Ok(AppendEntriesResponse {
                    term: response.term,
                    success: response.success,
                })
            }
            Err(status) => {
                self.evict(peer).await;
                Err(status.into())
            }
        }
    }
}

fn peer_uri(address: &str) -> String {
    if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{address}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_addresses_get_http_scheme() {
        assert_eq!(peer_uri("127.0.0.1:9001"), "http://127.0.0.1:9001");
        assert_eq!(peer_uri("http://node-b:9001"), "http://node-b:9001");
    }

    #[tokio::test]
    async fn unreachable_peer_yields_error_and_caches_nothing() {
        let transport = GrpcTransport::new(Duration::from_millis(50));
        // Port 1 on localhost is never a Raft peer.
        let peer = Peer::new("B", "127.0.0.1:1");

        let result = transport
            .request_vote(
                &peer,
                RequestVote {
                    term: 1,
                    candidate_id: "A".to_string(),
                },
            )
            .await;

        assert!(result.is_err());
        assert!(transport.clients.lock().await.is_empty());
    }

    #[tokio::test]
    async fn malformed_address_is_a_connection_error() {
        let transport = GrpcTransport::default();
        let peer = Peer::new("B", "not a uri");

        let err = transport
            .append_entries(
                &peer,
                AppendEntries {
                    term: 1,
                    leader_id: "A".to_string(),
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, NetworkError::ConnectionError(_)));
    }
}

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::body::HttpBody as _;
use hyper::header::{self, HeaderValue};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, StatusCode};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::raft::{AppendEntries, NodeRole, RaftError, RaftNode, RequestVote};

const MAX_BODY_BYTES: usize = 64 * 1024;

/// JSON admin surface of a node. Serves until `shutdown` resolves.
pub async fn run_http_admin<F>(
    addr: SocketAddr,
    node: Arc<RaftNode>,
    shutdown: F,
) -> Result<(), hyper::Error>
where
    F: Future<Output = ()>,
{
    let make_svc = make_service_fn(move |_conn| {
        let node = Arc::clone(&node);
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let node = Arc::clone(&node);
                async move { handle(req, node).await }
            }))
        }
    });

    let server = hyper::Server::try_bind(&addr)?.serve(make_svc);
    info!("HTTP admin listening on {}", server.local_addr());
    server.with_graceful_shutdown(shutdown).await
}

#[derive(Debug, Deserialize)]
struct CommandRequest {
    command: serde_json::Value,
}

fn respond(status: StatusCode, content_type: &'static str, body: impl Into<Body>) -> Response<Body> {
    let mut resp = Response::new(body.into());
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    resp
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Body> {
    match serde_json::to_vec(value) {
        Ok(body) => respond(status, "application/json", body),
        Err(e) => respond(
            StatusCode::INTERNAL_SERVER_ERROR,
            "text/plain",
            format!("serialization error: {e}"),
        ),
    }
}

fn json_error(status: StatusCode, msg: &str) -> Response<Body> {
    json_response(status, &json!({ "error": msg }))
}

enum ReadBodyError {
    TooLarge,
    Hyper(hyper::Error),
    Json(serde_json::Error),
}

impl From<hyper::Error> for ReadBodyError {
    fn from(e: hyper::Error) -> Self {
        Self::Hyper(e)
    }
}

impl ReadBodyError {
    fn into_response(self) -> Response<Body> {
        match self {
            Self::TooLarge => json_error(StatusCode::PAYLOAD_TOO_LARGE, "payload too large"),
            Self::Hyper(e) => json_error(
                StatusCode::BAD_REQUEST,
                &format!("failed to read request body: {e}"),
            ),
            Self::Json(e) => json_error(StatusCode::BAD_REQUEST, &format!("invalid JSON: {e}")),
        }
    }
}

async fn read_body_limited(mut body: Body, max_bytes: usize) -> Result<Vec<u8>, ReadBodyError> {
    let mut out = Vec::new();
    while let Some(next) = body.data().await {
        let chunk = next?;
        if out.len() + chunk.len() > max_bytes {
            return Err(ReadBodyError::TooLarge);
        }
        out.extend_from_slice(&chunk);
    }
    Ok(out)
}

async fn read_json<T: DeserializeOwned>(req: Request<Body>) -> Result<T, ReadBodyError> {
    let bytes = read_body_limited(req.into_body(), MAX_BODY_BYTES).await?;
    serde_json::from_slice(&bytes).map_err(ReadBodyError::Json)
}

/// Strings are stored as their UTF-8 bytes, any other JSON value as its
/// serialized form.
fn command_bytes(command: serde_json::Value) -> Vec<u8> {
    match command {
        serde_json::Value::String(s) => s.into_bytes(),
        other => other.to_string().into_bytes(),
    }
}

async fn handle(req: Request<Body>, node: Arc<RaftNode>) -> Result<Response<Body>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    debug!("HTTP {} {}", method, path);

    let response = match (method, path.as_str()) {
        (Method::POST, "/request_vote") => match read_json::<RequestVote>(req).await {
            Ok(vote) if vote.candidate_id.is_empty() => {
                warn!("Rejecting RequestVote without candidate id");
                json_error(StatusCode::BAD_REQUEST, "candidate_id must not be empty")
            }
            Ok(vote) => json_response(StatusCode::OK, &node.handle_request_vote(vote).await),
            Err(e) => e.into_response(),
        },
        (Method::POST, "/append_entries") => match read_json::<AppendEntries>(req).await {
            Ok(heartbeat) if heartbeat.leader_id.is_empty() => {
                warn!("Rejecting AppendEntries without leader id");
                json_error(StatusCode::BAD_REQUEST, "leader_id must not be empty")
            }
            Ok(heartbeat) => {
                json_response(StatusCode::OK, &node.handle_append_entries(heartbeat).await)
            }
            Err(e) => e.into_response(),
        },
        (Method::POST, "/client_command") => match read_json::<CommandRequest>(req).await {
            Ok(cmd) => client_command(&node, cmd).await,
            Err(e) => e.into_response(),
        },
        (Method::POST, "/kill") => json_response(StatusCode::OK, &node.simulate_crash().await),
        (Method::GET, "/status") => json_response(StatusCode::OK, &node.status().await),
        (Method::GET, "/health") => {
            let status = node.status().await;
            json_response(
                StatusCode::OK,
                &json!({ "status": "ok", "role": status.role, "term": status.term }),
            )
        }
        (Method::GET, "/metrics") => respond(
            StatusCode::OK,
            "text/plain; version=0.0.4",
            build_metrics(&node).await,
        ),
        (Method::GET, "/") => {
            let status = node.status().await;
            respond(
                StatusCode::OK,
                "text/plain",
                format!(
                    "Node {} - {} - Term: {}",
                    status.id,
                    status.role.as_str().to_uppercase(),
                    status.term
                ),
            )
        }
        _ => json_error(StatusCode::NOT_FOUND, "not found"),
    };

    Ok(response)
}

async fn client_command(node: &RaftNode, cmd: CommandRequest) -> Response<Body> {
    match node.submit_command(command_bytes(cmd.command)).await {
        Ok(receipt) => json_response(
            StatusCode::OK,
            &json!({
                "success": true,
                "leader_id": receipt.leader_id,
                "log_index": receipt.log_index,
                "term": receipt.term,
            }),
        ),
        Err(RaftError::NotLeader { leader_id }) => json_response(
            StatusCode::OK,
            &json!({ "success": false, "error": "Not leader", "leader_id": leader_id }),
        ),
        Err(e) => json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

async fn build_metrics(node: &RaftNode) -> String {
    let status = node.status().await;
    let role_value = match status.role {
        NodeRole::Follower => 0,
        NodeRole::Candidate => 1,
        NodeRole::Leader => 2,
    };
    let counters = node.metrics().snapshot();

    format!(
        concat!(
            "# TYPE raftlet_term gauge\n",
            "raftlet_term {}\n",
            "# TYPE raftlet_role gauge\n",
            "raftlet_role {}\n",
            "# TYPE raftlet_elections_started_total counter\n",
            "raftlet_elections_started_total {}\n",
            "# TYPE raftlet_votes_granted_total counter\n",
            "raftlet_votes_granted_total {}\n",
            "# TYPE raftlet_heartbeats_sent_total counter\n",
            "raftlet_heartbeats_sent_total {}\n",
            "# TYPE raftlet_step_downs_total counter\n",
            "raftlet_step_downs_total {}\n",
        ),
        status.term,
        role_value,
        counters.elections_started,
        counters.votes_granted,
        counters.heartbeats_sent,
        counters.step_downs,
    )
}

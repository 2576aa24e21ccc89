mod error;

pub mod client;
pub mod http_admin;
pub mod memory;
pub mod metrics;
pub mod server;

pub use client::GrpcTransport;
pub use error::NetworkError;
pub use http_admin::run_http_admin;
pub use memory::{InMemoryTransport, LocalNetwork};
pub use metrics::{MetricsSnapshot, RaftMetrics};
pub use server::RaftServer;

pub mod proto {
    tonic::include_proto!("raft");
}

pub mod config;
pub mod network;
pub mod raft;

pub use config::{Config, ConfigError, PeerConfig};
pub use raft::{Raft, RaftConfig, RaftError, RaftNode};

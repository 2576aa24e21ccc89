use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::{error, info};
use tokio::sync::watch;
use tracing_log::LogTracer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use raftlet::network::proto::raft_service_server::RaftServiceServer;
use raftlet::network::{run_http_admin, GrpcTransport, RaftServer};
use raftlet::{Config, Raft};

#[derive(Parser)]
#[command(name = "raftlet")]
#[command(about = "Raft leader election node with an HTTP admin surface")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a cluster node
    Node {
        /// Unique ID for this node
        #[arg(short, long)]
        id: Option<String>,

        /// JSON config file; flags below override its values
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// gRPC address to listen on
        #[arg(short, long)]
        address: Option<String>,

        /// HTTP admin address to listen on
        #[arg(long)]
        http: Option<String>,

        /// Comma-separated list of peers (id=address)
        #[arg(short, long)]
        peers: Option<String>,

        #[arg(long)]
        election_timeout_min_ms: Option<u64>,

        #[arg(long)]
        election_timeout_max_ms: Option<u64>,

        #[arg(long)]
        heartbeat_interval_ms: Option<u64>,

        #[arg(long)]
        rpc_timeout_ms: Option<u64>,
    },

    /// Admin tooling against a node's HTTP endpoint
    Admin {
        #[command(subcommand)]
        cmd: AdminCmd,
    },
}

#[derive(Subcommand)]
enum AdminCmd {
    /// Show node status (host:port of admin HTTP)
    Status {
        #[arg(long)]
        http: String,
    },
    /// Submit a client command to the node
    Submit {
        #[arg(long)]
        http: String,
        command: String,
    },
    /// Simulate a leader crash on the node
    Kill {
        #[arg(long)]
        http: String,
    },
    /// Dump Prometheus metrics
    Metrics {
        #[arg(long)]
        http: String,
    },
}

fn http_request(
    host_port: &str,
    method: &str,
    path: &str,
    body: Option<&str>,
) -> Result<String, Box<dyn std::error::Error>> {
    use std::io::{Read, Write};
    use std::net::TcpStream;
    let mut stream = TcpStream::connect(host_port)?;
    let body = body.unwrap_or("");
    let req = format!(
        "{method} {path} HTTP/1.1\r\nHost: {host_port}\r\nConnection: close\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(req.as_bytes())?;
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf)?;
    let resp = String::from_utf8_lossy(&buf);
    if let Some(pos) = resp.find("\r\n\r\n") {
        Ok(resp[pos + 4..].to_string())
    } else {
        Ok(resp.to_string())
    }
}

fn init_logging() {
    if let Ok(path) = std::env::var("RAFTLET_LOG_FILE") {
        // Plain log lines to a file instead of the structured stderr output.
        let mut builder =
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("cannot open log file {path}: {e}, logging to stderr"),
        }
        let _ = builder.try_init();
        return;
    }

    let _ = LogTracer::init();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339());

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
}

#[allow(clippy::too_many_arguments)]
fn node_config(
    id: Option<String>,
    config: Option<PathBuf>,
    address: Option<String>,
    http: Option<String>,
    peers: Option<String>,
    election_timeout_min_ms: Option<u64>,
    election_timeout_max_ms: Option<u64>,
    heartbeat_interval_ms: Option<u64>,
    rpc_timeout_ms: Option<u64>,
) -> Result<Config, Box<dyn std::error::Error>> {
    let mut cfg = match config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    if let Some(id) = id {
        cfg.node_id = id;
    }
    if let Some(address) = address {
        cfg.listen_addr = address;
    }
    if let Some(http) = http {
        cfg.http_addr = http;
    }
    if let Some(peers) = peers {
        cfg.peers = Config::parse_peers(&peers)?;
    }
    if let Some(v) = election_timeout_min_ms {
        cfg.election_timeout_min_ms = v;
    }
    if let Some(v) = election_timeout_max_ms {
        cfg.election_timeout_max_ms = v;
    }
    if let Some(v) = heartbeat_interval_ms {
        cfg.heartbeat_interval_ms = v;
    }
    if let Some(v) = rpc_timeout_ms {
        cfg.rpc_timeout_ms = v;
    }

    cfg.validate()?;
    Ok(cfg)
}

async fn run_node(cfg: Config) -> Result<(), Box<dyn std::error::Error>> {
    let addr = cfg.listen_socket()?;
    let http_addr = cfg.http_socket()?;
    let raft_config = cfg.raft_config();

    for peer in &raft_config.peers {
        info!("Added peer: {} at {}", peer.id, peer.address);
    }

    let transport = Arc::new(GrpcTransport::new(raft_config.rpc_timeout()));
    let raft = Raft::new(raft_config, transport);
    let timer = raft.start();

    let (stop_tx, mut stop_rx) = watch::channel(false);
    {
        let http_node = Arc::clone(raft.node());
        tokio::spawn(async move {
            let shutdown = async move {
                let _ = stop_rx.changed().await;
            };
            if let Err(e) = run_http_admin(http_addr, http_node, shutdown).await {
                error!("HTTP admin server error: {e}");
            }
        });
    }

    info!("Node {} gRPC server listening on {addr}", cfg.node_id);
    tonic::transport::Server::builder()
        .add_service(RaftServiceServer::new(RaftServer::new(Arc::clone(
            raft.node(),
        ))))
        .serve_with_shutdown(addr, async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    raft.shutdown();
    stop_tx.send_replace(true);
    timer.await?;
    info!("Node {} stopped", cfg.node_id);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Command::Node {
            id,
            config,
            address,
            http,
            peers,
            election_timeout_min_ms,
            election_timeout_max_ms,
            heartbeat_interval_ms,
            rpc_timeout_ms,
        } => {
            let cfg = node_config(
                id,
                config,
                address,
                http,
                peers,
                election_timeout_min_ms,
                election_timeout_max_ms,
                heartbeat_interval_ms,
                rpc_timeout_ms,
            )?;
            info!(
                "Starting node {} (grpc {}, http {})",
                cfg.node_id, cfg.listen_addr, cfg.http_addr
            );
            run_node(cfg).await?;
        }
        Command::Admin { cmd } => match cmd {
            AdminCmd::Status { http } => {
                println!("{}", http_request(&http, "GET", "/status", None)?);
            }
            AdminCmd::Submit { http, command } => {
                let body = serde_json::json!({ "command": command }).to_string();
                println!(
                    "{}",
                    http_request(&http, "POST", "/client_command", Some(&body))?
                );
            }
            AdminCmd::Kill { http } => {
                println!("{}", http_request(&http, "POST", "/kill", None)?);
            }
            AdminCmd::Metrics { http } => {
                println!("{}", http_request(&http, "GET", "/metrics", None)?);
            }
        },
    }

    Ok(())
}

//! `stratad` command line interface.
//!
//! Parses arguments, merges the optional JSON config file with CLI
//! overrides (CLI wins), and boots the server on a multi-thread runtime.

use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use crate::api;
use crate::cluster::{ClusterConfig, DurabilityLevel, HaServer};
use crate::engine::FileStorageEngine;
use crate::observability::{Logger, Severity};
use crate::replog::SyncMode;
use crate::transport::{SocketFactory, TransportConfig};

#[derive(Debug, Parser)]
#[command(
    name = "stratad",
    about = "Replication server for the strata multi-model database"
)]
struct Args {
    /// Path to a JSON server configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Cluster-unique server name
    #[arg(long)]
    server_name: Option<String>,

    /// Node role: leader or replica
    #[arg(long)]
    role: Option<String>,

    /// Peer protocol bind address
    #[arg(long)]
    listen: Option<String>,

    /// Leader peer address (replicas only)
    #[arg(long)]
    leader: Option<String>,

    /// Data directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Admin HTTP bind address
    #[arg(long)]
    http_listen: Option<String>,
}

/// JSON server configuration file. Every field is optional; CLI flags win.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    server_name: Option<String>,
    role: Option<String>,
    listen_address: Option<String>,
    leader_address: Option<String>,
    data_dir: Option<PathBuf>,
    http_address: Option<String>,
    log_sync: Option<String>,
    retain_min_messages: Option<u64>,
    default_durability: Option<String>,
    quorum_timeout_ms: Option<u64>,
    heartbeat_interval_ms: Option<u64>,
    heartbeat_misses: Option<u32>,
}

/// Parse arguments, build the configuration, and run the server until
/// ctrl-c.
pub fn run() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let file = match &args.config {
        Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
        None => ConfigFile::default(),
    };
    let config = build_cluster_config(&args, &file)?;
    let http_address = config.http_address.clone();

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let storage = Arc::new(FileStorageEngine::open(&config.data_dir)?);
        let factory = Arc::new(SocketFactory::new(TransportConfig::from_env())?);
        let server = Arc::new(HaServer::new(config, storage, factory)?);

        Arc::clone(&server).start().await?;

        if !http_address.is_empty() {
            let admin = Arc::clone(&server);
            let bind = http_address.clone();
            tokio::spawn(async move {
                if let Err(e) = api::serve(&bind, admin).await {
                    Logger::log_stderr(
                        Severity::Error,
                        "ADMIN_API_FAILED",
                        &[("error", &e.to_string())],
                    );
                }
            });
        }

        tokio::signal::ctrl_c().await?;
        server.shutdown().await;
        Ok::<(), Box<dyn Error>>(())
    })
}

fn build_cluster_config(args: &Args, file: &ConfigFile) -> Result<ClusterConfig, Box<dyn Error>> {
    let server_name = args
        .server_name
        .clone()
        .or_else(|| file.server_name.clone())
        .ok_or("server_name is required (flag --server-name or config file)")?;
    let data_dir = args
        .data_dir
        .clone()
        .or_else(|| file.data_dir.clone())
        .unwrap_or_else(|| PathBuf::from("./data"));
    let listen = args
        .listen
        .clone()
        .or_else(|| file.listen_address.clone())
        .unwrap_or_else(|| "0.0.0.0:2424".to_string());
    let role = args
        .role
        .clone()
        .or_else(|| file.role.clone())
        .unwrap_or_else(|| "leader".to_string());

    let mut config = match role.to_ascii_lowercase().as_str() {
        "leader" => ClusterConfig::leader(server_name, data_dir, listen),
        "replica" => {
            let leader = args
                .leader
                .clone()
                .or_else(|| file.leader_address.clone())
                .ok_or("the replica role requires --leader (or leader_address)")?;
            ClusterConfig::replica(server_name, data_dir, listen, leader)
        }
        other => return Err(format!("unknown role: {}", other).into()),
    };

    if let Some(http) = args
        .http_listen
        .clone()
        .or_else(|| file.http_address.clone())
    {
        config.http_address = http;
    }
    if let Some(sync) = &file.log_sync {
        config.log_sync = parse_sync_mode(sync)?;
    }
    if let Some(retain) = file.retain_min_messages {
        config.retain_min_messages = retain;
    }
    if let Some(level) = &file.default_durability {
        config.default_durability = parse_durability(level)?;
    }
    if let Some(ms) = file.quorum_timeout_ms {
        config.quorum_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = file.heartbeat_interval_ms {
        config.heartbeat_interval = Duration::from_millis(ms);
    }
    if let Some(misses) = file.heartbeat_misses {
        config.heartbeat_misses = misses;
    }

    config.validate()?;
    Ok(config)
}

fn parse_sync_mode(value: &str) -> Result<SyncMode, Box<dyn Error>> {
    match value.to_ascii_lowercase().as_str() {
        "no" => Ok(SyncMode::No),
        "no_metadata" | "yes_nometadata" => Ok(SyncMode::NoMetadata),
        "full" | "full_sync" => Ok(SyncMode::Full),
        other => Err(format!("unknown log_sync mode: {}", other).into()),
    }
}

fn parse_durability(value: &str) -> Result<DurabilityLevel, Box<dyn Error>> {
    match value.to_ascii_lowercase().as_str() {
        "none" => Ok(DurabilityLevel::None),
        "leader_only" => Ok(DurabilityLevel::LeaderOnly),
        "quorum" => Ok(DurabilityLevel::Quorum),
        "all" => Ok(DurabilityLevel::All),
        other => Err(format!("unknown durability level: {}", other).into()),
    }
}

//! Master binary

use clap::{Parser, Subcommand};
use shardfs::common::{MasterConfig, RevivalPolicy};
use shardfs::Master;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "shardfs-master")]
#[command(about = "shardfs master: worker liveness, chunk placement and re-replication")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the master server
    Serve {
        /// TOML config file (defaults to $SHARDFS_CONFIG or ./shardfs.toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Bind address for HTTP and WebSocket
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Replication factor
        #[arg(long)]
        replicas: Option<usize>,

        /// Heartbeat window in milliseconds
        #[arg(long)]
        heartbeat_window_ms: Option<u64>,

        /// What to do with a dead worker that heartbeats again
        #[arg(long, value_parser = parse_policy)]
        revival_policy: Option<RevivalPolicy>,
    },
}

fn parse_policy(s: &str) -> Result<RevivalPolicy, String> {
    match s {
        "wipe" => Ok(RevivalPolicy::Wipe),
        "keep" => Ok(RevivalPolicy::Keep),
        other => Err(format!("unknown revival policy {:?} (expected wipe or keep)", other)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            bind,
            replicas,
            heartbeat_window_ms,
            revival_policy,
        } => {
            // File and env first, CLI flags on top
            let mut conf = match config {
                Some(path) => MasterConfig::load_from(path)?,
                None => MasterConfig::load()?,
            };
            if let Some(bind) = bind {
                conf.bind_addr = bind;
            }
            if let Some(replicas) = replicas {
                conf.replication_factor = replicas;
            }
            if let Some(window) = heartbeat_window_ms {
                conf.heartbeat_window_ms = window;
            }
            if let Some(policy) = revival_policy {
                conf.revival_policy = policy;
            }

            Master::new(conf).serve().await?;
        }
    }

    Ok(())
}

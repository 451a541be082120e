//! Configuration for the shardfs master

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::common::{Error, Result};

pub const MB: u64 = 1024 * 1024;

/// Environment variable pointing at an optional TOML config file
pub const CONFIG_PATH_ENV: &str = "SHARDFS_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "shardfs.toml";
const ENV_PREFIX: &str = "SHARDFS";

/// What to do with a worker that heartbeats again after being declared dead
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevivalPolicy {
    /// Send a reset RPC and scrub the worker from every chunk it used to hold
    Wipe,
    /// Mark it alive and keep its prior assignments
    Keep,
}

/// Master configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterConfig {
    /// Bind address for HTTP + WebSocket
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// WebSocket path shared by workers and dashboards
    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    /// Max gap since the last heartbeat before a worker is declared dead
    #[serde(default = "default_heartbeat_window")]
    pub heartbeat_window_ms: u64,

    /// Expected worker heartbeat interval
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,

    /// Background liveness sweep interval
    #[serde(default = "default_heartbeat_interval")]
    pub sweep_interval_ms: u64,

    /// Replication factor
    #[serde(default = "default_replication_factor")]
    pub replication_factor: usize,

    #[serde(default = "default_min_chunk")]
    pub min_chunk_bytes: u64,

    #[serde(default = "default_max_chunk")]
    pub max_chunk_bytes: u64,

    /// Upper bound on the chunk count targeted per file
    #[serde(default = "default_max_chunks")]
    pub max_chunks_per_file: u64,

    /// Re-replication candidate pool size per chunk
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,

    #[serde(default = "default_repair_timeout")]
    pub repair_timeout_ms: u64,

    #[serde(default = "default_reset_timeout")]
    pub reset_timeout_ms: u64,

    #[serde(default = "default_delete_timeout")]
    pub delete_timeout_ms: u64,

    /// Usage samples retained in the ring buffer
    #[serde(default = "default_stats_capacity")]
    pub stats_capacity: usize,

    /// History window sent in `cluster:snapshot`
    #[serde(default = "default_history_window")]
    pub history_window_ms: u64,

    #[serde(default = "default_revival_policy")]
    pub revival_policy: RevivalPolicy,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9000))
}
fn default_ws_path() -> String {
    "/ws".to_string()
}
fn default_heartbeat_window() -> u64 {
    45_000
}
fn default_heartbeat_interval() -> u64 {
    5_000
}
fn default_replication_factor() -> usize {
    2
}
fn default_min_chunk() -> u64 {
    16 * MB
}
fn default_max_chunk() -> u64 {
    64 * MB
}
fn default_max_chunks() -> u64 {
    100
}
fn default_candidate_limit() -> usize {
    10
}
fn default_repair_timeout() -> u64 {
    60_000
}
fn default_reset_timeout() -> u64 {
    10_000
}
fn default_delete_timeout() -> u64 {
    10_000
}
fn default_stats_capacity() -> usize {
    3600
}
fn default_history_window() -> u64 {
    10 * 60 * 1000
}
fn default_revival_policy() -> RevivalPolicy {
    RevivalPolicy::Wipe
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            ws_path: default_ws_path(),
            heartbeat_window_ms: default_heartbeat_window(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            sweep_interval_ms: default_heartbeat_interval(),
            replication_factor: default_replication_factor(),
            min_chunk_bytes: default_min_chunk(),
            max_chunk_bytes: default_max_chunk(),
            max_chunks_per_file: default_max_chunks(),
            candidate_limit: default_candidate_limit(),
            repair_timeout_ms: default_repair_timeout(),
            reset_timeout_ms: default_reset_timeout(),
            delete_timeout_ms: default_delete_timeout(),
            stats_capacity: default_stats_capacity(),
            history_window_ms: default_history_window(),
            revival_policy: default_revival_policy(),
        }
    }
}

impl MasterConfig {
    /// Load from `$SHARDFS_CONFIG` (or `shardfs.toml`) layered under `SHARDFS_*` env vars.
    /// A missing file is not an error.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        Self::load_from(path)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_string_lossy().into_owned();
        let settings = config::Config::builder()
            .add_source(config::File::new(&path, config::FileFormat::Toml).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;
        let conf: MasterConfig = settings.try_deserialize()?;
        conf.validate()?;
        Ok(conf)
    }

    pub fn validate(&self) -> Result<()> {
        if self.replication_factor == 0 {
            return Err(Error::InvalidConfig(
                "replication_factor must be at least 1".into(),
            ));
        }
        if self.min_chunk_bytes == 0 || self.min_chunk_bytes > self.max_chunk_bytes {
            return Err(Error::InvalidConfig(format!(
                "chunk bounds [{}, {}] are invalid",
                self.min_chunk_bytes, self.max_chunk_bytes
            )));
        }
        if self.max_chunks_per_file == 0 {
            return Err(Error::InvalidConfig(
                "max_chunks_per_file must be positive".into(),
            ));
        }
        if self.heartbeat_window_ms == 0 || self.sweep_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "heartbeat window and sweep interval must be positive".into(),
            ));
        }
        if !self.ws_path.starts_with('/') {
            return Err(Error::InvalidConfig(format!(
                "ws_path must start with '/': {:?}",
                self.ws_path
            )));
        }
        Ok(())
    }

    pub fn heartbeat_window(&self) -> Duration {
        Duration::from_millis(self.heartbeat_window_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn repair_timeout(&self) -> Duration {
        Duration::from_millis(self.repair_timeout_ms)
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn delete_timeout(&self) -> Duration {
        Duration::from_millis(self.delete_timeout_ms)
    }
}

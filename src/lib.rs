//! # shardfs
//!
//! Master node of a chunked distributed file store:
//! - Worker liveness from WebSocket heartbeats
//! - Space-aware, round-robin chunk placement with replication
//! - Additive re-replication when workers die
//! - Live cluster snapshots for dashboards
//!
//! The master never touches chunk bytes. Clients stream chunks straight to
//! workers using the plan returned by `/register`.
//!
//! ## Architecture
//!
//! ```text
//!   clients (HTTP)            dashboards (WS)
//!        │                          │
//! ┌──────▼──────────────────────────▼──────┐
//! │                Master                  │
//! │  registry ─ planner ─ mapping ─ stats  │
//! │        └── re-replication ──┘          │
//! └──────┬──────────────┬──────────────┬───┘
//!        │ WS heartbeat │ HTTP RPC     │
//! ┌──────▼─────┐  ┌─────▼──────┐  ┌────▼───────┐
//! │ Worker 1   │  │ Worker 2   │  │ Worker 3   │
//! │ (chunks)   │  │ (chunks)   │  │ (chunks)   │
//! └────────────┘  └────────────┘  └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! shardfs-master serve --bind 0.0.0.0:9000 --replicas 2
//!
//! # Register a file and get its chunk plan
//! curl -X POST localhost:9000/register \
//!   -H 'content-type: application/json' \
//!   -d '{"filename":"movie.mkv","size":734003200}'
//! ```

pub mod common;
pub mod master;
pub mod ops;

// Re-export commonly used types
pub use common::{Error, MasterConfig, Result};
pub use master::{Cluster, ClusterTransport, Master};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Common utilities and types shared across shardfs

pub mod config;
pub mod error;
pub mod metrics;
pub mod tracing_middleware;
pub mod utils;

pub use config::{MasterConfig, RevivalPolicy, MB};
pub use error::{Error, Result};
pub use metrics::METRICS;
pub use utils::{encode_segment, format_bytes, normalize_host, timestamp_now_millis, WorkerStatus};

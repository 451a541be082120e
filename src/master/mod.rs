//! Master node: worker liveness, chunk placement and the file mapping

pub mod cluster;
pub mod http;
pub mod mapping;
pub mod messages;
pub mod planner;
pub mod registry;
pub mod server;
pub mod stats;
pub mod transport;
pub mod worker_client;

pub use cluster::Cluster;
pub use mapping::{ChunkPlan, FilePlan, FileStatus, MappingStore, MemMappingStore};
pub use planner::ChunkPlanner;
pub use registry::{Heartbeat, WorkerRecord, WorkerRegistry};
pub use server::Master;
pub use stats::{ClusterStatsBuffer, UsageSample};
pub use transport::{ClusterTransport, ConnectionKind};
pub use worker_client::{HttpWorkerClient, WorkerClient};

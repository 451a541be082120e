//! Cluster maintenance operations: repair, delete and verification

pub mod delete;
pub mod repair;
pub mod verify;

pub use delete::{delete_file, DeleteOutcome};
pub use repair::{RepairReport, ReplicationEngine};
pub use verify::{verify_cluster, VerifyReport};

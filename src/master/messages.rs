//! WebSocket envelopes exchanged with workers and dashboards
//!
//! Every frame is a JSON object `{ "type": ..., "data": ... }`. Inbound and
//! outbound directions are closed enums, so an unexpected type is rejected at
//! decode time instead of falling through a string match.

use crate::master::mapping::FilePlan;
use crate::master::registry::{Heartbeat, WorkerRecord};
use crate::master::stats::UsageSample;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const WORKER_HEARTBEAT: &str = "worker:heartbeat";
pub const DASHBOARD_SUBSCRIBE: &str = "dashboard:subscribe";
pub const GET_WORKERS: &str = "get:workers";

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    WorkerHeartbeat(Heartbeat),
    DashboardSubscribe,
    GetWorkers,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unknown message type: {0}")]
    UnknownType(String),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl Inbound {
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let envelope: Envelope = serde_json::from_str(text)?;
        match envelope.kind.as_str() {
            WORKER_HEARTBEAT => Ok(Inbound::WorkerHeartbeat(serde_json::from_value(
                envelope.data,
            )?)),
            DASHBOARD_SUBSCRIBE => Ok(Inbound::DashboardSubscribe),
            GET_WORKERS => Ok(Inbound::GetWorkers),
            _ => Err(DecodeError::UnknownType(envelope.kind)),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Inbound::WorkerHeartbeat(_) => WORKER_HEARTBEAT,
            Inbound::DashboardSubscribe => DASHBOARD_SUBSCRIBE,
            Inbound::GetWorkers => GET_WORKERS,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum Outbound {
    #[serde(rename = "master:info")]
    MasterInfo { time: i64, files: usize },

    #[serde(rename = "cluster:snapshot")]
    ClusterSnapshot {
        workers: Vec<WorkerRecord>,
        files: Vec<FilePlan>,
        history: Vec<UsageSample>,
    },

    #[serde(rename = "cluster:update")]
    ClusterUpdate {
        workers: Vec<WorkerRecord>,
        files: Vec<FilePlan>,
    },

    #[serde(rename = "workers:list")]
    WorkersList { workers: Vec<WorkerRecord> },
}

impl Outbound {
    pub fn kind(&self) -> &'static str {
        match self {
            Outbound::MasterInfo { .. } => "master:info",
            Outbound::ClusterSnapshot { .. } => "cluster:snapshot",
            Outbound::ClusterUpdate { .. } => "cluster:update",
            Outbound::WorkersList { .. } => "workers:list",
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

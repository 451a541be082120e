//! Shared fixtures for integration tests

#![allow(dead_code)]

use futures_util::future::{BoxFuture, FutureExt};
use shardfs::common::{Error, MasterConfig, Result};
use shardfs::master::mapping::{ChunkPlan, FilePlan, FileStatus};
use shardfs::master::registry::Heartbeat;
use shardfs::master::worker_client::{
    RereplicateRequest, RereplicateResponse, TargetResult, WorkerClient,
};
use shardfs::master::Cluster;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Rereplicate {
        host: String,
        chunk_id: String,
        targets: Vec<String>,
    },
    Reset {
        host: String,
    },
    DeleteChunk {
        host: String,
        chunk_id: String,
    },
}

/// How the fake answers `rereplicate`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairMode {
    ConfirmAll,
    /// Only the first target receives the chunk
    ConfirmFirst,
    Fail,
}

/// Records every worker RPC and answers from configuration
pub struct FakeWorkerClient {
    calls: Mutex<Vec<Call>>,
    repair_mode: Mutex<RepairMode>,
    failing_hosts: Mutex<HashSet<String>>,
    reset_gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeWorkerClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            repair_mode: Mutex::new(RepairMode::ConfirmAll),
            failing_hosts: Mutex::new(HashSet::new()),
            reset_gate: Mutex::new(None),
        })
    }

    pub fn set_repair_mode(&self, mode: RepairMode) {
        *self.repair_mode.lock().unwrap() = mode;
    }

    /// `reset` and `delete_chunk` against this host fail
    pub fn fail_host(&self, host: &str) {
        self.failing_hosts.lock().unwrap().insert(host.to_string());
    }

    /// Every `reset` after this blocks until the returned gate is notified
    pub fn hold_resets(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.reset_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn rereplicate_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Rereplicate { .. }))
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn host_fails(&self, host: &str) -> bool {
        self.failing_hosts.lock().unwrap().contains(host)
    }
}

impl WorkerClient for FakeWorkerClient {
    fn rereplicate<'a>(
        &'a self,
        host: &'a str,
        request: &'a RereplicateRequest,
    ) -> BoxFuture<'a, Result<RereplicateResponse>> {
        async move {
            self.record(Call::Rereplicate {
                host: host.to_string(),
                chunk_id: request.chunk_id.clone(),
                targets: request.targets.clone(),
            });
            let mode = *self.repair_mode.lock().unwrap();
            let confirmed = match mode {
                RepairMode::Fail => return Err(Error::Timeout("rereplicate".into())),
                RepairMode::ConfirmAll => request.targets.len(),
                RepairMode::ConfirmFirst => 1.min(request.targets.len()),
            };
            let (ok, failed) = request.targets.split_at(confirmed);
            Ok(RereplicateResponse {
                replicated: ok
                    .iter()
                    .map(|t| TargetResult {
                        target: t.clone(),
                        error: None,
                    })
                    .collect(),
                failed: failed
                    .iter()
                    .map(|t| TargetResult {
                        target: t.clone(),
                        error: Some("connection refused".into()),
                    })
                    .collect(),
                summary: serde_json::Value::Null,
            })
        }
        .boxed()
    }

    fn reset<'a>(&'a self, host: &'a str) -> BoxFuture<'a, Result<()>> {
        async move {
            self.record(Call::Reset {
                host: host.to_string(),
            });
            let gate = self.reset_gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            if self.host_fails(host) {
                return Err(Error::Http("reset refused".into()));
            }
            Ok(())
        }
        .boxed()
    }

    fn delete_chunk<'a>(&'a self, host: &'a str, chunk_id: &'a str) -> BoxFuture<'a, Result<()>> {
        async move {
            self.record(Call::DeleteChunk {
                host: host.to_string(),
                chunk_id: chunk_id.to_string(),
            });
            if self.host_fails(host) {
                return Err(Error::Http("delete refused".into()));
            }
            Ok(())
        }
        .boxed()
    }
}

pub const MB: u64 = 1024 * 1024;

pub fn host(id: &str) -> String {
    format!("http://{}:8000", id)
}

pub fn new_cluster(config: MasterConfig, client: Arc<FakeWorkerClient>) -> Arc<Cluster> {
    Arc::new(Cluster::in_memory(config, client))
}

/// Heartbeat straight into the registry, bypassing the transport
pub async fn heartbeat(cluster: &Cluster, id: &str, free_bytes: u64, now: Instant) {
    cluster
        .registry()
        .write()
        .await
        .upsert_heartbeat(Heartbeat::new(id, host(id), free_bytes), now)
        .unwrap();
}

/// Declare workers dead by sweeping far past the window, after refreshing the survivors
pub async fn kill(cluster: &Cluster, dead: &[&str], survivors: &[(&str, u64)]) -> Vec<String> {
    let later = Instant::now() + cluster.config().heartbeat_window() * 2;
    for (id, free) in survivors {
        heartbeat(cluster, id, *free, later).await;
    }
    let swept = cluster.registry().write().await.sweep_expired(later);
    let mut expected: Vec<String> = dead.iter().map(|d| d.to_string()).collect();
    expected.sort();
    assert_eq!(swept, expected);
    swept
}

/// Hand-built single-chunk plan
pub fn single_chunk_plan(filename: &str, chunk_id: &str, workers: &[&str]) -> FilePlan {
    FilePlan {
        filename: filename.to_string(),
        size: MB,
        chunk_size: MB,
        chunks: vec![ChunkPlan {
            id: chunk_id.to_string(),
            size: MB,
            index: 0,
            workers: workers.iter().map(|w| w.to_string()).collect(),
        }],
        created_at: 0,
        status: FileStatus::Active,
    }
}

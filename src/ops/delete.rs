//! File deletion workflow
//!
//! `active → deleting → (deleted | active)`. Chunks held by workers that are
//! dead or unknown are skipped; their bytes are orphaned until the worker is
//! wiped on revival. When some holders confirmed and others failed, the plan
//! goes back to `active` so the delete can be retried. When none confirmed,
//! the plan is tombstoned anyway and the bytes are left to the revival wipe.

use crate::common::{Result, METRICS};
use crate::master::cluster::Cluster;
use crate::master::mapping::FileStatus;
use futures_util::future::join_all;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkDeleteFailure {
    pub worker_id: String,
    pub chunk_id: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOutcome {
    pub filename: String,
    /// Replicas confirmed deleted
    pub deleted: usize,
    /// Replicas on dead or unknown workers
    pub skipped: usize,
    pub failed: Vec<ChunkDeleteFailure>,
    /// The plan was turned into a `deleted` tombstone
    pub mapping_removed: bool,
}

impl DeleteOutcome {
    /// Some holders confirmed and some failed
    pub fn is_partial(&self) -> bool {
        self.deleted > 0 && !self.failed.is_empty()
    }
}

pub async fn delete_file(cluster: &Cluster, filename: &str) -> Result<DeleteOutcome> {
    let plan = cluster.mapping().mark_deleting(filename)?;
    let hosts = cluster.alive_hosts().await;

    let mut skipped = 0;
    let mut jobs = Vec::new();
    for chunk in &plan.chunks {
        for worker in &chunk.workers {
            match hosts.get(worker) {
                Some(host) => jobs.push((worker.as_str(), chunk.id.as_str(), host.as_str())),
                None => {
                    tracing::debug!(worker = %worker, chunk = %chunk.id, "holder not alive, skipping");
                    skipped += 1;
                }
            }
        }
    }

    let client = cluster.client();
    let results = join_all(jobs.iter().map(|(_, chunk_id, host)| client.delete_chunk(host, chunk_id))).await;

    let mut deleted = 0;
    let mut failed = Vec::new();
    for ((worker, chunk_id, _), result) in jobs.iter().zip(results) {
        match result {
            Ok(()) => deleted += 1,
            Err(e) => {
                tracing::warn!(filename, worker = %worker, chunk = %chunk_id, error = %e, "chunk delete failed");
                failed.push(ChunkDeleteFailure {
                    worker_id: worker.to_string(),
                    chunk_id: chunk_id.to_string(),
                    error: e.to_string(),
                });
            }
        }
    }

    let retry = deleted > 0 && !failed.is_empty();
    let mapping_removed = if retry {
        cluster.mapping().set_status(filename, FileStatus::Active)?;
        false
    } else {
        if !failed.is_empty() {
            tracing::warn!(filename, failed = failed.len(), "no holder confirmed the delete, orphaning replicas");
        }
        // false when the name was re-registered while the RPCs ran
        let removed = cluster.mapping().mark_deleted(filename)?;
        if removed {
            METRICS.files_deleted.inc();
        }
        removed
    };

    tracing::info!(
        filename,
        deleted,
        skipped,
        failed = failed.len(),
        mapping_removed,
        "delete finished"
    );

    Ok(DeleteOutcome {
        filename: filename.to_string(),
        deleted,
        skipped,
        failed,
        mapping_removed,
    })
}

//! Re-replication of chunks that lost replicas to dead workers
//!
//! Repair is additive only: dead ids stay on the chunk, and new holders are
//! appended once a surviving replica confirms it pushed the bytes to them.
//! A partial repair is not retried inside the pass; the next dead batch that
//! still leaves a deficit picks it up.

use crate::common::{normalize_host, METRICS};
use crate::master::cluster::Cluster;
use crate::master::mapping::{ChunkPlan, FileStatus};
use crate::master::worker_client::RereplicateRequest;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

/// Outcome of one repair pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    /// Chunks that had at least one replica in the dead batch
    pub chunks_checked: usize,
    pub chunks_satisfied: usize,
    pub unrecoverable: usize,
    pub no_candidates: usize,
    pub repair_requests: usize,
    pub failed_requests: usize,
    /// Requests that confirmed fewer targets than the deficit
    pub partial: usize,
    pub replicas_added: usize,
}

impl RepairReport {
    pub fn changed_mapping(&self) -> bool {
        self.replicas_added > 0
    }
}

/// A worker that can receive a new replica
#[derive(Debug, Clone)]
struct Candidate {
    id: String,
    host: String,
}

pub struct ReplicationEngine {
    cluster: Arc<Cluster>,
    /// One pass at a time, so two results for the same chunk never interleave
    pass_lock: Mutex<()>,
}

impl ReplicationEngine {
    pub fn new(cluster: Arc<Cluster>) -> Self {
        Self {
            cluster,
            pass_lock: Mutex::new(()),
        }
    }

    /// Restore the replica count of every chunk touched by `dead`.
    pub async fn handle_dead_workers(&self, dead: &[String]) -> RepairReport {
        let _pass = self.pass_lock.lock().await;
        let mut report = RepairReport::default();
        if dead.is_empty() {
            return report;
        }
        let dead: HashSet<&str> = dead.iter().map(String::as_str).collect();

        // Snapshot once per pass
        let (hosts, pool) = {
            let registry = self.cluster.registry().read().await;
            // a worker being wiped neither serves as a source nor receives replicas
            let mut alive = registry.get_placeable();
            alive.sort_by(|a, b| b.free_bytes.cmp(&a.free_bytes).then_with(|| a.id.cmp(&b.id)));
            let hosts: HashMap<String, String> =
                alive.iter().map(|w| (w.id.clone(), w.host.clone())).collect();
            let pool: Vec<Candidate> = alive
                .into_iter()
                .map(|w| Candidate { id: w.id, host: w.host })
                .collect();
            (hosts, pool)
        };

        let plans = match self.cluster.files() {
            Ok(plans) => plans,
            Err(e) => {
                tracing::error!(error = %e, "repair pass could not list files");
                return report;
            }
        };

        let replicas = self.cluster.replication_factor();
        let limit = self.cluster.config().candidate_limit;

        for plan in plans.iter().filter(|p| p.status == FileStatus::Active) {
            for chunk in &plan.chunks {
                if !chunk.workers.iter().any(|w| dead.contains(w.as_str())) {
                    continue;
                }
                report.chunks_checked += 1;
                self.repair_chunk(&plan.filename, chunk, replicas, limit, &hosts, &pool, &mut report)
                    .await;
            }
        }

        tracing::info!(
            dead = dead.len(),
            checked = report.chunks_checked,
            requests = report.repair_requests,
            failed = report.failed_requests,
            added = report.replicas_added,
            "repair pass finished"
        );
        report
    }

    #[allow(clippy::too_many_arguments)]
    async fn repair_chunk(
        &self,
        filename: &str,
        chunk: &ChunkPlan,
        replicas: usize,
        limit: usize,
        hosts: &HashMap<String, String>,
        pool: &[Candidate],
        report: &mut RepairReport,
    ) {
        let alive_replicas: Vec<&String> = chunk
            .workers
            .iter()
            .filter(|w| hosts.contains_key(w.as_str()))
            .collect();

        let deficit = replicas.saturating_sub(alive_replicas.len());
        if deficit == 0 {
            tracing::debug!(chunk = %chunk.id, "replication already satisfied");
            report.chunks_satisfied += 1;
            return;
        }

        let Some(source) = alive_replicas.first() else {
            tracing::warn!(
                filename,
                chunk = %chunk.id,
                "no surviving replica, chunk needs manual recovery"
            );
            report.unrecoverable += 1;
            return;
        };
        let Some(source_host) = hosts.get(source.as_str()) else {
            return;
        };

        let targets: Vec<&Candidate> = pool
            .iter()
            .filter(|c| c.id != **source && !chunk.workers.contains(&c.id))
            .take(limit)
            .take(deficit)
            .collect();
        if targets.is_empty() {
            tracing::warn!(chunk = %chunk.id, deficit, "no candidate workers for re-replication");
            report.no_candidates += 1;
            return;
        }

        // normalized target URL → worker id
        let by_url: HashMap<String, &str> = targets
            .iter()
            .map(|c| (normalize_host(&c.host), c.id.as_str()))
            .collect();
        let request = RereplicateRequest {
            chunk_id: chunk.id.clone(),
            targets: targets.iter().map(|c| normalize_host(&c.host)).collect(),
        };

        tracing::info!(
            chunk = %chunk.id,
            source = %source,
            targets = ?request.targets,
            "requesting re-replication"
        );
        report.repair_requests += 1;
        METRICS.repair_requests.inc();

        let started = Instant::now();
        let result = self.cluster.client().rereplicate(source_host, &request).await;
        METRICS.repair_latency.observe_duration(started.elapsed());

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(
                    chunk = %chunk.id,
                    source = %source,
                    error = %e,
                    retryable = e.is_retryable(),
                    "re-replication failed"
                );
                report.failed_requests += 1;
                METRICS.repair_failures.inc();
                return;
            }
        };

        let confirmed: Vec<String> = response
            .confirmed_targets()
            .iter()
            .filter_map(|url| by_url.get(url).map(|id| id.to_string()))
            .collect();
        for failed in &response.failed {
            tracing::warn!(
                chunk = %chunk.id,
                target = %failed.target,
                error = failed.error.as_deref().unwrap_or("unknown"),
                "target did not receive replica"
            );
        }
        if confirmed.len() < deficit {
            report.partial += 1;
        }
        if confirmed.is_empty() {
            return;
        }

        match self
            .cluster
            .mapping()
            .append_replicas(filename, &chunk.id, &confirmed)
        {
            Ok(appended) => {
                report.replicas_added += appended.len();
                METRICS.replicas_added.add(appended.len() as u64);
                tracing::info!(chunk = %chunk.id, added = ?appended, "replicas appended");
            }
            // The file may have been deleted or replaced while the RPC was in flight
            Err(e) => {
                tracing::warn!(filename, chunk = %chunk.id, error = %e, "dropping repair result");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_changed_mapping() {
        let mut report = RepairReport::default();
        assert!(!report.changed_mapping());
        report.replicas_added = 1;
        assert!(report.changed_mapping());
    }
}

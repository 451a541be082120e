//! Replication health report

use crate::common::Result;
use crate::master::cluster::Cluster;
use crate::master::mapping::FilePlan;
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileHealth {
    pub filename: String,
    pub chunks: usize,
    pub healthy: usize,
    pub under_replicated: usize,
    pub unrecoverable: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyReport {
    pub replication_factor: usize,
    pub alive_workers: usize,
    pub total_files: usize,
    pub total_chunks: usize,
    pub healthy: usize,
    pub under_replicated: usize,
    pub unrecoverable: usize,
    pub files: Vec<FileHealth>,
}

pub async fn verify_cluster(cluster: &Cluster) -> Result<VerifyReport> {
    let alive = cluster.alive_ids().await;
    let plans = cluster.files()?;
    let report = build_report(&plans, &alive, cluster.replication_factor());

    tracing::info!(
        files = report.total_files,
        chunks = report.total_chunks,
        under_replicated = report.under_replicated,
        unrecoverable = report.unrecoverable,
        "verification finished"
    );
    Ok(report)
}

/// Classify every chunk by its alive replica count against `replicas`.
pub fn build_report(plans: &[FilePlan], alive: &HashSet<String>, replicas: usize) -> VerifyReport {
    let mut report = VerifyReport {
        replication_factor: replicas,
        alive_workers: alive.len(),
        total_files: plans.len(),
        ..Default::default()
    };

    for plan in plans {
        let mut health = FileHealth {
            filename: plan.filename.clone(),
            chunks: plan.chunks.len(),
            ..Default::default()
        };
        for chunk in &plan.chunks {
            match chunk.workers.iter().filter(|w| alive.contains(*w)).count() {
                0 => health.unrecoverable += 1,
                n if n < replicas => health.under_replicated += 1,
                _ => health.healthy += 1,
            }
        }
        report.total_chunks += health.chunks;
        report.healthy += health.healthy;
        report.under_replicated += health.under_replicated;
        report.unrecoverable += health.unrecoverable;
        report.files.push(health);
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::master::mapping::{ChunkPlan, FileStatus};

    fn chunk(id: &str, workers: &[&str]) -> ChunkPlan {
        ChunkPlan {
            id: id.into(),
            size: 1,
            index: 0,
            workers: workers.iter().map(|w| w.to_string()).collect(),
        }
    }

    #[test]
    fn test_classifies_chunks() {
        let plan = FilePlan {
            filename: "a.bin".into(),
            size: 3,
            chunk_size: 1,
            chunks: vec![
                chunk("c0", &["w1", "w2"]),
                chunk("c1", &["w1", "w3"]),
                chunk("c2", &["w3", "w4"]),
            ],
            created_at: 0,
            status: FileStatus::Active,
        };
        let alive: HashSet<String> = ["w1".to_string(), "w2".to_string()].into();

        let report = build_report(&[plan], &alive, 2);
        assert_eq!(report.total_chunks, 3);
        assert_eq!(report.healthy, 1);
        assert_eq!(report.under_replicated, 1);
        assert_eq!(report.unrecoverable, 1);
        assert_eq!(report.files[0].filename, "a.bin");
    }

    #[test]
    fn test_empty_cluster() {
        let report = build_report(&[], &HashSet::new(), 2);
        assert_eq!(report, VerifyReport {
            replication_factor: 2,
            ..Default::default()
        });
    }
}

//! Shared master state
//!
//! One [`Cluster`] is built at startup and handed (behind an `Arc`) to the
//! HTTP routes, the WebSocket transport and the repair engine. Lock order is
//! always registry before mapping; no RPC is ever awaited while either is held.

use crate::common::{timestamp_now_millis, Error, MasterConfig, Result, METRICS};
use crate::master::mapping::{FilePlan, FileStatus, MappingStore, MemMappingStore};
use crate::master::planner::ChunkPlanner;
use crate::master::registry::{WorkerRecord, WorkerRegistry};
use crate::master::stats::{ClusterStatsBuffer, UsageSample};
use crate::master::worker_client::WorkerClient;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

pub struct Cluster {
    config: MasterConfig,
    registry: RwLock<WorkerRegistry>,
    mapping: Arc<dyn MappingStore>,
    planner: ChunkPlanner,
    stats: Mutex<ClusterStatsBuffer>,
    client: Arc<dyn WorkerClient>,
}

impl Cluster {
    pub fn new(
        config: MasterConfig,
        mapping: Arc<dyn MappingStore>,
        client: Arc<dyn WorkerClient>,
    ) -> Self {
        Self {
            registry: RwLock::new(WorkerRegistry::new(config.heartbeat_window())),
            planner: ChunkPlanner::new(&config),
            stats: Mutex::new(ClusterStatsBuffer::new(config.stats_capacity)),
            config,
            mapping,
            client,
        }
    }

    /// Cluster backed by the in-memory mapping store
    pub fn in_memory(config: MasterConfig, client: Arc<dyn WorkerClient>) -> Self {
        Self::new(config, Arc::new(MemMappingStore::new()), client)
    }

    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    pub fn registry(&self) -> &RwLock<WorkerRegistry> {
        &self.registry
    }

    pub fn mapping(&self) -> &dyn MappingStore {
        self.mapping.as_ref()
    }

    pub fn client(&self) -> &dyn WorkerClient {
        self.client.as_ref()
    }

    pub fn replication_factor(&self) -> usize {
        self.config.replication_factor
    }

    /// Plan and persist a file against one snapshot of placeable workers.
    pub async fn register_file(&self, filename: &str, size: u64) -> Result<FilePlan> {
        let placeable = self.registry.read().await.get_placeable();
        let plan = self.planner.plan_file(
            &placeable,
            self.mapping(),
            filename,
            size,
            self.config.replication_factor,
        )?;
        METRICS.files_registered.inc();
        Ok(plan)
    }

    pub async fn workers(&self) -> Vec<WorkerRecord> {
        self.registry.read().await.get_all()
    }

    pub async fn alive_ids(&self) -> HashSet<String> {
        self.registry
            .read()
            .await
            .get_alive()
            .into_iter()
            .map(|w| w.id)
            .collect()
    }

    /// id → host of every alive worker
    pub async fn alive_hosts(&self) -> HashMap<String, String> {
        self.registry
            .read()
            .await
            .get_alive()
            .into_iter()
            .map(|w| (w.id, w.host))
            .collect()
    }

    /// Drop a worker from the registry. Chunk assignments are untouched.
    pub async fn remove_worker(&self, worker_id: &str) -> Result<WorkerRecord> {
        self.registry
            .write()
            .await
            .remove(worker_id)
            .ok_or_else(|| Error::NotFound(format!("worker {}", worker_id)))
    }

    /// Live plans; tombstones are left out
    pub fn files(&self) -> Result<Vec<FilePlan>> {
        Ok(self
            .mapping
            .list()?
            .into_iter()
            .filter(|p| p.status != FileStatus::Deleted)
            .collect())
    }

    /// Compute and store a usage sample from the current mapping.
    pub async fn record_usage_sample(&self) -> Result<UsageSample> {
        let sample = {
            let registry = self.registry.read().await;
            let alive: HashSet<String> = registry.get_alive().into_iter().map(|w| w.id).collect();
            let plans = self.files()?;
            UsageSample::compute(timestamp_now_millis(), &plans, &alive)
        };
        self.stats.lock().await.add_sample(sample);
        Ok(sample)
    }

    /// Samples inside the configured history window
    pub async fn history(&self) -> Vec<UsageSample> {
        self.stats
            .lock()
            .await
            .recent(self.config.history_window_ms, timestamp_now_millis())
    }

    /// Ask a revived worker to wipe its disk, then forget every replica it
    /// used to hold. The caller must have called `begin_wipe` for the worker
    /// in the same registry write that revived it, so no plan made since can
    /// list it. The mapping is left alone if the reset fails.
    pub async fn wipe_revived_worker(&self, worker_id: &str, host: &str) -> Result<usize> {
        let reset = self.client.reset(host).await;

        let mut registry = self.registry.write().await;
        let result = match reset {
            Ok(()) => self.mapping.remove_worker_from_all_chunks(worker_id),
            Err(e) => {
                tracing::warn!(worker = %worker_id, host, error = %e, "reset of revived worker failed");
                Err(e)
            }
        };
        registry.finish_wipe(worker_id);
        drop(registry);

        let removed = result?;
        tracing::info!(worker = %worker_id, replicas_removed = removed, "revived worker wiped");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::MB;
    use crate::master::registry::Heartbeat;
    use crate::master::worker_client::{RereplicateRequest, RereplicateResponse};
    use futures_util::future::{BoxFuture, FutureExt};
    use tokio::time::Instant;

    /// Client whose reset always fails and which must never be asked to repair
    struct RefusingClient;

    impl WorkerClient for RefusingClient {
        fn rereplicate<'a>(
            &'a self,
            _host: &'a str,
            _request: &'a RereplicateRequest,
        ) -> BoxFuture<'a, Result<RereplicateResponse>> {
            async { Err(Error::Internal("unexpected rereplicate".into())) }.boxed()
        }

        fn reset<'a>(&'a self, _host: &'a str) -> BoxFuture<'a, Result<()>> {
            async { Err(Error::Http("connection refused".into())) }.boxed()
        }

        fn delete_chunk<'a>(&'a self, _host: &'a str, _chunk_id: &'a str) -> BoxFuture<'a, Result<()>> {
            async { Ok(()) }.boxed()
        }
    }

    async fn cluster_with(ids: &[&str]) -> Cluster {
        let cluster = Cluster::in_memory(MasterConfig::default(), Arc::new(RefusingClient));
        let now = Instant::now();
        for id in ids {
            cluster
                .registry()
                .write()
                .await
                .upsert_heartbeat(Heartbeat::new(*id, format!("{}:8000", id), 500 * MB), now)
                .unwrap();
        }
        cluster
    }

    #[tokio::test]
    async fn test_register_file_persists_plan() {
        let cluster = cluster_with(&["w1", "w2", "w3"]).await;
        let plan = cluster.register_file("a.bin", 40 * MB).await.unwrap();
        assert!(plan.chunks.iter().all(|c| c.workers.len() == 2));
        assert_eq!(cluster.mapping().get("a.bin").unwrap(), Some(plan));
    }

    #[tokio::test]
    async fn test_register_needs_enough_workers() {
        let cluster = cluster_with(&["w1"]).await;
        assert!(matches!(
            cluster.register_file("a.bin", MB).await,
            Err(Error::InsufficientWorkers { needed: 2, available: 1 })
        ));
        assert!(cluster.files().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_usage_sample_and_history() {
        let cluster = cluster_with(&["w1", "w2"]).await;
        cluster.register_file("a.bin", 10 * MB).await.unwrap();

        let sample = cluster.record_usage_sample().await.unwrap();
        assert_eq!(sample.logical, 10 * MB);
        assert_eq!(sample.physical, 20 * MB);
        assert_eq!(cluster.history().await, vec![sample]);
    }

    #[tokio::test]
    async fn test_failed_reset_keeps_assignments() {
        let cluster = cluster_with(&["w1", "w2"]).await;
        cluster.register_file("a.bin", MB).await.unwrap();

        assert!(cluster.wipe_revived_worker("w1", "w1:8000").await.is_err());
        let plan = cluster.mapping().get("a.bin").unwrap().unwrap();
        assert!(plan.chunks[0].workers.contains(&"w1".to_string()));
    }
}

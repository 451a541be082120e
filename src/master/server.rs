//! Master server bootstrap

use crate::common::{MasterConfig, Result};
use crate::master::cluster::Cluster;
use crate::master::http::{create_router, MasterState};
use crate::master::transport::{spawn_liveness_sweeper, ClusterTransport};
use crate::master::worker_client::HttpWorkerClient;
use std::sync::Arc;

pub struct Master {
    config: MasterConfig,
}

impl Master {
    pub fn new(config: MasterConfig) -> Self {
        Self { config }
    }

    pub async fn serve(self) -> Result<()> {
        self.config.validate()?;

        tracing::info!("Starting shardfs master");
        tracing::info!("  HTTP API: {}", self.config.bind_addr);
        tracing::info!("  WebSocket: {}", self.config.ws_path);
        tracing::info!("  Replicas: {}", self.config.replication_factor);
        tracing::info!(
            "  Heartbeat window: {}ms (workers every {}ms, sweep every {}ms)",
            self.config.heartbeat_window_ms,
            self.config.heartbeat_interval_ms,
            self.config.sweep_interval_ms
        );
        tracing::info!("  Revival policy: {:?}", self.config.revival_policy);

        let client = Arc::new(HttpWorkerClient::new(&self.config)?);
        let cluster = Arc::new(Cluster::in_memory(self.config.clone(), client));
        let transport = ClusterTransport::new(cluster);

        let sweeper = spawn_liveness_sweeper(Arc::clone(&transport), self.config.sweep_interval());
        let router = create_router(MasterState::new(transport));

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!("✓ Master ready");

        let result = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        sweeper.abort();
        if let Err(e) = result {
            tracing::error!("HTTP server error: {}", e);
            return Err(e.into());
        }
        tracing::info!("Master stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

//! WebSocket transport for workers and dashboards
//!
//! Every socket starts unclassified. The first `worker:heartbeat` binds it to
//! that worker id; the first `dashboard:subscribe` makes it a dashboard. The
//! binding is sticky for the lifetime of the socket and forgotten on close.
//!
//! Outgoing frames go through a bounded queue per connection, so a broadcast
//! never waits on a slow socket and never holds a store lock. A frame that
//! finds the queue full is dropped; every `cluster:update` carries the whole
//! state, so a dashboard that catches up sees the latest view again.

use crate::common::{format_bytes, timestamp_now_millis, Error, Result, RevivalPolicy, METRICS};
use crate::master::cluster::Cluster;
use crate::master::messages::{Inbound, Outbound};
use crate::master::registry::Heartbeat;
use crate::ops::repair::{RepairReport, ReplicationEngine};
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

pub type ConnId = u64;

/// Frames queued per connection before new ones are dropped
pub const OUTBOUND_QUEUE: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionKind {
    Unclassified,
    Worker(String),
    Dashboard,
}

struct Connection {
    kind: ConnectionKind,
    tx: mpsc::Sender<String>,
}

/// Background work started by one heartbeat. Tests await the handles; the
/// socket loop drops them and lets the tasks run detached.
#[derive(Debug, Default)]
pub struct HeartbeatEffects {
    pub accepted: bool,
    pub newly_dead: Vec<String>,
    pub repair: Option<JoinHandle<RepairReport>>,
    pub revival: Option<JoinHandle<()>>,
}

pub struct ClusterTransport {
    cluster: Arc<Cluster>,
    repair: ReplicationEngine,
    connections: Mutex<HashMap<ConnId, Connection>>,
    next_id: AtomicU64,
}

impl ClusterTransport {
    pub fn new(cluster: Arc<Cluster>) -> Arc<Self> {
        Arc::new(Self {
            repair: ReplicationEngine::new(Arc::clone(&cluster)),
            cluster,
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    /// Register a new connection and greet it with `master:info`. Frames for
    /// the socket arrive on the returned receiver.
    pub async fn connect(&self) -> (ConnId, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.connections.lock().await.insert(
            id,
            Connection {
                kind: ConnectionKind::Unclassified,
                tx,
            },
        );
        tracing::debug!(conn = id, "connection opened");

        let files = match self.cluster.files() {
            Ok(files) => files.len(),
            Err(e) => {
                tracing::warn!(error = %e, "could not count files for master:info");
                0
            }
        };
        let info = Outbound::MasterInfo {
            time: timestamp_now_millis(),
            files,
        };
        if let Err(e) = self.send(id, &info).await {
            tracing::warn!(conn = id, error = %e, "failed to send master:info");
        }
        (id, rx)
    }

    pub async fn disconnect(&self, conn: ConnId) {
        if let Some(c) = self.connections.lock().await.remove(&conn) {
            tracing::debug!(conn, kind = ?c.kind, "connection closed");
        }
    }

    pub async fn connection_kind(&self, conn: ConnId) -> Option<ConnectionKind> {
        self.connections
            .lock()
            .await
            .get(&conn)
            .map(|c| c.kind.clone())
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// Decode and dispatch one text frame. Undecodable frames are logged and
    /// dropped; the connection stays open.
    pub async fn handle_text(self: &Arc<Self>, conn: ConnId, text: &str) -> Option<HeartbeatEffects> {
        let msg = match Inbound::decode(text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(conn, error = %e, "ignoring websocket message");
                METRICS.ws_messages_dropped.inc();
                return None;
            }
        };

        let kind = msg.kind();
        match self.handle_message(conn, msg).await {
            Ok(effects) => effects,
            Err(e) => {
                tracing::warn!(conn, kind, error = %e, "websocket message rejected");
                METRICS.ws_messages_dropped.inc();
                None
            }
        }
    }

    pub async fn handle_message(
        self: &Arc<Self>,
        conn: ConnId,
        msg: Inbound,
    ) -> Result<Option<HeartbeatEffects>> {
        match msg {
            Inbound::WorkerHeartbeat(hb) => self.process_heartbeat(conn, hb).await.map(Some),
            Inbound::DashboardSubscribe => {
                self.subscribe_dashboard(conn).await?;
                Ok(None)
            }
            Inbound::GetWorkers => {
                let workers = self.cluster.workers().await;
                self.send(conn, &Outbound::WorkersList { workers }).await?;
                Ok(None)
            }
        }
    }

    pub async fn process_heartbeat(
        self: &Arc<Self>,
        conn: ConnId,
        hb: Heartbeat,
    ) -> Result<HeartbeatEffects> {
        if !self.may_heartbeat(conn, &hb.id).await {
            return Ok(HeartbeatEffects::default());
        }

        METRICS.heartbeats.inc();
        let now = Instant::now();
        let (outcome, newly_dead) = {
            let mut registry = self.cluster.registry().write().await;
            let outcome = registry.upsert_heartbeat(hb, now)?;
            if outcome.revived && self.cluster.config().revival_policy == RevivalPolicy::Wipe {
                registry.begin_wipe(&outcome.record.id);
            }
            let dead = registry.sweep_expired(now);
            (outcome, dead)
        };
        self.bind_worker(conn, &outcome.record.id).await;

        if outcome.is_new {
            tracing::info!(
                worker = %outcome.record.id,
                host = %outcome.record.host,
                free = %format_bytes(outcome.record.free_bytes),
                "worker joined"
            );
        }

        let revival = if outcome.revived {
            METRICS.workers_revived.inc();
            tracing::info!(worker = %outcome.record.id, policy = ?self.cluster.config().revival_policy, "worker revived");
            match self.cluster.config().revival_policy {
                RevivalPolicy::Wipe => {
                    let transport = Arc::clone(self);
                    let id = outcome.record.id.clone();
                    let host = outcome.record.host.clone();
                    Some(tokio::spawn(async move {
                        if transport.cluster.wipe_revived_worker(&id, &host).await.is_ok() {
                            transport.broadcast_update().await;
                        }
                    }))
                }
                RevivalPolicy::Keep => None,
            }
        } else {
            None
        };

        let repair = self.spawn_repair(newly_dead.clone());

        if let Err(e) = self.cluster.record_usage_sample().await {
            tracing::warn!(error = %e, "failed to record usage sample");
        }
        self.broadcast_update().await;

        Ok(HeartbeatEffects {
            accepted: true,
            newly_dead,
            repair,
            revival,
        })
    }

    /// Liveness sweep outside the heartbeat path
    pub async fn run_sweep(self: &Arc<Self>) -> Option<JoinHandle<RepairReport>> {
        let newly_dead = self
            .cluster
            .registry()
            .write()
            .await
            .sweep_expired(Instant::now());
        if newly_dead.is_empty() {
            return None;
        }

        let repair = self.spawn_repair(newly_dead);
        if let Err(e) = self.cluster.record_usage_sample().await {
            tracing::warn!(error = %e, "failed to record usage sample");
        }
        self.broadcast_update().await;
        repair
    }

    fn spawn_repair(self: &Arc<Self>, dead: Vec<String>) -> Option<JoinHandle<RepairReport>> {
        if dead.is_empty() {
            return None;
        }
        METRICS.workers_declared_dead.add(dead.len() as u64);
        let transport = Arc::clone(self);
        Some(tokio::spawn(async move {
            let report = transport.repair.handle_dead_workers(&dead).await;
            if report.changed_mapping() {
                transport.broadcast_update().await;
            }
            report
        }))
    }

    async fn may_heartbeat(&self, conn: ConnId, worker_id: &str) -> bool {
        match self.connections.lock().await.get(&conn).map(|c| &c.kind) {
            Some(ConnectionKind::Dashboard) => {
                tracing::warn!(conn, worker = %worker_id, "heartbeat on a dashboard connection ignored");
                false
            }
            Some(ConnectionKind::Worker(bound)) if bound != worker_id => {
                tracing::warn!(conn, bound = %bound, worker = %worker_id, "heartbeat for another worker ignored");
                false
            }
            _ => true,
        }
    }

    async fn bind_worker(&self, conn: ConnId, worker_id: &str) {
        if let Some(c) = self.connections.lock().await.get_mut(&conn) {
            if c.kind == ConnectionKind::Unclassified {
                c.kind = ConnectionKind::Worker(worker_id.to_string());
            }
        }
    }

    async fn subscribe_dashboard(&self, conn: ConnId) -> Result<()> {
        {
            let mut connections = self.connections.lock().await;
            let c = connections
                .get_mut(&conn)
                .ok_or_else(|| Error::NotFound(format!("connection {}", conn)))?;
            if let ConnectionKind::Worker(id) = &c.kind {
                tracing::warn!(conn, worker = %id, "dashboard:subscribe on a worker connection ignored");
                return Ok(());
            }
            c.kind = ConnectionKind::Dashboard;
        }

        let snapshot = Outbound::ClusterSnapshot {
            workers: self.cluster.workers().await,
            files: self.cluster.files()?,
            history: self.cluster.history().await,
        };
        self.send(conn, &snapshot).await
    }

    /// Push `cluster:update` to every dashboard.
    pub async fn broadcast_update(&self) {
        let workers = self.cluster.workers().await;
        let files = match self.cluster.files() {
            Ok(files) => files,
            Err(e) => {
                tracing::error!(error = %e, "cannot build cluster:update");
                return;
            }
        };
        let text = match (Outbound::ClusterUpdate { workers, files }).to_json() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "cannot encode cluster:update");
                return;
            }
        };

        let connections = self.connections.lock().await;
        for (id, c) in connections.iter() {
            if c.kind != ConnectionKind::Dashboard {
                continue;
            }
            match c.tx.try_send(text.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    METRICS.ws_frames_dropped.inc();
                    tracing::debug!(conn = id, "dashboard is not keeping up, update dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(conn = id, "dashboard went away before broadcast");
                }
            }
        }
    }

    async fn send(&self, conn: ConnId, msg: &Outbound) -> Result<()> {
        let text = msg.to_json()?;
        let connections = self.connections.lock().await;
        let c = connections
            .get(&conn)
            .ok_or_else(|| Error::NotFound(format!("connection {}", conn)))?;
        c.tx.try_send(text).map_err(|e| match e {
            TrySendError::Full(_) => {
                METRICS.ws_frames_dropped.inc();
                Error::Internal(format!("connection {} queue is full", conn))
            }
            TrySendError::Closed(_) => Error::Internal(format!("connection {} closed", conn)),
        })
    }

    /// Drive one upgraded socket until it closes.
    pub async fn serve_socket(self: Arc<Self>, socket: WebSocket) {
        let (mut sink, mut stream) = socket.split();
        let (conn, mut rx) = self.connect().await;

        let writer = tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        });

        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    self.handle_text(conn, &text).await;
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(conn, error = %e, "websocket read error");
                    break;
                }
            }
        }

        self.disconnect(conn).await;
        writer.abort();
    }
}

/// Periodic sweep so a cluster where every worker went silent is still noticed.
pub fn spawn_liveness_sweeper(transport: Arc<ClusterTransport>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            transport.run_sweep().await;
        }
    })
}

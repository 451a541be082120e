//! HTTP API of the master
//!
//! - `POST /register` plan a file
//! - `GET /download/:filename`, `GET /getChunkInfo?filename=` fetch a plan
//! - `GET /getallfiles` list every plan
//! - `DELETE /delete/:filename` run the delete workflow
//! - `GET /health`, `GET /metrics`, `GET /admin/verify`
//! - `DELETE /admin/workers/:id` forget a worker
//! - the WebSocket endpoint for workers and dashboards (`ws_path`)

use crate::common::tracing_middleware::request_tracing_middleware;
use crate::common::{Error, Result, METRICS};
use crate::master::cluster::Cluster;
use crate::master::mapping::{ChunkPlan, FilePlan, FileStatus};
use crate::master::transport::ClusterTransport;
use crate::ops::{delete_file, verify};
use axum::{
    extract::{rejection::JsonRejection, ws::WebSocketUpgrade, Path, Query, State},
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

const MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
pub struct MasterState {
    pub cluster: Arc<Cluster>,
    pub transport: Arc<ClusterTransport>,
}

impl MasterState {
    pub fn new(transport: Arc<ClusterTransport>) -> Self {
        Self {
            cluster: Arc::clone(transport.cluster()),
            transport,
        }
    }
}

pub fn create_router(state: MasterState) -> Router {
    let ws_path = state.cluster.config().ws_path.clone();
    Router::new()
        .route("/register", post(register))
        .route("/download/:filename", get(download))
        .route("/getChunkInfo", get(chunk_info))
        .route("/getallfiles", get(all_files))
        .route("/delete/:filename", delete(delete_handler))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/admin/verify", get(admin_verify))
        .route("/admin/workers/:id", delete(admin_remove_worker))
        .route(&ws_path, get(ws_handler))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(middleware::from_fn(request_tracing_middleware))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    size: Option<Value>,
}

/// Accepts the size as a JSON number or a numeric string.
fn parse_size(size: Option<&Value>) -> Result<u64> {
    let size = match size {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    match size {
        Some(n) if n > 0 => Ok(n),
        _ => Err(Error::Validation("size must be a positive number".into())),
    }
}

async fn register(
    State(state): State<MasterState>,
    body: std::result::Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    let Json(req) = body.map_err(|e| Error::Validation(e.body_text()))?;
    let filename = req
        .filename
        .filter(|f| !f.trim().is_empty())
        .ok_or_else(|| Error::Validation("filename is required".into()))?;
    let size = parse_size(req.size.as_ref())?;

    let plan = state.cluster.register_file(&filename, size).await?;
    state.transport.broadcast_update().await;
    Ok(Json(json!({ "plan": plan })))
}

fn lookup(cluster: &Cluster, filename: &str) -> Result<FilePlan> {
    match cluster.mapping().get(filename)? {
        Some(plan) if plan.status == FileStatus::Deleted => {
            Err(Error::Gone(format!("{} was deleted", filename)))
        }
        Some(plan) => Ok(plan),
        None => Err(Error::NotFound(format!("file {}", filename))),
    }
}

async fn download(
    State(state): State<MasterState>,
    Path(filename): Path<String>,
) -> Result<Json<Value>> {
    let plan = lookup(&state.cluster, &filename)?;
    Ok(Json(json!({ "plan": plan })))
}

#[derive(Debug, Deserialize)]
struct ChunkInfoQuery {
    filename: Option<String>,
}

async fn chunk_info(
    State(state): State<MasterState>,
    Query(query): Query<ChunkInfoQuery>,
) -> Result<Json<Value>> {
    let filename = query
        .filename
        .filter(|f| !f.is_empty())
        .ok_or_else(|| Error::Validation("filename query parameter is required".into()))?;
    let plan = lookup(&state.cluster, &filename)?;
    Ok(Json(json!({ "plan": plan })))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileSummary {
    filename: String,
    size: u64,
    chunk_size: u64,
    chunk_count: usize,
    replication_factor: usize,
    created_at: i64,
    chunks: Vec<ChunkPlan>,
}

impl From<FilePlan> for FileSummary {
    fn from(plan: FilePlan) -> Self {
        Self {
            replication_factor: plan.replication_factor(),
            chunk_count: plan.chunks.len(),
            filename: plan.filename,
            size: plan.size,
            chunk_size: plan.chunk_size,
            created_at: plan.created_at,
            chunks: plan.chunks,
        }
    }
}

async fn all_files(State(state): State<MasterState>) -> Result<Json<Value>> {
    let files: Vec<FileSummary> = state
        .cluster
        .files()?
        .into_iter()
        .map(FileSummary::from)
        .collect();
    Ok(Json(json!({
        "totalFiles": files.len(),
        "files": files,
    })))
}

async fn delete_handler(
    State(state): State<MasterState>,
    Path(filename): Path<String>,
) -> Result<Response> {
    let outcome = delete_file(&state.cluster, &filename).await?;
    state.transport.broadcast_update().await;

    let status = if outcome.is_partial() {
        StatusCode::MULTI_STATUS
    } else {
        StatusCode::OK
    };
    let message = if outcome.is_partial() {
        "some chunks could not be deleted; file kept for retry"
    } else {
        "file deleted"
    };
    Ok((status, Json(json!({ "message": message, "result": outcome }))).into_response())
}

async fn health(State(state): State<MasterState>) -> impl IntoResponse {
    let alive = state.cluster.registry().read().await.alive_count();
    match state.cluster.files() {
        Ok(files) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "aliveWorkers": alive,
                "files": files.len(),
                "version": crate::VERSION,
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "degraded", "error": e.to_string() })),
        ),
    }
}

async fn metrics(State(state): State<MasterState>) -> Result<Response> {
    let (alive, dead) = {
        let registry = state.cluster.registry().read().await;
        let alive = registry.alive_count();
        (alive, registry.len() - alive)
    };
    let plans = state.cluster.files()?;
    let alive_ids = state.cluster.alive_ids().await;
    let health = verify::build_report(&plans, &alive_ids, state.cluster.replication_factor());

    let mut out = String::new();
    out += &format!("shardfs_workers_alive {}\n", alive);
    out += &format!("shardfs_workers_dead {}\n", dead);
    out += &format!("shardfs_files {}\n", health.total_files);
    out += &format!("shardfs_chunks {}\n", health.total_chunks);
    out += &format!(
        "shardfs_chunks_under_replicated {}\n",
        health.under_replicated
    );
    out += &format!("shardfs_chunks_unrecoverable {}\n", health.unrecoverable);
    out += &METRICS.to_prometheus();

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        out,
    )
        .into_response())
}

async fn admin_verify(State(state): State<MasterState>) -> Result<Json<Value>> {
    let report = verify::verify_cluster(&state.cluster).await?;
    Ok(Json(json!({ "status": "ok", "report": report })))
}

async fn admin_remove_worker(
    State(state): State<MasterState>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let removed = state.cluster.remove_worker(&id).await?;
    state.transport.broadcast_update().await;
    Ok(Json(json!({ "message": "worker removed", "worker": removed })))
}

async fn ws_handler(State(state): State<MasterState>, ws: WebSocketUpgrade) -> Response {
    let transport = Arc::clone(&state.transport);
    ws.on_upgrade(move |socket| transport.serve_socket(socket))
}

//! Request tracing middleware
//!
//! Every HTTP request gets an `X-Request-ID` (propagated when the client sent
//! one), runs inside an `http_request` span and is logged with its status and
//! latency.

use axum::{
    body::Body,
    http::{HeaderValue, Request, Response},
    middleware::Next,
};
use std::time::Instant;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

/// Header name for request ID
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

pub async fn request_tracing_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let start = Instant::now();

    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(generate_request_id);

    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let span = tracing::info_span!(
        "http_request",
        request_id = %request_id,
        method = %method,
        path = %path,
    );

    let mut response = next.run(request).instrument(span.clone()).await;

    let _guard = span.enter();
    let status = response.status();
    let duration_ms = start.elapsed().as_millis();

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    if status.is_success() || status.is_informational() {
        info!(status = status.as_u16(), duration_ms, "Request completed");
    } else if status.is_client_error() {
        warn!(status = status.as_u16(), duration_ms, "Client error");
    } else if status.is_server_error() {
        warn!(status = status.as_u16(), duration_ms, "Server error");
    } else {
        info!(status = status.as_u16(), duration_ms, "Request completed");
    }

    response
}

//! Outbound RPCs from the master to workers
//!
//! The master never moves chunk bytes itself. It asks a replica holder to push
//! a chunk to new targets, asks a revived worker to wipe its disk, and asks
//! holders to drop chunks of a deleted file.

use crate::common::{encode_segment, normalize_host, MasterConfig, Result};
use futures_util::future::{BoxFuture, FutureExt};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RereplicateRequest {
    pub chunk_id: String,
    /// Target worker base URLs
    pub targets: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetResult {
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RereplicateResponse {
    #[serde(default)]
    pub replicated: Vec<TargetResult>,
    #[serde(default)]
    pub failed: Vec<TargetResult>,
    #[serde(default)]
    pub summary: serde_json::Value,
}

impl RereplicateResponse {
    /// Normalized URLs of the targets that confirmed receipt
    pub fn confirmed_targets(&self) -> Vec<String> {
        self.replicated
            .iter()
            .map(|r| normalize_host(&r.target))
            .collect()
    }
}

/// Worker RPC contract. Every call carries its own bounded timeout; a timeout
/// is reported as an error and never retried here.
pub trait WorkerClient: Send + Sync {
    /// `POST {host}/rereplicate`: the source pushes `chunk_id` to every target
    fn rereplicate<'a>(
        &'a self,
        host: &'a str,
        request: &'a RereplicateRequest,
    ) -> BoxFuture<'a, Result<RereplicateResponse>>;

    /// `POST {host}/reset`: drop every local chunk
    fn reset<'a>(&'a self, host: &'a str) -> BoxFuture<'a, Result<()>>;

    /// `DELETE {host}/deleteChunk/:id`; an absent chunk counts as deleted
    fn delete_chunk<'a>(&'a self, host: &'a str, chunk_id: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// reqwest-backed client used in production
#[derive(Clone)]
pub struct HttpWorkerClient {
    http: reqwest::Client,
    repair_timeout: Duration,
    reset_timeout: Duration,
    delete_timeout: Duration,
}

impl HttpWorkerClient {
    pub fn new(config: &MasterConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            http,
            repair_timeout: config.repair_timeout(),
            reset_timeout: config.reset_timeout(),
            delete_timeout: config.delete_timeout(),
        })
    }
}

impl WorkerClient for HttpWorkerClient {
    fn rereplicate<'a>(
        &'a self,
        host: &'a str,
        request: &'a RereplicateRequest,
    ) -> BoxFuture<'a, Result<RereplicateResponse>> {
        async move {
            let url = format!("{}/rereplicate", normalize_host(host));
            let response = self
                .http
                .post(&url)
                .json(request)
                .timeout(self.repair_timeout)
                .send()
                .await?
                .error_for_status()?;
            Ok(response.json::<RereplicateResponse>().await?)
        }
        .boxed()
    }

    fn reset<'a>(&'a self, host: &'a str) -> BoxFuture<'a, Result<()>> {
        async move {
            let url = format!("{}/reset", normalize_host(host));
            self.http
                .post(&url)
                .json(&serde_json::json!({}))
                .timeout(self.reset_timeout)
                .send()
                .await?
                .error_for_status()?;
            Ok(())
        }
        .boxed()
    }

    fn delete_chunk<'a>(&'a self, host: &'a str, chunk_id: &'a str) -> BoxFuture<'a, Result<()>> {
        async move {
            let url = format!(
                "{}/deleteChunk/{}",
                normalize_host(host),
                encode_segment(chunk_id)
            );
            let response = self
                .http
                .delete(&url)
                .timeout(self.delete_timeout)
                .send()
                .await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(());
            }
            response.error_for_status()?;
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirmed_targets_are_normalized() {
        let response: RereplicateResponse = serde_json::from_str(
            r#"{
                "replicated": [{"target": "http://w3:8000/"}, {"target": "w4:8000"}],
                "failed": [{"target": "http://w5:8000", "error": "timeout"}],
                "summary": {"totalReplicated": 2}
            }"#,
        )
        .unwrap();
        assert_eq!(
            response.confirmed_targets(),
            vec!["http://w3:8000", "http://w4:8000"]
        );
        assert_eq!(response.failed[0].error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_missing_lists_default_to_empty() {
        let response: RereplicateResponse = serde_json::from_str("{}").unwrap();
        assert!(response.confirmed_targets().is_empty());
    }

    #[test]
    fn test_request_shape() {
        let body = serde_json::to_value(RereplicateRequest {
            chunk_id: "a_part0_x".into(),
            targets: vec!["http://w3:8000".into()],
        })
        .unwrap();
        assert_eq!(body["chunkId"], "a_part0_x");
        assert_eq!(body["targets"][0], "http://w3:8000");
    }
}

//! Typed REST client for the orchestrator's collaborator endpoints.
//!
//! Every call is best-effort from the session's perspective: callers log
//! failures and leave the corresponding state slice stale.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use bridge_core::{
    BackgroundWorker, EventRecord, GithubMetrics, HitlItem, LifetimeStats, PrRecord, StageBuckets,
};

use crate::error::{ClientError, Result};

/// Response of `GET /control/status`. Some orchestrator builds include a
/// full pipeline-bucket snapshot alongside the status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlStatus {
    pub status: String,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub pipeline: Option<StageBuckets>,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build http client");
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.http.get(self.endpoint(path)).send().await?;
        Self::json_body(response).await
    }

    async fn json_body<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }

    async fn post_ack(&self, path: &str, body: Option<serde_json::Value>) -> Result<()> {
        let mut request = self.http.post(self.endpoint(path));
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }

    pub async fn control_status(&self) -> Result<ControlStatus> {
        self.get_json("/control/status").await
    }

    pub async fn lifetime_stats(&self) -> Result<LifetimeStats> {
        self.get_json("/stats").await
    }

    pub async fn open_prs(&self) -> Result<Vec<PrRecord>> {
        self.get_json("/prs").await
    }

    pub async fn hitl_items(&self) -> Result<Vec<HitlItem>> {
        self.get_json("/hitl").await
    }

    pub async fn background_workers(&self) -> Result<Vec<BackgroundWorker>> {
        self.get_json("/system/workers").await
    }

    pub async fn metrics(&self) -> Result<GithubMetrics> {
        self.get_json("/metrics").await
    }

    /// All events strictly newer than `since`, for gap recovery.
    pub async fn events_since(&self, since: DateTime<Utc>) -> Result<Vec<EventRecord>> {
        let response = self
            .http
            .get(self.endpoint("/events"))
            .query(&[("since", since.to_rfc3339())])
            .send()
            .await?;
        Self::json_body(response).await
    }

    pub async fn human_input(&self) -> Result<BTreeMap<u64, String>> {
        self.get_json("/human-input").await
    }

    pub async fn submit_human_input(&self, issue_number: u64, answer: &str) -> Result<()> {
        self.post_ack(
            &format!("/human-input/{issue_number}"),
            Some(serde_json::json!({ "answer": answer })),
        )
        .await
    }

    pub async fn start_orchestrator(&self) -> Result<()> {
        self.post_ack("/control/start", None).await
    }

    pub async fn stop_orchestrator(&self) -> Result<()> {
        self.post_ack("/control/stop", None).await
    }
}

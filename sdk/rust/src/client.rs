//! Client for the mediator ingress API.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type SdkError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl SubmitRequest {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            ..Self::default()
        }
    }

    pub fn metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    pub fn correlation_id(mut self, id: &str) -> Self {
        self.correlation_id = Some(id.to_string());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub correlation_id: String,
    pub status: String,
    pub submitted_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub correlation_id: String,
    pub status: String,
    pub submitted_at: u64,
    pub updated_at: u64,
}

/// Terminal result as returned by `GET /api/v1/response/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultResponse {
    pub correlation_id: String,
    pub status: String,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub route: Option<String>,
    #[serde(default)]
    pub response_headers: BTreeMap<String, String>,
    pub processing_time_ms: u64,
    pub completed_at: u64,
}

#[derive(Debug, Clone)]
pub enum ResponseState {
    Ready(ResultResponse),
    InFlight(StatusResponse),
    NotFound,
}

pub struct MediatorClient {
    client: Client,
    base_url: String,
}

impl MediatorClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::builder().no_proxy().build().unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Submit a message; returns as soon as it is queued.
    pub async fn submit(&self, req: &SubmitRequest) -> Result<SubmitResponse, SdkError> {
        let resp = self
            .client
            .post(format!("{}/api/v1/submit", self.base_url))
            .json(req)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if status != StatusCode::ACCEPTED {
            return Err(format!("Mediator returned error status {}: {}", status, text).into());
        }
        Ok(serde_json::from_str(&text)?)
    }

    pub async fn status(&self, correlation_id: &str) -> Result<Option<StatusResponse>, SdkError> {
        let resp = self
            .client
            .get(format!("{}/api/v1/status/{}", self.base_url, correlation_id))
            .send()
            .await?;

        match resp.status() {
            StatusCode::OK => Ok(Some(resp.json().await?)),
            StatusCode::NOT_FOUND => Ok(None),
            other => Err(format!("Mediator returned error status {}", other).into()),
        }
    }

    pub async fn response(&self, correlation_id: &str) -> Result<ResponseState, SdkError> {
        let resp = self
            .client
            .get(format!("{}/api/v1/response/{}", self.base_url, correlation_id))
            .send()
            .await?;

        match resp.status() {
            StatusCode::OK => Ok(ResponseState::Ready(resp.json().await?)),
            StatusCode::ACCEPTED => Ok(ResponseState::InFlight(resp.json().await?)),
            StatusCode::NOT_FOUND => Ok(ResponseState::NotFound),
            other => Err(format!("Mediator returned error status {}", other).into()),
        }
    }

    /// Poll until the result is terminal or `timeout` elapses.
    pub async fn wait_for_result(
        &self,
        correlation_id: &str,
        timeout: Duration,
    ) -> Result<ResultResponse, SdkError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let ResponseState::Ready(result) = self.response(correlation_id).await? {
                return Ok(result);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(format!("no result for {} within {:?}", correlation_id, timeout).into());
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    pub async fn health(&self) -> Result<Value, SdkError> {
        let resp = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;
        Ok(resp.json().await?)
    }
}

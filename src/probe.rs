//! Health endpoint probe.
//!
//! The camera server answers `GET /health` with
//! `{"status": "ok", "camera": "active"}`. Any 2xx counts as healthy; the
//! body is informational.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Body of a successful health response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Server status, `ok` when healthy.
    pub status: String,
    /// Camera pipeline status.
    #[serde(default)]
    pub camera: Option<String>,
}

impl HealthReport {
    fn unparsed() -> Self {
        Self {
            status: "unknown".to_string(),
            camera: None,
        }
    }
}

/// Why a probe failed.
#[derive(Error, Debug)]
pub enum ProbeError {
    /// Non-2xx response.
    #[error("HTTP status {0}")]
    Status(u16),

    /// No answer within the probe timeout.
    #[error("timed out")]
    Timeout,

    /// Connection-level failure.
    #[error("request failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for ProbeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProbeError::Timeout
        } else {
            ProbeError::Request(err.to_string())
        }
    }
}

/// Checks a health endpoint.
#[async_trait]
pub trait HealthProbe: Send + Sync + 'static {
    /// Probe `url`.
    async fn probe(&self, url: &str) -> Result<HealthReport, ProbeError>;
}

/// [`HealthProbe`] over HTTP with a whole-request timeout.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: reqwest::Client,
}

impl HttpHealthProbe {
    /// Probe that gives up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, url: &str) -> Result<HealthReport, ProbeError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::Status(status.as_u16()));
        }
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body).unwrap_or_else(|err| {
            tracing::debug!(%url, error = %err, "health body was not the expected JSON");
            HealthReport::unparsed()
        }))
    }
}

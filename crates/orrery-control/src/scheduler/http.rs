//! HTTP client for the scheduler API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use crate::config::SchedulerConfig;
use crate::error::{ControlError, ControlResult};

use super::{JobScheduler, JobSpec};

#[derive(serde::Deserialize)]
struct AllocationsResponse {
    total_cpu_units: u64,
}

/// HTTP client for interacting with the external scheduler service.
#[derive(Debug, Clone)]
pub struct HttpScheduler {
    client: Client,
    base_url: String,
}

impl HttpScheduler {
    /// Create a new scheduler client from configuration.
    pub fn new(config: &SchedulerConfig) -> ControlResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(ControlError::Http)?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_owned(),
        })
    }

    /// Create a new scheduler client with a custom base URL.
    pub fn with_url(url: impl Into<String>) -> ControlResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(ControlError::Http)?;

        Ok(Self {
            client,
            base_url: url.into().trim_end_matches('/').to_owned(),
        })
    }
}

#[async_trait]
impl JobScheduler for HttpScheduler {
    async fn submit(&self, spec: &JobSpec) -> ControlResult<()> {
        let url = format!("{}/v1/jobs", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(spec)
            .send()
            .await
            .map_err(ControlError::Http)?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED | StatusCode::ACCEPTED => Ok(()),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(ControlError::scheduler(format!(
                    "job submission rejected with {status}: {body}"
                )))
            }
        }
    }

    async fn cancel(&self, job_name: &str) -> ControlResult<()> {
        let url = format!("{}/v1/jobs/{}", self.base_url, job_name);
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(ControlError::Http)?;

        match response.status() {
            StatusCode::OK | StatusCode::ACCEPTED | StatusCode::NO_CONTENT => Ok(()),
            StatusCode::NOT_FOUND => Err(ControlError::scheduler(format!(
                "job not found: {job_name}"
            ))),
            status => Err(ControlError::scheduler(format!(
                "failed to cancel job {job_name}: {status}"
            ))),
        }
    }

    async fn fetch_logs(&self, job_name: &str) -> ControlResult<String> {
        let url = format!("{}/v1/jobs/{}/logs", self.base_url, job_name);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(ControlError::Http)?;

        if !response.status().is_success() {
            return Err(ControlError::scheduler(format!(
                "failed to fetch logs for {job_name}: {}",
                response.status()
            )));
        }

        response.text().await.map_err(ControlError::Http)
    }

    async fn allocated_cpu_units(&self) -> ControlResult<u64> {
        let url = format!("{}/v1/allocations", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(ControlError::Http)?;

        if !response.status().is_success() {
            return Err(ControlError::scheduler(format!(
                "failed to query allocations: {}",
                response.status()
            )));
        }

        let allocations: AllocationsResponse = response.json().await.map_err(ControlError::Http)?;
        Ok(allocations.total_cpu_units)
    }
}

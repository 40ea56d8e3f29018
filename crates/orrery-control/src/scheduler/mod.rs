//! External job scheduler interface.
//!
//! The scheduler owns placement and execution of deployment jobs; the
//! control plane consumes it as a black box: submit a job, cancel a job,
//! fetch its logs, and ask how much compute is currently allocated (the
//! live figure the license negotiator admits against). The scheduler offers
//! no two-phase commit hook, which is why the orchestrator absorbs submit
//! failures into recorded state instead of rolling them back.

mod http;

pub use http::HttpScheduler;

use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ControlError, ControlResult};
use crate::types::{ModelId, ResourceRequest};

/// A deployment job submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    /// Scheduler-side job key.
    pub job_name: String,
    /// Model the job serves.
    pub model_id: ModelId,
    /// Blob-store path of the job's configuration document.
    pub config_path: String,
    /// Human-readable deployment name. Descriptive metadata only, never a
    /// key; empty for dependency deployments.
    pub deployment_name: String,
    /// Whether the scheduler may scale replicas.
    pub autoscaling_enabled: bool,
    /// Replica ceiling when autoscaling.
    pub autoscaling_max: u32,
    /// Compute shape for one replica.
    pub resources: ResourceRequest,
    /// Task driver the scheduler should run the job under.
    pub driver: String,
    /// License key the job presents to the model runtime.
    pub license_key: String,
}

/// Client interface to the external scheduler.
#[async_trait]
pub trait JobScheduler: Send + Sync {
    /// Submit a job. Idempotency is the caller's concern; the orchestrator
    /// never submits while a model is already active.
    async fn submit(&self, spec: &JobSpec) -> ControlResult<()>;

    /// Cancel a job by name.
    async fn cancel(&self, job_name: &str) -> ControlResult<()>;

    /// Fetch the job's log output.
    async fn fetch_logs(&self, job_name: &str) -> ControlResult<String>;

    /// Total CPU allocation units currently granted across the cluster.
    async fn allocated_cpu_units(&self) -> ControlResult<u64>;
}

/// Recording scheduler for tests.
///
/// Captures submissions and cancellations, with injectable failures for
/// either path.
#[derive(Debug, Default)]
pub struct MockScheduler {
    submissions: Mutex<Vec<JobSpec>>,
    cancellations: Mutex<Vec<String>>,
    fail_submit: Mutex<Option<String>>,
    fail_cancel: Mutex<Option<String>>,
    allocated: Mutex<u64>,
}

impl MockScheduler {
    /// Create a mock with no recorded state and no injected failures.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent submit fail with the given message.
    pub fn fail_submissions(&self, message: impl Into<String>) {
        *self.fail_submit.lock().expect("lock poisoned") = Some(message.into());
    }

    /// Make every subsequent cancel fail with the given message.
    pub fn fail_cancellations(&self, message: impl Into<String>) {
        *self.fail_cancel.lock().expect("lock poisoned") = Some(message.into());
    }

    /// Clear any injected failures.
    pub fn clear_failures(&self) {
        *self.fail_submit.lock().expect("lock poisoned") = None;
        *self.fail_cancel.lock().expect("lock poisoned") = None;
    }

    /// Set the reported cluster-wide allocation.
    pub fn set_allocated_cpu_units(&self, units: u64) {
        *self.allocated.lock().expect("lock poisoned") = units;
    }

    /// Jobs submitted so far.
    #[must_use]
    pub fn submissions(&self) -> Vec<JobSpec> {
        self.submissions.lock().expect("lock poisoned").clone()
    }

    /// Job names cancelled so far.
    #[must_use]
    pub fn cancellations(&self) -> Vec<String> {
        self.cancellations.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl JobScheduler for MockScheduler {
    async fn submit(&self, spec: &JobSpec) -> ControlResult<()> {
        if let Some(message) = self.fail_submit.lock().expect("lock poisoned").clone() {
            return Err(ControlError::scheduler(message));
        }
        self.submissions
            .lock()
            .expect("lock poisoned")
            .push(spec.clone());
        Ok(())
    }

    async fn cancel(&self, job_name: &str) -> ControlResult<()> {
        if let Some(message) = self.fail_cancel.lock().expect("lock poisoned").clone() {
            return Err(ControlError::scheduler(message));
        }
        self.cancellations
            .lock()
            .expect("lock poisoned")
            .push(job_name.to_owned());
        Ok(())
    }

    async fn fetch_logs(&self, job_name: &str) -> ControlResult<String> {
        Ok(format!("logs for {job_name}\n"))
    }

    async fn allocated_cpu_units(&self) -> ControlResult<u64> {
        Ok(*self.allocated.lock().expect("lock poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::deploy_job_name;

    fn test_spec() -> JobSpec {
        let model_id = ModelId::new("m1");
        JobSpec {
            job_name: deploy_job_name(&model_id),
            model_id,
            config_path: "configs/m1/deploy.json".to_owned(),
            deployment_name: "search-prod".to_owned(),
            autoscaling_enabled: true,
            autoscaling_max: 4,
            resources: ResourceRequest::for_deploy(2000),
            driver: "docker".to_owned(),
            license_key: "key".to_owned(),
        }
    }

    #[tokio::test]
    async fn mock_records_submissions_and_cancellations() {
        let scheduler = MockScheduler::new();

        scheduler.submit(&test_spec()).await.expect("submit failed");
        scheduler.cancel("deploy-m1").await.expect("cancel failed");

        assert_eq!(scheduler.submissions().len(), 1);
        assert_eq!(scheduler.submissions()[0].job_name, "deploy-m1");
        assert_eq!(scheduler.cancellations(), vec!["deploy-m1"]);
    }

    #[tokio::test]
    async fn injected_failures_surface_as_scheduler_errors() {
        let scheduler = MockScheduler::new();
        scheduler.fail_submissions("no capacity");

        let result = scheduler.submit(&test_spec()).await;
        assert!(matches!(result, Err(ControlError::Scheduler(_))));
        assert!(scheduler.submissions().is_empty());
    }
}

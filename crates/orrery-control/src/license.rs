//! License-gated resource admission.
//!
//! Every deployment job consumes cluster compute against a licensed
//! ceiling. The negotiator asks the license authority for the current
//! entitlement and the scheduler for the live allocation, then admits or
//! denies the requested shape. The allocation figure is queried live on
//! every admission rather than cached: multiple control-plane instances
//! admit against the same cluster, and a stale local view would let two of
//! them grant the same headroom.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::error::{ControlError, ControlResult};
use crate::scheduler::JobScheduler;

/// What the license currently entitles the cluster to.
#[derive(Debug, Clone, Deserialize)]
pub struct Entitlement {
    /// Opaque license key, passed through to submitted jobs.
    pub key: String,
    /// Total CPU allocation units the license covers.
    pub cpu_limit: u64,
}

/// An admission grant for one job.
#[derive(Debug, Clone)]
pub struct Grant {
    /// License key for the job submission.
    pub license_key: String,
}

/// External authority that verifies the installation's license.
#[async_trait]
pub trait LicenseAuthority: Send + Sync {
    /// Current entitlement, or an error if the license fails verification.
    async fn entitlements(&self) -> ControlResult<Entitlement>;
}

/// License authority reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpLicenseAuthority {
    client: Client,
    base_url: String,
}

impl HttpLicenseAuthority {
    /// Create a client for the authority at `url`.
    pub fn new(url: impl Into<String>) -> ControlResult<Self> {
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
impl LicenseAuthority for HttpLicenseAuthority {
    async fn entitlements(&self) -> ControlResult<Entitlement> {
        let url = format!("{}/v1/entitlements", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(ControlError::Http)?;

        if !response.status().is_success() {
            return Err(ControlError::Config(format!(
                "license verification failed: {}",
                response.status()
            )));
        }

        response.json().await.map_err(ControlError::Http)
    }
}

/// Fixed entitlement for tests and air-gapped installs where the key is
/// verified out of band.
#[derive(Debug, Clone)]
pub struct StaticLicenseAuthority {
    entitlement: Entitlement,
}

impl StaticLicenseAuthority {
    /// Create an authority that always reports the given entitlement.
    #[must_use]
    pub fn new(key: impl Into<String>, cpu_limit: u64) -> Self {
        Self {
            entitlement: Entitlement {
                key: key.into(),
                cpu_limit,
            },
        }
    }
}

#[async_trait]
impl LicenseAuthority for StaticLicenseAuthority {
    async fn entitlements(&self) -> ControlResult<Entitlement> {
        Ok(self.entitlement.clone())
    }
}

/// Decides whether a requested allocation fits the license.
pub struct Negotiator {
    authority: Arc<dyn LicenseAuthority>,
    scheduler: Arc<dyn JobScheduler>,
}

impl Negotiator {
    /// Create a negotiator over an authority and the live scheduler.
    #[must_use]
    pub fn new(authority: Arc<dyn LicenseAuthority>, scheduler: Arc<dyn JobScheduler>) -> Self {
        Self {
            authority,
            scheduler,
        }
    }

    /// Admit or deny a request for `requested_units` of CPU.
    ///
    /// Must be called before the corresponding job submission, never after:
    /// a denial here aborts the start before any external side effect.
    pub async fn authorize(&self, requested_units: u64) -> ControlResult<Grant> {
        let entitlement = self.authority.entitlements().await?;
        let allocated = self.scheduler.allocated_cpu_units().await?;

        if allocated.saturating_add(requested_units) > entitlement.cpu_limit {
            return Err(ControlError::QuotaExceeded {
                requested: requested_units,
                allocated,
                limit: entitlement.cpu_limit,
            });
        }

        Ok(Grant {
            license_key: entitlement.key,
        })
    }
}

impl std::fmt::Debug for Negotiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Negotiator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::MockScheduler;

    fn negotiator(limit: u64, allocated: u64) -> Negotiator {
        let scheduler = Arc::new(MockScheduler::new());
        scheduler.set_allocated_cpu_units(allocated);
        Negotiator::new(
            Arc::new(StaticLicenseAuthority::new("key-123", limit)),
            scheduler,
        )
    }

    #[tokio::test]
    async fn admits_within_quota() {
        let grant = negotiator(10_000, 2_400)
            .authorize(2_400)
            .await
            .expect("authorisation failed");
        assert_eq!(grant.license_key, "key-123");
    }

    #[tokio::test]
    async fn denies_over_quota() {
        let result = negotiator(4_000, 2_400).authorize(2_400).await;
        assert!(matches!(result, Err(ControlError::QuotaExceeded { .. })));
    }

    #[tokio::test]
    async fn boundary_allocation_is_admitted() {
        let result = negotiator(4_800, 2_400).authorize(2_400).await;
        assert!(result.is_ok());
    }
}

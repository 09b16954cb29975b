//! Aggregate health report produced by [`ServiceRegistry::health_check`](crate::registry::ServiceRegistry::health_check).

use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;

use crate::lifecycle::ModuleStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    /// At least one probe failed, but not all of them.
    Degraded,
    /// Every probe failed.
    Unhealthy,
}

impl HealthStatus {
    pub fn from_counts(total: usize, failed: usize) -> Self {
        match failed {
            0 => HealthStatus::Healthy,
            f if f == total => HealthStatus::Unhealthy,
            _ => HealthStatus::Degraded,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    Healthy,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthEntry {
    pub status: ProbeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Lifecycle status, for module entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_status: Option<ModuleStatus>,
    pub registered_at: DateTime<Utc>,
}

impl HealthEntry {
    pub fn is_healthy(&self) -> bool {
        self.status == ProbeStatus::Healthy
    }

    pub(crate) fn healthy(detail: Value, registered_at: DateTime<Utc>) -> Self {
        Self {
            status: ProbeStatus::Healthy,
            detail: Some(detail),
            error: None,
            module_status: None,
            registered_at,
        }
    }

    pub(crate) fn failed(error: String, registered_at: DateTime<Utc>) -> Self {
        Self {
            status: ProbeStatus::Error,
            detail: None,
            error: Some(error),
            module_status: None,
            registered_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checked_at: DateTime<Utc>,
    pub services: BTreeMap<String, HealthEntry>,
    pub modules: BTreeMap<String, HealthEntry>,
}

impl HealthReport {
    pub(crate) fn new(
        services: BTreeMap<String, HealthEntry>,
        modules: BTreeMap<String, HealthEntry>,
    ) -> Self {
        let total = services.len() + modules.len();
        let failed = services
            .values()
            .chain(modules.values())
            .filter(|e| !e.is_healthy())
            .count();
        Self {
            status: HealthStatus::from_counts(total, failed),
            checked_at: Utc::now(),
            services,
            modules,
        }
    }

    /// Names of failed entries, services first.
    pub fn failed(&self) -> Vec<&str> {
        self.services
            .iter()
            .chain(self.modules.iter())
            .filter(|(_, e)| !e.is_healthy())
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Await a probe, turning a panic into an ordinary error.
pub(crate) async fn guarded<T, F>(probe: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match AssertUnwindSafe(probe).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(anyhow::anyhow!(
            "probe panicked: {}",
            crate::panic_message(panic.as_ref())
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_status_from_counts() {
        assert_eq!(HealthStatus::from_counts(0, 0), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_counts(3, 0), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_counts(3, 1), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_counts(3, 3), HealthStatus::Unhealthy);
    }
}

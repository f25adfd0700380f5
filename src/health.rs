use crate::metrics::{get_global_metrics, MetricsSnapshot};
use crate::registry::Registry;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, HealthStatus::Degraded(_))
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, HealthStatus::Unhealthy(_))
    }
}

#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self) -> HealthStatus;
    fn name(&self) -> &'static str;
    fn timeout(&self) -> Duration {
        Duration::from_secs(2)
    }
}

/// Degraded while every session slot is taken.
pub struct CapacityCheck {
    registry: Arc<Registry>,
}

impl CapacityCheck {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl HealthCheck for CapacityCheck {
    async fn check(&self) -> HealthStatus {
        let active = self.registry.active_count().await;
        let limit = self.registry.max_concurrent();
        if active >= limit {
            return HealthStatus::Degraded(format!("All {} session slots in use", limit));
        }
        HealthStatus::Healthy
    }

    fn name(&self) -> &'static str {
        "capacity"
    }
}

/// Unhealthy when the upload directory has gone away.
pub struct UploadStoreCheck {
    root: PathBuf,
}

impl UploadStoreCheck {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl HealthCheck for UploadStoreCheck {
    async fn check(&self) -> HealthStatus {
        match tokio::fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => HealthStatus::Healthy,
            Ok(_) => HealthStatus::Unhealthy(format!("{} is not a directory", self.root.display())),
            Err(e) => HealthStatus::Unhealthy(format!("{}: {}", self.root.display(), e)),
        }
    }

    fn name(&self) -> &'static str {
        "upload_store"
    }
}

/// Degraded when most finished sessions failed.
pub struct SessionFailureCheck {
    max_failure_rate: f64,
}

impl SessionFailureCheck {
    pub fn new(max_failure_rate: f64) -> Self {
        Self { max_failure_rate }
    }
}

#[async_trait]
impl HealthCheck for SessionFailureCheck {
    async fn check(&self) -> HealthStatus {
        let snapshot = get_global_metrics().get_snapshot();
        let finished = snapshot.sessions_failed_total + snapshot.sessions_stopped_total;
        if finished > 0 {
            let failure_rate = snapshot.sessions_failed_total as f64 / finished as f64;
            if failure_rate > self.max_failure_rate {
                return HealthStatus::Degraded(format!(
                    "Session failure rate too high: {:.2}% > {:.2}%",
                    failure_rate * 100.0,
                    self.max_failure_rate * 100.0
                ));
            }
        }
        HealthStatus::Healthy
    }

    fn name(&self) -> &'static str {
        "session_failures"
    }
}

pub struct HealthChecker {
    checks: Vec<Box<dyn HealthCheck>>,
}

impl HealthChecker {
    pub fn new() -> Self {
        Self { checks: Vec::new() }
    }

    pub fn add_check(mut self, check: Box<dyn HealthCheck>) -> Self {
        self.checks.push(check);
        self
    }

    pub async fn check_all(&self) -> HealthReport {
        let mut overall_status = HealthStatus::Healthy;
        let mut checks = BTreeMap::new();

        for check in &self.checks {
            let status = match tokio::time::timeout(check.timeout(), check.check()).await {
                Ok(status) => status,
                Err(_) => HealthStatus::Unhealthy(format!("Health check '{}' timed out", check.name())),
            };
            log::debug!("Health check '{}': {:?}", check.name(), status);

            match &status {
                HealthStatus::Unhealthy(_) => {
                    overall_status = HealthStatus::Unhealthy("One or more checks failed".to_string());
                }
                HealthStatus::Degraded(_) if overall_status.is_healthy() => {
                    overall_status = HealthStatus::Degraded("One or more checks degraded".to_string());
                }
                _ => {}
            }
            checks.insert(check.name(), status);
        }

        HealthReport {
            overall_status,
            checks,
            metrics: get_global_metrics().get_snapshot(),
        }
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub overall_status: HealthStatus,
    pub checks: BTreeMap<&'static str, HealthStatus>,
    pub metrics: MetricsSnapshot,
}

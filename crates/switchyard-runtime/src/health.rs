//! Periodic provider health checks.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::OrchestratorError;
use crate::providers::ProviderRegistry;

/// Last known health of a provider.
///
/// A provider that was never checked counts as healthy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub healthy: bool,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_latency: Option<Duration>,
    pub consecutive_failures: u32,
}

impl Default for ProviderHealth {
    fn default() -> Self {
        Self {
            healthy: true,
            last_checked: None,
            last_latency: None,
            consecutive_failures: 0,
        }
    }
}

impl ProviderHealth {
    /// The health after one more check.
    pub fn after_check(&self, healthy: bool, latency: Duration) -> Self {
        Self {
            healthy,
            last_checked: Some(Utc::now()),
            last_latency: Some(latency),
            consecutive_failures: if healthy {
                0
            } else {
                self.consecutive_failures + 1
            },
        }
    }
}

struct MonitorTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Runs `health_check()` on every registered provider.
pub struct HealthMonitor {
    registry: Arc<ProviderRegistry>,
    check_timeout: Duration,
    task: Mutex<Option<MonitorTask>>,
}

impl HealthMonitor {
    pub fn new(registry: Arc<ProviderRegistry>, check_timeout: Duration) -> Self {
        Self {
            registry,
            check_timeout,
            task: Mutex::new(None),
        }
    }

    /// Check every provider once, concurrently, and store the results.
    pub async fn check_all(&self) -> Vec<(String, ProviderHealth)> {
        check_providers(&self.registry, self.check_timeout).await
    }

    /// Start checking every `interval`, replacing any running monitor.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, interval: Duration) -> Result<(), OrchestratorError> {
        if interval.is_zero() {
            return Err(OrchestratorError::InvalidArgument(
                "health check interval must be positive".into(),
            ));
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let registry = self.registry.clone();
        let check_timeout = self.check_timeout;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        check_providers(&registry, check_timeout).await;
                    }
                }
            }
            debug!("Health monitor stopped");
        });

        let previous = self.task.lock().replace(MonitorTask { cancel, handle });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
        info!(?interval, "Health monitoring started");
        Ok(())
    }

    /// Stop the monitor and wait for it to exit.
    pub async fn stop(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                warn!(error = %e, "Health monitor task ended abnormally");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map(|t| !t.handle.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.cancel.cancel();
        }
    }
}

async fn check_providers(
    registry: &ProviderRegistry,
    check_timeout: Duration,
) -> Vec<(String, ProviderHealth)> {
    let entries = registry.snapshot();
    let checks = entries.into_iter().map(|entry| async move {
        let started = Instant::now();
        let healthy = tokio::time::timeout(check_timeout, entry.client.health_check())
            .await
            .unwrap_or(false);
        let health = entry.health.after_check(healthy, started.elapsed());
        if !healthy {
            warn!(
                provider = %entry.metadata.name,
                failures = health.consecutive_failures,
                "Provider health check failed"
            );
        }
        (entry.metadata.name, health)
    });

    let results = join_all(checks).await;
    for (name, health) in &results {
        registry.record_health(name, health.clone());
    }
    results
}

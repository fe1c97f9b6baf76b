//! Spend budgets and threshold alerts.
//!
//! Budgets are advisory. They never block a call; crossing a threshold
//! emits a [`BudgetAlertEvent`] to subscribers and registered sinks.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

use super::CostTracker;
use crate::error::OrchestratorError;

/// Budget key meaning "all providers combined".
pub const GLOBAL_BUDGET_KEY: &str = "__global__";

const ALERT_CHANNEL_CAPACITY: usize = 64;

/// Accounting period of a budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetPeriod {
    Daily,
    Weekly,
    Monthly,
    Total,
}

impl BudgetPeriod {
    /// Length of the period. `Total` never ends.
    pub fn length(&self) -> Option<ChronoDuration> {
        match self {
            BudgetPeriod::Daily => Some(ChronoDuration::days(1)),
            BudgetPeriod::Weekly => Some(ChronoDuration::weeks(1)),
            BudgetPeriod::Monthly => Some(ChronoDuration::days(30)),
            BudgetPeriod::Total => None,
        }
    }
}

/// A spend limit for one provider or for all of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    /// Provider name or [`GLOBAL_BUDGET_KEY`]
    pub key: String,

    /// Limit in USD
    pub limit: f64,

    pub period: BudgetPeriod,
    pub started_at: DateTime<Utc>,
}

impl Budget {
    pub fn period_end(&self) -> Option<DateTime<Utc>> {
        self.period.length().map(|len| self.started_at + len)
    }
}

/// Fires once when a budget's utilization reaches a threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetAlert {
    pub id: u64,
    pub budget_key: String,

    /// Utilization percentage that triggers the alert
    pub threshold_percent: f64,

    pub message: String,
    pub fired: bool,
    pub fired_at: Option<DateTime<Utc>>,
}

/// An alert that just fired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetAlertEvent {
    pub alert: BudgetAlert,
    pub utilization_percent: f64,
    pub current_cost: f64,
}

type AlertSink = Arc<dyn Fn(&BudgetAlertEvent) + Send + Sync>;

/// Budgets, alerts and their delivery.
///
/// Costs, budgets, alerts and sinks each sit behind their own lock. No
/// method holds two of them at once.
pub struct BudgetManager {
    costs: Arc<CostTracker>,
    budgets: RwLock<HashMap<String, Budget>>,
    alerts: Mutex<Vec<BudgetAlert>>,
    sinks: RwLock<Vec<AlertSink>>,
    sender: broadcast::Sender<BudgetAlertEvent>,
    next_alert_id: AtomicU64,
}

impl BudgetManager {
    pub fn new(costs: Arc<CostTracker>) -> Self {
        let (sender, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        Self {
            costs,
            budgets: RwLock::new(HashMap::new()),
            alerts: Mutex::new(Vec::new()),
            sinks: RwLock::new(Vec::new()),
            sender,
            next_alert_id: AtomicU64::new(1),
        }
    }

    /// Set or replace the budget for `key`. The period starts now.
    pub fn set_budget(
        &self,
        key: &str,
        limit: f64,
        period: BudgetPeriod,
    ) -> Result<(), OrchestratorError> {
        if key.trim().is_empty() {
            return Err(OrchestratorError::InvalidArgument(
                "budget key must not be empty".into(),
            ));
        }
        if !limit.is_finite() || limit <= 0.0 {
            return Err(OrchestratorError::InvalidArgument(format!(
                "budget limit must be positive, got {limit}"
            )));
        }

        self.budgets.write().insert(
            key.to_string(),
            Budget {
                key: key.to_string(),
                limit,
                period,
                started_at: Utc::now(),
            },
        );
        Ok(())
    }

    pub fn remove_budget(&self, key: &str) -> Option<Budget> {
        self.budgets.write().remove(key)
    }

    pub fn budget(&self, key: &str) -> Option<Budget> {
        self.budgets.read().get(key).cloned()
    }

    /// Alert on the global budget.
    pub fn add_alert(
        &self,
        threshold_percent: f64,
        message: Option<String>,
    ) -> Result<u64, OrchestratorError> {
        self.add_alert_for(GLOBAL_BUDGET_KEY, threshold_percent, message)
    }

    /// Alert on the budget for `key`.
    pub fn add_alert_for(
        &self,
        key: &str,
        threshold_percent: f64,
        message: Option<String>,
    ) -> Result<u64, OrchestratorError> {
        if !threshold_percent.is_finite() || threshold_percent <= 0.0 {
            return Err(OrchestratorError::InvalidArgument(format!(
                "alert threshold must be positive, got {threshold_percent}"
            )));
        }

        let id = self.next_alert_id.fetch_add(1, Ordering::Relaxed);
        let message = message
            .unwrap_or_else(|| format!("Budget '{key}' reached {threshold_percent}% utilization"));
        self.alerts.lock().push(BudgetAlert {
            id,
            budget_key: key.to_string(),
            threshold_percent,
            message,
            fired: false,
            fired_at: None,
        });
        Ok(id)
    }

    pub fn alerts(&self) -> Vec<BudgetAlert> {
        self.alerts.lock().clone()
    }

    /// Re-arm every fired alert.
    pub fn reset_alerts(&self) {
        for alert in self.alerts.lock().iter_mut() {
            alert.fired = false;
            alert.fired_at = None;
        }
    }

    /// Subscribe to alert events.
    pub fn subscribe(&self) -> broadcast::Receiver<BudgetAlertEvent> {
        self.sender.subscribe()
    }

    /// Register a synchronous alert sink.
    pub fn on_alert(&self, sink: impl Fn(&BudgetAlertEvent) + Send + Sync + 'static) {
        self.sinks.write().push(Arc::new(sink));
    }

    /// Spend counted against `key`.
    pub fn current_cost(&self, key: &str) -> f64 {
        if key == GLOBAL_BUDGET_KEY {
            self.costs.total_cost()
        } else {
            self.costs.provider_cost(key)
        }
    }

    /// Percentage of the budget spent, or `None` without a budget.
    pub fn budget_utilization(&self, key: &str) -> Option<f64> {
        let limit = self.budgets.read().get(key).map(|b| b.limit)?;
        Some(self.current_cost(key) / limit * 100.0)
    }

    pub fn is_budget_exceeded(&self, key: &str) -> bool {
        self.budget_utilization(key)
            .map(|pct| pct >= 100.0)
            .unwrap_or(false)
    }

    /// Fire every armed alert whose budget utilization reached its
    /// threshold. Each alert fires at most once until re-armed.
    pub fn check_alerts(&self) -> Vec<BudgetAlertEvent> {
        let limits: HashMap<String, f64> = self
            .budgets
            .read()
            .iter()
            .map(|(key, budget)| (key.clone(), budget.limit))
            .collect();
        if limits.is_empty() {
            return Vec::new();
        }
        let costs: HashMap<String, f64> = limits
            .keys()
            .map(|key| (key.clone(), self.current_cost(key)))
            .collect();

        let now = Utc::now();
        let mut events = Vec::new();
        {
            let mut alerts = self.alerts.lock();
            for alert in alerts.iter_mut().filter(|a| !a.fired) {
                let (Some(limit), Some(cost)) =
                    (limits.get(&alert.budget_key), costs.get(&alert.budget_key))
                else {
                    continue;
                };
                let utilization = cost / limit * 100.0;
                if utilization >= alert.threshold_percent {
                    alert.fired = true;
                    alert.fired_at = Some(now);
                    events.push(BudgetAlertEvent {
                        alert: alert.clone(),
                        utilization_percent: utilization,
                        current_cost: *cost,
                    });
                }
            }
        }

        if !events.is_empty() {
            let sinks = self.sinks.read().clone();
            for event in &events {
                warn!(
                    budget = %event.alert.budget_key,
                    utilization = event.utilization_percent,
                    cost = event.current_cost,
                    "{}",
                    event.alert.message
                );
                for sink in &sinks {
                    sink(event);
                }
                // No subscribers is fine
                let _ = self.sender.send(event.clone());
            }
        }

        events
    }
}

impl std::fmt::Debug for BudgetManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BudgetManager")
            .field("budgets", &*self.budgets.read())
            .field("alerts", &*self.alerts.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::TokenUsageInfo;
    use std::sync::atomic::AtomicUsize;

    fn spend(costs: &CostTracker, provider: &str, cost: f64) {
        costs.record_usage(
            provider,
            &TokenUsageInfo {
                cost,
                ..Default::default()
            },
        );
    }

    #[test]
    fn test_rejects_bad_input() {
        let manager = BudgetManager::new(Arc::new(CostTracker::new()));
        assert!(manager.set_budget("", 10.0, BudgetPeriod::Daily).is_err());
        assert!(manager.set_budget("p1", 0.0, BudgetPeriod::Daily).is_err());
        assert!(manager.add_alert(-5.0, None).is_err());
    }

    #[test]
    fn test_utilization_global_and_provider() {
        let costs = Arc::new(CostTracker::new());
        let manager = BudgetManager::new(costs.clone());
        manager.set_budget(GLOBAL_BUDGET_KEY, 10.0, BudgetPeriod::Total).unwrap();
        manager.set_budget("p1", 2.0, BudgetPeriod::Daily).unwrap();

        spend(&costs, "p1", 1.0);
        spend(&costs, "p2", 4.0);

        assert!((manager.budget_utilization(GLOBAL_BUDGET_KEY).unwrap() - 50.0).abs() < 1e-9);
        assert!((manager.budget_utilization("p1").unwrap() - 50.0).abs() < 1e-9);
        assert_eq!(manager.budget_utilization("p2"), None);
        assert!(!manager.is_budget_exceeded("p1"));

        spend(&costs, "p1", 1.0);
        assert!(manager.is_budget_exceeded("p1"));
    }

    #[test]
    fn test_alert_fires_once() {
        let costs = Arc::new(CostTracker::new());
        let manager = BudgetManager::new(costs.clone());
        manager.set_budget(GLOBAL_BUDGET_KEY, 10.0, BudgetPeriod::Monthly).unwrap();
        manager.add_alert(80.0, Some("80% spent".into())).unwrap();

        spend(&costs, "p1", 7.0);
        assert!(manager.check_alerts().is_empty());

        spend(&costs, "p1", 1.5);
        let events = manager.check_alerts();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].alert.message, "80% spent");
        assert!((events[0].utilization_percent - 85.0).abs() < 1e-9);

        spend(&costs, "p1", 1.0);
        assert!(manager.check_alerts().is_empty());

        manager.reset_alerts();
        assert_eq!(manager.check_alerts().len(), 1);
    }

    #[test]
    fn test_alert_without_budget_never_fires() {
        let costs = Arc::new(CostTracker::new());
        let manager = BudgetManager::new(costs.clone());
        manager.add_alert_for("p9", 1.0, None).unwrap();
        spend(&costs, "p9", 100.0);
        assert!(manager.check_alerts().is_empty());
    }

    #[tokio::test]
    async fn test_delivery_to_subscribers_and_sinks() {
        let costs = Arc::new(CostTracker::new());
        let manager = BudgetManager::new(costs.clone());
        manager.set_budget("p1", 1.0, BudgetPeriod::Total).unwrap();
        manager.add_alert_for("p1", 50.0, None).unwrap();

        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = delivered.clone();
        manager.on_alert(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let mut rx = manager.subscribe();

        spend(&costs, "p1", 0.6);
        manager.check_alerts();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.alert.budget_key, "p1");
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_period_end() {
        let manager = BudgetManager::new(Arc::new(CostTracker::new()));
        manager.set_budget("p1", 1.0, BudgetPeriod::Weekly).unwrap();
        manager.set_budget("p2", 1.0, BudgetPeriod::Total).unwrap();

        let weekly = manager.budget("p1").unwrap();
        assert_eq!(
            weekly.period_end().unwrap() - weekly.started_at,
            ChronoDuration::days(7)
        );
        assert_eq!(manager.budget("p2").unwrap().period_end(), None);
        assert!(manager.remove_budget("p2").is_some());
    }
}

//! Resilience patterns for switchyard-runtime.
//!
//! This module provides:
//! - Per-provider circuit breakers
//! - Retry with exponential backoff
//! - Ordered failover across candidates
//! - Cost accounting and budget alerts

mod budget;
mod circuit_breaker;
mod cost;
mod failover;
mod retry;

pub use budget::{
    Budget, BudgetAlert, BudgetAlertEvent, BudgetManager, BudgetPeriod, GLOBAL_BUDGET_KEY,
};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitMetrics, CircuitState, CircuitStatus,
};
pub use cost::{infer_provider_from_model, CostTracker, TokenUsageInfo, UsageSummary};
pub use failover::{FailoverHandler, FailoverSuccess};
pub use retry::{RetryConfig, RetryPolicy};

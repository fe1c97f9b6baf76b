//! Circuit breaker to stop calling providers that keep failing.
//!
//! When a provider fails repeatedly, its circuit opens and failover skips
//! it without a call until the recovery timeout has passed.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::providers::ProviderError;

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures before opening circuit
    pub failure_threshold: u32,

    /// Successes in half-open needed to close circuit
    pub success_threshold: u32,

    /// Time before attempting recovery
    #[serde(with = "crate::config::duration_serde")]
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

/// State of a circuit.
#[derive(Debug, Clone)]
pub enum CircuitState {
    /// Normal operation
    Closed { failures: u32 },

    /// Circuit is open, calls are rejected
    Open { opened_at: Instant },

    /// Testing if circuit can close
    HalfOpen { successes: u32 },
}

/// Reportable circuit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

impl From<&CircuitState> for CircuitStatus {
    fn from(state: &CircuitState) -> Self {
        match state {
            CircuitState::Closed { .. } => CircuitStatus::Closed,
            CircuitState::Open { .. } => CircuitStatus::Open,
            CircuitState::HalfOpen { .. } => CircuitStatus::HalfOpen,
        }
    }
}

/// Point-in-time view of one provider's circuit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitMetrics {
    pub status: CircuitStatus,

    /// Consecutive failures while closed
    pub failure_count: u32,

    pub last_failure: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct Circuit {
    state: CircuitState,
    last_failure: Option<DateTime<Utc>>,
}

impl Default for Circuit {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed { failures: 0 },
            last_failure: None,
        }
    }
}

/// Per-provider circuit breakers.
///
/// Each provider has its own circuit so one outage does not affect routing
/// to the others. Circuits are created on first use and are never removed.
/// The lock is held only for state transitions, never across a provider
/// call.
pub struct CircuitBreaker {
    circuits: RwLock<HashMap<String, Circuit>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a new circuit breaker.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            circuits: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `action` through the provider's circuit.
    ///
    /// Rejected calls return [`ProviderError::CircuitOpen`] without running
    /// the action and are not counted as failures. Cancellation is not
    /// counted either.
    pub async fn execute<T, F, Fut>(&self, provider: &str, action: F) -> Result<T, ProviderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        if !self.try_acquire(provider) {
            return Err(ProviderError::CircuitOpen(provider.to_string()));
        }

        let result = action().await;
        match &result {
            Ok(_) => self.record_success(provider),
            Err(ProviderError::Cancelled) => {}
            Err(_) => self.record_failure(provider),
        }
        result
    }

    /// Whether a call may go through now.
    ///
    /// An open circuit past its recovery timeout moves to half-open and
    /// admits the call.
    pub fn try_acquire(&self, provider: &str) -> bool {
        let mut circuits = self.circuits.write();
        let circuit = circuits.entry(provider.to_string()).or_default();
        match circuit.state {
            CircuitState::Open { opened_at } => {
                if opened_at.elapsed() >= self.config.recovery_timeout {
                    circuit.state = CircuitState::HalfOpen { successes: 0 };
                    tracing::info!(provider, "Circuit transitioning to half-open for recovery test");
                    true
                } else {
                    false
                }
            }
            _ => true,
        }
    }

    /// Check if circuit is open for a provider, without transitioning it.
    pub fn is_open(&self, provider: &str) -> bool {
        let circuits = self.circuits.read();
        match circuits.get(provider).map(|c| &c.state) {
            Some(CircuitState::Open { opened_at }) => {
                opened_at.elapsed() < self.config.recovery_timeout
            }
            _ => false,
        }
    }

    /// Record a successful call.
    pub fn record_success(&self, provider: &str) {
        let mut circuits = self.circuits.write();
        let circuit = circuits.entry(provider.to_string()).or_default();
        match circuit.state {
            CircuitState::HalfOpen { successes } => {
                if successes + 1 >= self.config.success_threshold {
                    circuit.state = CircuitState::Closed { failures: 0 };
                    tracing::info!(provider, "Circuit closed after successful recovery");
                } else {
                    circuit.state = CircuitState::HalfOpen {
                        successes: successes + 1,
                    };
                }
            }
            CircuitState::Closed { .. } => {
                circuit.state = CircuitState::Closed { failures: 0 };
            }
            // A call admitted before the circuit opened finished late
            CircuitState::Open { .. } => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self, provider: &str) {
        let mut circuits = self.circuits.write();
        let circuit = circuits.entry(provider.to_string()).or_default();
        circuit.last_failure = Some(Utc::now());
        match circuit.state {
            CircuitState::Closed { failures } => {
                if failures + 1 >= self.config.failure_threshold {
                    circuit.state = CircuitState::Open {
                        opened_at: Instant::now(),
                    };
                    tracing::warn!(
                        provider,
                        failures = failures + 1,
                        "Circuit opened after repeated failures"
                    );
                } else {
                    circuit.state = CircuitState::Closed {
                        failures: failures + 1,
                    };
                }
            }
            CircuitState::HalfOpen { .. } => {
                circuit.state = CircuitState::Open {
                    opened_at: Instant::now(),
                };
                tracing::warn!(provider, "Circuit reopened after failed recovery attempt");
            }
            CircuitState::Open { .. } => {}
        }
    }

    /// Get current state of a circuit.
    pub fn state(&self, provider: &str) -> CircuitState {
        self.circuits
            .read()
            .get(provider)
            .map(|c| c.state.clone())
            .unwrap_or(CircuitState::Closed { failures: 0 })
    }

    pub fn metrics(&self, provider: &str) -> CircuitMetrics {
        let circuits = self.circuits.read();
        match circuits.get(provider) {
            Some(circuit) => CircuitMetrics {
                status: CircuitStatus::from(&circuit.state),
                failure_count: match circuit.state {
                    CircuitState::Closed { failures } => failures,
                    _ => 0,
                },
                last_failure: circuit.last_failure,
            },
            None => CircuitMetrics {
                status: CircuitStatus::Closed,
                failure_count: 0,
                last_failure: None,
            },
        }
    }

    /// Close one provider's circuit. Returns false if it was never used.
    pub fn reset(&self, provider: &str) -> bool {
        let mut circuits = self.circuits.write();
        match circuits.get_mut(provider) {
            Some(circuit) => {
                *circuit = Circuit::default();
                tracing::info!(provider, "Circuit manually reset");
                true
            }
            None => false,
        }
    }

    /// Reset all circuits to closed.
    pub fn reset_all(&self) {
        for circuit in self.circuits.write().values_mut() {
            *circuit = Circuit::default();
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn breaker(failure_threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold,
            success_threshold: 2,
            recovery_timeout: Duration::from_secs(30),
        })
    }

    #[tokio::test]
    async fn test_circuit_starts_closed() {
        let cb = CircuitBreaker::default();
        assert!(!cb.is_open("p1"));
        assert_eq!(cb.metrics("p1").status, CircuitStatus::Closed);
    }

    #[tokio::test]
    async fn test_circuit_opens_after_failures() {
        let cb = breaker(2);

        cb.record_failure("p1");
        assert!(!cb.is_open("p1"));

        cb.record_failure("p1");
        assert!(cb.is_open("p1"));
        assert!(cb.metrics("p1").last_failure.is_some());
    }

    #[tokio::test]
    async fn test_success_resets_failures() {
        let cb = breaker(3);

        cb.record_failure("p1");
        cb.record_failure("p1");
        cb.record_success("p1");
        assert_eq!(cb.metrics("p1").failure_count, 0);

        cb.record_failure("p1");
        cb.record_failure("p1");
        assert!(!cb.is_open("p1"));
    }

    #[tokio::test]
    async fn test_providers_are_independent() {
        let cb = breaker(2);
        cb.record_failure("p1");
        cb.record_failure("p1");

        assert!(cb.is_open("p1"));
        assert!(!cb.is_open("p2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_through_half_open() {
        let cb = breaker(1);
        cb.record_failure("p1");
        assert!(!cb.try_acquire("p1"));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cb.try_acquire("p1"));
        assert_eq!(cb.metrics("p1").status, CircuitStatus::HalfOpen);

        cb.record_success("p1");
        assert_eq!(cb.metrics("p1").status, CircuitStatus::HalfOpen);
        cb.record_success("p1");
        assert_eq!(cb.metrics("p1").status, CircuitStatus::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let cb = breaker(1);
        cb.record_failure("p1");
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cb.try_acquire("p1"));

        cb.record_failure("p1");
        assert_eq!(cb.metrics("p1").status, CircuitStatus::Open);
        assert!(!cb.try_acquire("p1"));
    }

    #[tokio::test]
    async fn test_execute_rejects_without_calling() {
        let cb = breaker(1);
        cb.record_failure("p1");

        let mut called = false;
        let result: Result<(), _> = cb
            .execute("p1", || {
                called = true;
                async { Ok(()) }
            })
            .await;

        assert!(matches!(result, Err(ProviderError::CircuitOpen(ref p)) if p == "p1"));
        assert!(!called);
    }

    #[tokio::test]
    async fn test_cancellation_not_counted() {
        let cb = breaker(1);
        let result: Result<(), _> = cb
            .execute("p1", || async { Err(ProviderError::Cancelled) })
            .await;
        assert!(result.is_err());
        assert_eq!(cb.metrics("p1").status, CircuitStatus::Closed);
    }

    #[tokio::test]
    async fn test_manual_reset() {
        let cb = breaker(1);
        cb.record_failure("p1");
        assert!(cb.reset("p1"));
        assert!(!cb.is_open("p1"));
        assert!(!cb.reset("never-used"));
    }

    proptest! {
        // Without time passing, the circuit is open exactly when the
        // failure threshold was reached while closed.
        #[test]
        fn prop_opens_only_at_threshold(outcomes in proptest::collection::vec(any::<bool>(), 0..40)) {
            let threshold = 3;
            let cb = breaker(threshold);
            let mut consecutive = 0;
            let mut open = false;
            for ok in outcomes {
                if ok {
                    cb.record_success("p");
                    if !open {
                        consecutive = 0;
                    }
                } else {
                    cb.record_failure("p");
                    if !open {
                        consecutive += 1;
                        if consecutive >= threshold {
                            open = true;
                        }
                    }
                }
                prop_assert_eq!(cb.metrics("p").status == CircuitStatus::Open, open);
            }
        }
    }
}

//! Ordered failover across provider candidates.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{CircuitBreaker, RetryPolicy};
use crate::error::{CandidateFailure, OrchestratorError};
use crate::providers::{LlmProvider, ProviderEntry, ProviderError};

/// A call that some candidate answered.
#[derive(Debug)]
pub struct FailoverSuccess<T> {
    pub value: T,

    /// Provider that answered
    pub provider: String,

    /// Wall time of the answering attempt, retries included
    pub latency: Duration,

    /// Candidates tried before the answering one
    pub failures: Vec<CandidateFailure>,
}

/// Tries candidates in order until one answers.
///
/// Each attempt runs through the provider's circuit. With a retry policy,
/// retries happen inside the circuit, so a provider that exhausts its
/// retries counts as one failure.
pub struct FailoverHandler {
    breaker: Arc<CircuitBreaker>,
    retry: Option<RetryPolicy>,
}

impl FailoverHandler {
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            breaker,
            retry: None,
        }
    }

    /// Retry each candidate before moving on.
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Run `action` against each candidate in order.
    ///
    /// Candidates with an empty name are skipped. The first success wins.
    /// When every candidate fails, the error lists each failure in
    /// candidate order. An empty candidate list yields
    /// [`OrchestratorError::NoCandidates`].
    pub async fn execute<T, F, Fut>(
        &self,
        candidates: &[ProviderEntry],
        cancel: &CancellationToken,
        action: F,
    ) -> Result<FailoverSuccess<T>, OrchestratorError>
    where
        F: Fn(Arc<dyn LlmProvider>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, ProviderError>> + Send,
        T: Send,
    {
        let mut failures = Vec::new();

        for candidate in candidates {
            if cancel.is_cancelled() {
                return Err(OrchestratorError::Cancelled);
            }

            let name = candidate.name();
            if name.trim().is_empty() {
                warn!("Skipping failover candidate with empty name");
                continue;
            }

            let started = Instant::now();
            let result = self
                .breaker
                .execute(name, || self.attempt(name, &candidate.client, &action, cancel))
                .await;

            match result {
                Ok(value) => {
                    if !failures.is_empty() {
                        debug!(provider = name, skipped = failures.len(), "Failover succeeded");
                    }
                    return Ok(FailoverSuccess {
                        value,
                        provider: name.to_string(),
                        latency: started.elapsed(),
                        failures,
                    });
                }
                Err(ProviderError::Cancelled) => return Err(OrchestratorError::Cancelled),
                Err(err) => {
                    warn!(provider = name, error = %err, "Provider failed, trying next candidate");
                    failures.push(CandidateFailure {
                        provider: name.to_string(),
                        circuit_open: matches!(err, ProviderError::CircuitOpen(_)),
                        reason: err.to_string(),
                    });
                }
            }
        }

        if failures.is_empty() {
            Err(OrchestratorError::NoCandidates)
        } else {
            Err(OrchestratorError::AllProvidersFailed { failures })
        }
    }

    async fn attempt<T, F, Fut>(
        &self,
        name: &str,
        client: &Arc<dyn LlmProvider>,
        action: &F,
        cancel: &CancellationToken,
    ) -> Result<T, ProviderError>
    where
        F: Fn(Arc<dyn LlmProvider>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, ProviderError>> + Send,
        T: Send,
    {
        let call = || {
            let fut = action(client.clone());
            async move {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(ProviderError::Cancelled),
                    result = fut => result,
                }
            }
        };

        match &self.retry {
            Some(policy) => policy.execute_cancellable(name, call, cancel).await,
            None => call().await,
        }
    }
}

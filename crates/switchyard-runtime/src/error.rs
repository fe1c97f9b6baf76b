//! Errors surfaced by the runtime.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::providers::ProviderError;

/// Why one failover candidate did not answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateFailure {
    pub provider: String,
    pub reason: String,

    /// The provider's circuit was open, so it was never called
    pub circuit_open: bool,
}

impl fmt::Display for CandidateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.provider, self.reason)
    }
}

/// Why one reasoning layer produced no result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerFailure {
    pub layer: String,
    pub reason: String,
}

impl fmt::Display for LayerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.layer, self.reason)
    }
}

pub(crate) fn describe_failures<T: fmt::Display>(failures: &[T]) -> String {
    if failures.is_empty() {
        return "no attempts".to_string();
    }
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors from orchestration.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("No provider available for this request")]
    NoCandidates,

    #[error("All {} providers failed: {}", .failures.len(), describe_failures(.failures))]
    AllProvidersFailed { failures: Vec<CandidateFailure> },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("No reasoning layers registered")]
    NoLayers,

    #[error("All {} reasoning layers failed: {}", .failures.len(), describe_failures(.failures))]
    AllLayersFailed { failures: Vec<LayerFailure> },

    #[error("Provider error: {0}")]
    Provider(ProviderError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<ProviderError> for OrchestratorError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Cancelled => OrchestratorError::Cancelled,
            ProviderError::Exhausted(failures) => OrchestratorError::AllProvidersFailed { failures },
            other => OrchestratorError::Provider(other),
        }
    }
}

impl From<OrchestratorError> for ProviderError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::Cancelled => ProviderError::Cancelled,
            OrchestratorError::AllProvidersFailed { failures } => ProviderError::Exhausted(failures),
            OrchestratorError::Provider(inner) => inner,
            other => ProviderError::NotConfigured(other.to_string()),
        }
    }
}

/// Errors loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_message_lists_every_failure() {
        let err = OrchestratorError::AllProvidersFailed {
            failures: vec![
                CandidateFailure {
                    provider: "p1".into(),
                    reason: "Timeout after 1s".into(),
                    circuit_open: false,
                },
                CandidateFailure {
                    provider: "p2".into(),
                    reason: "Authentication failed".into(),
                    circuit_open: false,
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("All 2 providers failed"));
        assert!(msg.contains("p1: Timeout after 1s"));
        assert!(msg.contains("p2: Authentication failed"));
    }

    #[test]
    fn test_exhaustion_survives_provider_boundary() {
        let failures = vec![CandidateFailure {
            provider: "p1".into(),
            reason: "down".into(),
            circuit_open: true,
        }];
        let as_provider: ProviderError = OrchestratorError::AllProvidersFailed {
            failures: failures.clone(),
        }
        .into();
        let back: OrchestratorError = as_provider.into();
        match back {
            OrchestratorError::AllProvidersFailed { failures: f } => assert_eq!(f, failures),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_cancellation_maps_both_ways() {
        assert!(matches!(
            OrchestratorError::from(ProviderError::Cancelled),
            OrchestratorError::Cancelled
        ));
        assert!(matches!(
            ProviderError::from(OrchestratorError::Cancelled),
            ProviderError::Cancelled
        ));
    }
}

//! Runtime configuration.
//!
//! Loaded from YAML. Every section and field has a default, so an empty
//! document is a valid configuration. Durations are human-readable
//! (`30s`, `500ms`, `1m`); bare integers are read as seconds.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::ConfigError;
use crate::fault_handler::FaultHandlerConfig;
use crate::neurochain::NeuroChainConfig;
use crate::providers::{Capabilities, Pricing, ProviderMetadata};
use crate::resilience::{CircuitBreakerConfig, RetryConfig};
use crate::selection::SelectionStrategy;

/// Serde adapter for human-readable durations.
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(text) => humantime::parse_duration(text.trim()).map_err(serde::de::Error::custom),
        }
    }
}

/// Orchestrator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub default_strategy: SelectionStrategy,

    /// Candidates tried per call; 0 means all
    pub max_candidates: usize,

    #[serde(with = "duration_serde")]
    pub health_check_interval: Duration,

    /// Upper bound on a single provider health check
    #[serde(with = "duration_serde")]
    pub health_check_timeout: Duration,

    /// Per-provider retry inside the circuit breaker; off when absent
    pub retry: Option<RetryConfig>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_strategy: SelectionStrategy::Priority,
            max_candidates: 5,
            health_check_interval: Duration::from_secs(60),
            health_check_timeout: Duration::from_secs(10),
            retry: None,
        }
    }
}

/// Declarative provider registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSpec {
    pub name: String,

    /// Factory type
    #[serde(rename = "type")]
    pub provider_type: String,

    #[serde(default = "default_priority")]
    pub priority: u32,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub display_name: Option<String>,

    #[serde(default)]
    pub capabilities: Capabilities,

    #[serde(default)]
    pub pricing: Pricing,

    /// Factory-specific settings
    #[serde(default)]
    pub config: JsonValue,
}

fn default_priority() -> u32 {
    100
}

fn default_enabled() -> bool {
    true
}

impl ProviderSpec {
    pub fn metadata(&self) -> ProviderMetadata {
        let mut metadata = ProviderMetadata::new(self.name.clone())
            .with_type(self.provider_type.clone())
            .with_priority(self.priority)
            .with_capabilities(self.capabilities)
            .with_pricing(self.pricing);
        if let Some(display_name) = &self.display_name {
            metadata = metadata.with_display_name(display_name.clone());
        }
        metadata.enabled = self.enabled;
        metadata
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub orchestrator: OrchestratorConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub fault_handler: FaultHandlerConfig,
    pub neurochain: NeuroChainConfig,
    pub providers: Vec<ProviderSpec>,
}

impl RuntimeConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml(&yaml)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let breaker = &self.circuit_breaker;
        if breaker.failure_threshold == 0 || breaker.success_threshold == 0 {
            return Err(ConfigError::Invalid(
                "circuit_breaker thresholds must be greater than zero".into(),
            ));
        }

        if let Some(retry) = &self.orchestrator.retry {
            if retry.backoff_multiplier < 1.0 {
                return Err(ConfigError::Invalid(format!(
                    "retry.backoff_multiplier must be at least 1, got {}",
                    retry.backoff_multiplier
                )));
            }
            if retry.initial_delay > retry.max_delay {
                return Err(ConfigError::Invalid(
                    "retry.initial_delay must not exceed retry.max_delay".into(),
                ));
            }
        }

        if self.orchestrator.health_check_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "orchestrator.health_check_interval must be positive".into(),
            ));
        }

        if self.fault_handler.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "fault_handler.max_retries must be at least 1".into(),
            ));
        }
        check_unit("fault_handler.default_min_confidence", self.fault_handler.default_min_confidence)?;
        check_unit("neurochain.early_stop_threshold", self.neurochain.early_stop_threshold)?;

        let mut names = HashSet::new();
        for spec in &self.providers {
            if spec.name.trim().is_empty() {
                return Err(ConfigError::Invalid("provider name must not be empty".into()));
            }
            if !names.insert(spec.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate provider name '{}'",
                    spec.name
                )));
            }
        }

        Ok(())
    }
}

fn check_unit(field: &str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!("{field} must be in [0, 1], got {value}")))
    }
}

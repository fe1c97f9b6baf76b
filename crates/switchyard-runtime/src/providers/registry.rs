//! Registered providers and what the orchestrator knows about them.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::info;

use super::{LlmProvider, ProviderMetadata};
use crate::error::OrchestratorError;
use crate::health::ProviderHealth;

/// Weight of the newest sample in the latency average.
const LATENCY_EWMA_ALPHA: f64 = 0.3;

/// One registered provider.
#[derive(Clone)]
pub struct ProviderEntry {
    pub client: Arc<dyn LlmProvider>,
    pub metadata: ProviderMetadata,
    pub health: ProviderHealth,

    /// Exponentially weighted latency of successful calls, in milliseconds
    pub latency_ms: Option<f64>,

    /// Registration order, used as the last tie-breaker
    pub seq: u64,
}

impl ProviderEntry {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

impl fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderEntry")
            .field("metadata", &self.metadata)
            .field("health", &self.health)
            .field("latency_ms", &self.latency_ms)
            .field("seq", &self.seq)
            .finish()
    }
}

/// Name-keyed provider table.
///
/// Every method takes the lock for the duration of a map operation only.
/// Callers work on cloned [`ProviderEntry`] snapshots.
#[derive(Default)]
pub struct ProviderRegistry {
    entries: RwLock<HashMap<String, ProviderEntry>>,
    next_seq: AtomicU64,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider, replacing any existing entry with the same name.
    pub fn register(
        &self,
        client: Arc<dyn LlmProvider>,
        metadata: ProviderMetadata,
    ) -> Result<(), OrchestratorError> {
        let name = metadata.name.trim().to_string();
        if name.is_empty() {
            return Err(OrchestratorError::InvalidArgument(
                "provider name must not be empty".into(),
            ));
        }

        let entry = ProviderEntry {
            client,
            metadata: ProviderMetadata { name: name.clone(), ..metadata },
            health: ProviderHealth::default(),
            latency_ms: None,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };

        let replaced = self.entries.write().insert(name.clone(), entry).is_some();
        info!(provider = %name, replaced, "Provider registered");
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> Result<ProviderMetadata, OrchestratorError> {
        let removed = self
            .entries
            .write()
            .remove(name)
            .ok_or_else(|| OrchestratorError::ProviderNotFound(name.to_string()))?;
        info!(provider = %name, "Provider unregistered");
        Ok(removed.metadata)
    }

    pub fn get(&self, name: &str) -> Option<ProviderEntry> {
        self.entries.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    /// All entries in registration order.
    pub fn snapshot(&self) -> Vec<ProviderEntry> {
        let mut entries: Vec<_> = self.entries.read().values().cloned().collect();
        entries.sort_by_key(|e| e.seq);
        entries
    }

    pub fn names(&self) -> Vec<String> {
        self.snapshot().into_iter().map(|e| e.metadata.name).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), OrchestratorError> {
        self.update(name, |entry| entry.metadata.enabled = enabled)?;
        info!(provider = %name, enabled, "Provider availability changed");
        Ok(())
    }

    pub fn set_priority(&self, name: &str, priority: u32) -> Result<(), OrchestratorError> {
        self.update(name, |entry| entry.metadata.priority = priority)
    }

    /// Fold a successful call's latency into the provider's average.
    pub fn record_latency(&self, name: &str, latency: Duration) {
        let sample = latency.as_secs_f64() * 1000.0;
        let _ = self.update(name, |entry| {
            entry.latency_ms = Some(match entry.latency_ms {
                Some(avg) => LATENCY_EWMA_ALPHA * sample + (1.0 - LATENCY_EWMA_ALPHA) * avg,
                None => sample,
            });
        });
    }

    pub fn record_health(&self, name: &str, health: ProviderHealth) {
        let _ = self.update(name, |entry| entry.health = health);
    }

    fn update(
        &self,
        name: &str,
        apply: impl FnOnce(&mut ProviderEntry),
    ) -> Result<(), OrchestratorError> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(name)
            .ok_or_else(|| OrchestratorError::ProviderNotFound(name.to_string()))?;
        apply(entry);
        Ok(())
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{
        ChatMessage, CompletionConfig, CompletionResponse, ProviderError, TokenUsage,
    };
    use async_trait::async_trait;

    struct Idle;

    #[async_trait]
    impl LlmProvider for Idle {
        async fn complete(
            &self,
            _messages: Vec<ChatMessage>,
            _config: &CompletionConfig,
        ) -> Result<CompletionResponse, ProviderError> {
            Ok(CompletionResponse::new("", "idle", TokenUsage::default()))
        }

        async fn health_check(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "idle"
        }
    }

    #[test]
    fn test_register_rejects_empty_name() {
        let registry = ProviderRegistry::new();
        let err = registry
            .register(Arc::new(Idle), ProviderMetadata::new("  "))
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidArgument(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_keeps_registration_order() {
        let registry = ProviderRegistry::new();
        for name in ["c", "a", "b"] {
            registry.register(Arc::new(Idle), ProviderMetadata::new(name)).unwrap();
        }
        assert_eq!(registry.names(), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_enable_disable_and_priority() {
        let registry = ProviderRegistry::new();
        registry.register(Arc::new(Idle), ProviderMetadata::new("p1")).unwrap();

        registry.set_enabled("p1", false).unwrap();
        registry.set_priority("p1", 7).unwrap();
        let entry = registry.get("p1").unwrap();
        assert!(!entry.metadata.enabled);
        assert_eq!(entry.metadata.priority, 7);

        assert!(matches!(
            registry.set_enabled("nope", true),
            Err(OrchestratorError::ProviderNotFound(_))
        ));
    }

    #[test]
    fn test_latency_average() {
        let registry = ProviderRegistry::new();
        registry.register(Arc::new(Idle), ProviderMetadata::new("p1")).unwrap();

        registry.record_latency("p1", Duration::from_millis(100));
        assert_eq!(registry.get("p1").unwrap().latency_ms, Some(100.0));

        registry.record_latency("p1", Duration::from_millis(200));
        let avg = registry.get("p1").unwrap().latency_ms.unwrap();
        assert!((avg - 130.0).abs() < 1e-6);
    }

    #[test]
    fn test_unregister() {
        let registry = ProviderRegistry::new();
        registry.register(Arc::new(Idle), ProviderMetadata::new("p1")).unwrap();
        assert_eq!(registry.unregister("p1").unwrap().name, "p1");
        assert!(registry.unregister("p1").is_err());
    }
}

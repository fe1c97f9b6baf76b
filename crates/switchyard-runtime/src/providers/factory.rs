//! Factories that build provider clients from configuration.
//!
//! A deployment names its backends in YAML (see [`crate::config`]); each
//! entry carries a `type` that selects a factory registered here.
//!
//! ```ignore
//! let mut factories = ProviderFactoryRegistry::new();
//! factories.register(Arc::new(LocalModelFactory));
//!
//! let client = factories.create("local", "local-llama", &config)?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use super::{LlmProvider, ProviderError};

/// Builds one kind of provider client.
pub trait ProviderFactory: Send + Sync {
    /// Type identifier matched against the config's `type` field.
    fn provider_type(&self) -> &'static str;

    /// Create a client named `name` from backend-specific settings.
    fn create(&self, name: &str, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError>;

    /// Check settings without building a client.
    fn validate_config(&self, _config: &JsonValue) -> Result<(), ProviderError> {
        Ok(())
    }

    fn description(&self) -> &'static str {
        "LLM provider"
    }
}

/// Factories keyed by provider type.
#[derive(Default, Clone)]
pub struct ProviderFactoryRegistry {
    factories: BTreeMap<String, Arc<dyn ProviderFactory>>,
}

impl ProviderFactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any with the same type.
    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) {
        self.factories
            .insert(factory.provider_type().to_string(), factory);
    }

    /// Build a client of `provider_type`.
    pub fn create(
        &self,
        provider_type: &str,
        name: &str,
        config: &JsonValue,
    ) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        let factory = self.factories.get(provider_type).ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "Unknown provider type: '{}'. Available: {:?}",
                provider_type,
                self.available_types()
            ))
        })?;
        factory.validate_config(config)?;
        factory.create(name, config)
    }

    pub fn available_types(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }

    pub fn has_type(&self, provider_type: &str) -> bool {
        self.factories.contains_key(provider_type)
    }
}

impl std::fmt::Debug for ProviderFactoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderFactoryRegistry")
            .field("types", &self.available_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ChatMessage, CompletionConfig, CompletionResponse, TokenUsage};
    use async_trait::async_trait;

    struct StaticProvider {
        name: String,
        reply: String,
    }

    #[async_trait]
    impl LlmProvider for StaticProvider {
        async fn complete(
            &self,
            _messages: Vec<ChatMessage>,
            _config: &CompletionConfig,
        ) -> Result<CompletionResponse, ProviderError> {
            Ok(CompletionResponse::new(
                self.reply.clone(),
                "static",
                TokenUsage::default(),
            ))
        }

        async fn health_check(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    struct StaticFactory;

    impl ProviderFactory for StaticFactory {
        fn provider_type(&self) -> &'static str {
            "static"
        }

        fn create(&self, name: &str, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
            Ok(Arc::new(StaticProvider {
                name: name.to_string(),
                reply: config["reply"].as_str().unwrap_or("ok").to_string(),
            }))
        }

        fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
            if config.get("reply").is_some_and(|r| !r.is_string()) {
                return Err(ProviderError::NotConfigured("reply must be a string".into()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_create_named_client() {
        let mut factories = ProviderFactoryRegistry::new();
        factories.register(Arc::new(StaticFactory));

        let client = factories
            .create("static", "primary", &serde_json::json!({"reply": "hello"}))
            .unwrap();
        assert_eq!(client.name(), "primary");

        let response = client
            .complete(vec![ChatMessage::user("hi")], &CompletionConfig::default())
            .await
            .unwrap();
        assert_eq!(response.content, "hello");
    }

    #[test]
    fn test_unknown_type() {
        let factories = ProviderFactoryRegistry::new();
        match factories.create("missing", "x", &serde_json::json!({})) {
            Err(ProviderError::NotConfigured(msg)) => assert!(msg.contains("Unknown provider type")),
            _ => panic!("expected NotConfigured"),
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut factories = ProviderFactoryRegistry::new();
        factories.register(Arc::new(StaticFactory));
        assert!(factories
            .create("static", "x", &serde_json::json!({"reply": 5}))
            .is_err());
        assert_eq!(factories.available_types(), vec!["static"]);
    }
}

//! Provider orchestrator.
//!
//! The orchestrator is the single entry point for provider calls. It
//! implements:
//! - Candidate selection by strategy, health and capability
//! - Ordered failover through per-provider circuit breakers
//! - Optional per-provider retry with backoff
//! - Cost attribution and budget alerts after every successful call
//!
//! It implements [`LlmProvider`] itself, so anything written against a
//! single backend can run against the whole fleet.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{OrchestratorConfig, ProviderSpec, RuntimeConfig};
use crate::error::{ConfigError, OrchestratorError};
use crate::health::{HealthMonitor, ProviderHealth};
use crate::providers::{
    Capability, ChatMessage, CompletionConfig, CompletionResponse, ImageRequest, ImageResponse,
    LlmProvider, ProviderError, ProviderFactory, ProviderFactoryRegistry, ProviderMetadata,
    ProviderRegistry, SpeechRequest, SpeechResponse, StreamCallback, TokenUsage,
};
use crate::resilience::{
    infer_provider_from_model, BudgetAlert, BudgetAlertEvent, BudgetManager, BudgetPeriod,
    CircuitBreaker, CircuitBreakerConfig, CircuitMetrics, CostTracker, FailoverHandler,
    FailoverSuccess, RetryPolicy, TokenUsageInfo, UsageSummary,
};
use crate::selection::{ProviderSelector, SelectionContext, SelectionStrategy};

/// Per-call overrides of the orchestrator's selection defaults.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub strategy: Option<SelectionStrategy>,
    pub context: Option<SelectionContext>,
}

impl CallOptions {
    pub fn with_strategy(mut self, strategy: SelectionStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_context(mut self, context: SelectionContext) -> Self {
        self.context = Some(context);
        self
    }
}

/// Everything known about one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub metadata: ProviderMetadata,
    pub health: ProviderHealth,
    pub circuit: CircuitMetrics,
    pub latency_ms: Option<f64>,
    pub usage: Option<UsageSummary>,
}

#[derive(Debug, Clone, Default)]
struct SelectionDefaults {
    strategy: SelectionStrategy,
    context: SelectionContext,
}

/// Routes calls across registered providers.
///
/// # Architecture
/// - Registry, breakers, costs and budgets each own a narrow lock
/// - No lock is held across a provider call
/// - Every data call accepts a [`CancellationToken`]; the [`LlmProvider`]
///   impl uses a fresh token per call
pub struct ProviderOrchestrator {
    registry: Arc<ProviderRegistry>,
    breaker: Arc<CircuitBreaker>,
    failover: FailoverHandler,
    selector: ProviderSelector,
    costs: Arc<CostTracker>,
    budgets: BudgetManager,
    health: HealthMonitor,
    factories: RwLock<ProviderFactoryRegistry>,
    defaults: RwLock<SelectionDefaults>,
    config: OrchestratorConfig,
}

impl ProviderOrchestrator {
    /// Create an orchestrator with no providers.
    pub fn new(config: OrchestratorConfig, breaker_config: CircuitBreakerConfig) -> Self {
        let registry = Arc::new(ProviderRegistry::new());
        let breaker = Arc::new(CircuitBreaker::new(breaker_config));
        let mut failover = FailoverHandler::new(breaker.clone());
        if let Some(retry) = &config.retry {
            failover = failover.with_retry(RetryPolicy::new(retry.clone()));
        }
        let costs = Arc::new(CostTracker::new());

        Self {
            health: HealthMonitor::new(registry.clone(), config.health_check_timeout),
            budgets: BudgetManager::new(costs.clone()),
            defaults: RwLock::new(SelectionDefaults {
                strategy: config.default_strategy.clone(),
                context: SelectionContext::default(),
            }),
            registry,
            breaker,
            failover,
            selector: ProviderSelector::new(),
            costs,
            factories: RwLock::new(ProviderFactoryRegistry::new()),
            config,
        }
    }

    /// Build from a full configuration, registering its declared
    /// providers through `factories`.
    pub fn from_config(
        config: &RuntimeConfig,
        factories: ProviderFactoryRegistry,
    ) -> Result<Self, OrchestratorError> {
        config.validate()?;
        let orchestrator = Self::new(config.orchestrator.clone(), config.circuit_breaker.clone());
        *orchestrator.factories.write() = factories;
        orchestrator.register_from_config(&config.providers)?;
        Ok(orchestrator)
    }

    pub fn builder() -> ProviderOrchestratorBuilder {
        ProviderOrchestratorBuilder::new()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    // ---- Registration ----

    pub fn register_provider(
        &self,
        client: Arc<dyn LlmProvider>,
        metadata: ProviderMetadata,
    ) -> Result<(), OrchestratorError> {
        self.registry.register(client, metadata)
    }

    pub fn unregister_provider(&self, name: &str) -> Result<ProviderMetadata, OrchestratorError> {
        self.registry.unregister(name)
    }

    pub fn register_factory(&self, factory: Arc<dyn ProviderFactory>) {
        self.factories.write().register(factory);
    }

    /// Register every declared provider. Returns their names.
    pub fn register_from_config(
        &self,
        specs: &[ProviderSpec],
    ) -> Result<Vec<String>, OrchestratorError> {
        let mut registered = Vec::with_capacity(specs.len());
        for spec in specs {
            let client = self
                .factories
                .read()
                .create(&spec.provider_type, &spec.name, &spec.config)
                .map_err(|e| {
                    ConfigError::Invalid(format!("provider '{}': {}", spec.name, e))
                })?;
            self.registry.register(client, spec.metadata())?;
            registered.push(spec.name.clone());
        }
        Ok(registered)
    }

    pub fn enable_provider(&self, name: &str) -> Result<(), OrchestratorError> {
        self.registry.set_enabled(name, true)
    }

    pub fn disable_provider(&self, name: &str) -> Result<(), OrchestratorError> {
        self.registry.set_enabled(name, false)
    }

    pub fn set_priority(&self, name: &str, priority: u32) -> Result<(), OrchestratorError> {
        self.registry.set_priority(name, priority)
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.registry.names()
    }

    pub fn set_default_strategy(&self, strategy: SelectionStrategy) {
        self.defaults.write().strategy = strategy;
    }

    pub fn set_default_context(&self, context: SelectionContext) {
        self.defaults.write().context = context;
    }

    pub fn default_strategy(&self) -> SelectionStrategy {
        self.defaults.read().strategy.clone()
    }

    /// Candidates a call with `options` would try, in order.
    pub fn candidates(&self, capability: Capability, options: &CallOptions) -> Vec<String> {
        let (strategy, context) = self.resolve(capability, options);
        self.selector
            .select(self.registry.snapshot(), &strategy, self.config.max_candidates, &context)
            .into_iter()
            .map(|e| e.metadata.name)
            .collect()
    }

    // ---- Budgets ----

    pub fn set_budget(
        &self,
        key: &str,
        limit: f64,
        period: BudgetPeriod,
    ) -> Result<(), OrchestratorError> {
        self.budgets.set_budget(key, limit, period)
    }

    pub fn remove_budget(&self, key: &str) -> bool {
        self.budgets.remove_budget(key).is_some()
    }

    /// Alert on global spend.
    pub fn add_budget_alert(
        &self,
        threshold_percent: f64,
        message: Option<String>,
    ) -> Result<u64, OrchestratorError> {
        self.budgets.add_alert(threshold_percent, message)
    }

    pub fn add_provider_budget_alert(
        &self,
        provider: &str,
        threshold_percent: f64,
        message: Option<String>,
    ) -> Result<u64, OrchestratorError> {
        self.budgets.add_alert_for(provider, threshold_percent, message)
    }

    pub fn budget_alerts(&self) -> Vec<BudgetAlert> {
        self.budgets.alerts()
    }

    pub fn subscribe_budget_alerts(&self) -> broadcast::Receiver<BudgetAlertEvent> {
        self.budgets.subscribe()
    }

    pub fn on_budget_alert(&self, sink: impl Fn(&BudgetAlertEvent) + Send + Sync + 'static) {
        self.budgets.on_alert(sink);
    }

    pub fn is_budget_exceeded(&self, key: &str) -> bool {
        self.budgets.is_budget_exceeded(key)
    }

    pub fn budget_utilization(&self, key: &str) -> Option<f64> {
        self.budgets.budget_utilization(key)
    }

    pub fn budgets(&self) -> &BudgetManager {
        &self.budgets
    }

    // ---- Costs ----

    pub fn total_cost(&self) -> f64 {
        self.costs.total_cost()
    }

    /// Cost per provider. Every registered provider is present, at 0.0
    /// when it has recorded no usage.
    pub fn cost_by_provider(&self) -> std::collections::HashMap<String, f64> {
        let mut costs = self.costs.cost_by_provider();
        for name in self.registry.names() {
            costs.entry(name).or_insert(0.0);
        }
        costs
    }

    pub fn usage_summary(&self) -> UsageSummary {
        self.costs.total_usage()
    }

    pub fn reset_costs(&self) {
        self.costs.reset();
    }

    pub fn reset_provider_costs(&self, provider: &str) {
        self.costs.reset_provider(provider);
    }

    /// Record usage that did not go through the orchestrator.
    ///
    /// The provider is guessed from the model name. Returns the provider
    /// the usage was attributed to, or `None` if no guess was possible.
    pub fn record_external_usage(&self, model: &str, usage: TokenUsage) -> Option<String> {
        let provider = infer_provider_from_model(model, &self.registry.names())?;
        let pricing = self
            .registry
            .get(&provider)
            .map(|e| e.metadata.pricing)
            .unwrap_or_default();
        self.record_usage(&provider, &TokenUsageInfo::priced(&usage, model, &pricing));
        Some(provider)
    }

    // ---- Health ----

    pub fn provider_status(&self, name: &str) -> Option<ProviderStatus> {
        let entry = self.registry.get(name)?;
        Some(ProviderStatus {
            circuit: self.breaker.metrics(name),
            usage: self.costs.usage(name),
            metadata: entry.metadata,
            health: entry.health,
            latency_ms: entry.latency_ms,
        })
    }

    pub fn provider_statuses(&self) -> Vec<ProviderStatus> {
        self.registry
            .names()
            .iter()
            .filter_map(|name| self.provider_status(name))
            .collect()
    }

    /// Run every health check once, now.
    pub async fn check_health(&self) -> Vec<(String, ProviderHealth)> {
        self.health.check_all().await
    }

    /// Start periodic health checks; `None` uses the configured interval.
    pub fn start_health_monitoring(
        &self,
        interval: Option<Duration>,
    ) -> Result<(), OrchestratorError> {
        self.health
            .start(interval.unwrap_or(self.config.health_check_interval))
    }

    pub async fn stop_health_monitoring(&self) {
        self.health.stop().await;
    }

    /// Close a provider's circuit.
    pub fn reset_circuit_breaker(&self, name: &str) -> Result<(), OrchestratorError> {
        if !self.registry.contains(name) {
            return Err(OrchestratorError::ProviderNotFound(name.to_string()));
        }
        self.breaker.reset(name);
        Ok(())
    }

    pub fn circuit_metrics(&self, name: &str) -> CircuitMetrics {
        self.breaker.metrics(name)
    }

    // ---- Data calls ----

    pub async fn complete_with(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
        options: &CallOptions,
        cancel: &CancellationToken,
    ) -> Result<CompletionResponse, OrchestratorError> {
        let success = self
            .dispatch(Capability::Chat, options, cancel, |client| {
                let messages = messages.clone();
                async move { client.complete(messages, config).await }
            })
            .await?;
        Ok(self.attribute(success))
    }

    /// Stream a completion.
    ///
    /// Chunks from a provider that fails mid-stream have already been
    /// delivered when failover moves on.
    pub async fn stream_with(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
        on_chunk: StreamCallback,
        options: &CallOptions,
        cancel: &CancellationToken,
    ) -> Result<CompletionResponse, OrchestratorError> {
        let success = self
            .dispatch(Capability::Streaming, options, cancel, |client| {
                let messages = messages.clone();
                let on_chunk = on_chunk.clone();
                async move { client.stream(messages, config, on_chunk).await }
            })
            .await?;
        Ok(self.attribute(success))
    }

    /// Embeddings carry no usage report, so no cost is recorded.
    pub async fn embed_with(
        &self,
        input: &str,
        model: Option<&str>,
        options: &CallOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<f32>, OrchestratorError> {
        let success = self
            .dispatch(Capability::Embeddings, options, cancel, |client| async move {
                client.embed(input, model).await
            })
            .await?;
        Ok(success.value)
    }

    pub async fn generate_image_with(
        &self,
        request: &ImageRequest,
        options: &CallOptions,
        cancel: &CancellationToken,
    ) -> Result<ImageResponse, OrchestratorError> {
        let success = self
            .dispatch(Capability::Images, options, cancel, |client| async move {
                client.generate_image(request).await
            })
            .await?;
        if let Some(usage) = &success.value.usage {
            self.price_and_record(&success.provider, usage, &success.value.model);
        }
        Ok(success.value)
    }

    pub async fn synthesize_speech_with(
        &self,
        request: &SpeechRequest,
        options: &CallOptions,
        cancel: &CancellationToken,
    ) -> Result<SpeechResponse, OrchestratorError> {
        let success = self
            .dispatch(Capability::Speech, options, cancel, |client| async move {
                client.synthesize_speech(request).await
            })
            .await?;
        if let Some(usage) = &success.value.usage {
            self.price_and_record(&success.provider, usage, &success.value.model);
        }
        Ok(success.value)
    }

    fn resolve(
        &self,
        capability: Capability,
        options: &CallOptions,
    ) -> (SelectionStrategy, SelectionContext) {
        let defaults = self.defaults.read();
        let strategy = options
            .strategy
            .clone()
            .unwrap_or_else(|| defaults.strategy.clone());
        let context = options
            .context
            .clone()
            .unwrap_or_else(|| defaults.context.clone())
            .require(capability);
        (strategy, context)
    }

    async fn dispatch<T, F, Fut>(
        &self,
        capability: Capability,
        options: &CallOptions,
        cancel: &CancellationToken,
        action: F,
    ) -> Result<FailoverSuccess<T>, OrchestratorError>
    where
        F: Fn(Arc<dyn LlmProvider>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, ProviderError>> + Send,
        T: Send,
    {
        let (strategy, context) = self.resolve(capability, options);
        let candidates = self.selector.select(
            self.registry.snapshot(),
            &strategy,
            self.config.max_candidates,
            &context,
        );
        debug!(
            ?capability,
            ?strategy,
            candidates = candidates.len(),
            "Dispatching provider call"
        );

        let success = self.failover.execute(&candidates, cancel, action).await?;
        self.registry.record_latency(&success.provider, success.latency);
        Ok(success)
    }

    fn attribute(&self, success: FailoverSuccess<CompletionResponse>) -> CompletionResponse {
        let mut response = success.value;
        let cost = self.price_and_record(&success.provider, &response.usage, &response.model);
        response.cost = Some(cost);
        response.provider = Some(success.provider);
        response
    }

    fn price_and_record(&self, provider: &str, usage: &TokenUsage, model: &str) -> f64 {
        let pricing = self
            .registry
            .get(provider)
            .map(|e| e.metadata.pricing)
            .unwrap_or_default();
        let info = TokenUsageInfo::priced(usage, model, &pricing);
        let cost = info.cost;
        self.record_usage(provider, &info);
        cost
    }

    fn record_usage(&self, provider: &str, usage: &TokenUsageInfo) {
        self.costs.record_usage(provider, usage);
        let fired = self.budgets.check_alerts();
        if !fired.is_empty() {
            info!(provider, alerts = fired.len(), "Budget alerts fired");
        }
    }
}

impl std::fmt::Debug for ProviderOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderOrchestrator")
            .field("providers", &self.registry.names())
            .field("config", &self.config)
            .finish()
    }
}

#[async_trait]
impl LlmProvider for ProviderOrchestrator {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        self.complete_with(messages, config, &CallOptions::default(), &CancellationToken::new())
            .await
            .map_err(ProviderError::from)
    }

    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
        on_chunk: StreamCallback,
    ) -> Result<CompletionResponse, ProviderError> {
        self.stream_with(
            messages,
            config,
            on_chunk,
            &CallOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .map_err(ProviderError::from)
    }

    async fn embed(&self, input: &str, model: Option<&str>) -> Result<Vec<f32>, ProviderError> {
        self.embed_with(input, model, &CallOptions::default(), &CancellationToken::new())
            .await
            .map_err(ProviderError::from)
    }

    async fn generate_image(&self, request: &ImageRequest) -> Result<ImageResponse, ProviderError> {
        self.generate_image_with(request, &CallOptions::default(), &CancellationToken::new())
            .await
            .map_err(ProviderError::from)
    }

    async fn synthesize_speech(
        &self,
        request: &SpeechRequest,
    ) -> Result<SpeechResponse, ProviderError> {
        self.synthesize_speech_with(request, &CallOptions::default(), &CancellationToken::new())
            .await
            .map_err(ProviderError::from)
    }

    /// Healthy while any enabled provider is healthy.
    async fn health_check(&self) -> bool {
        self.registry
            .snapshot()
            .iter()
            .any(|e| e.metadata.enabled && e.health.healthy)
    }

    fn name(&self) -> &str {
        "orchestrator"
    }
}

/// Builder for ProviderOrchestrator.
pub struct ProviderOrchestratorBuilder {
    config: OrchestratorConfig,
    breaker: CircuitBreakerConfig,
    factories: ProviderFactoryRegistry,
    providers: Vec<(Arc<dyn LlmProvider>, ProviderMetadata)>,
}

impl ProviderOrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            config: OrchestratorConfig::default(),
            breaker: CircuitBreakerConfig::default(),
            factories: ProviderFactoryRegistry::new(),
            providers: Vec::new(),
        }
    }

    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker = config;
        self
    }

    pub fn strategy(mut self, strategy: SelectionStrategy) -> Self {
        self.config.default_strategy = strategy;
        self
    }

    pub fn factory(mut self, factory: Arc<dyn ProviderFactory>) -> Self {
        self.factories.register(factory);
        self
    }

    pub fn provider(mut self, client: Arc<dyn LlmProvider>, metadata: ProviderMetadata) -> Self {
        self.providers.push((client, metadata));
        self
    }

    /// Build the orchestrator.
    pub fn build(self) -> Result<ProviderOrchestrator, OrchestratorError> {
        let orchestrator = ProviderOrchestrator::new(self.config, self.breaker);
        *orchestrator.factories.write() = self.factories;
        for (client, metadata) in self.providers {
            orchestrator.register_provider(client, metadata)?;
        }
        Ok(orchestrator)
    }
}

impl Default for ProviderOrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

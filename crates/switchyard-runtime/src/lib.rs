//! # switchyard-runtime
//!
//! Resilient orchestration over many LLM providers.
//!
//! This crate routes each call to one of several interchangeable backends
//! and keeps going when some of them misbehave:
//! - Selection by priority, cost, latency, rotation or pin
//! - Per-provider circuit breakers and optional retry with backoff
//! - Ordered failover with one aggregate error on exhaustion
//! - Cost attribution and budget alerts
//! - Response analysis with corrective retries ([`AdaptiveFaultHandler`])
//! - Multi-layer reasoning with consensus ([`NeuroChainOrchestrator`])
//!
//! ## Key Guarantees
//!
//! 1. **No lock across a provider call**: shared state is read or written
//!    before and after each await, never during
//! 2. **Open circuits are never called**: a rejected candidate costs nothing
//! 3. **Cancellation is cooperative**: every data call takes a token, checked
//!    before each further attempt
//! 4. **Quality failures are not errors**: the fault handler returns its best
//!    attempt
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use switchyard_runtime::{
//!     ChatMessage, CompletionConfig, LlmProvider, ProviderMetadata, ProviderOrchestrator,
//! };
//!
//! let orchestrator = ProviderOrchestrator::builder()
//!     .provider(primary, ProviderMetadata::new("primary").with_priority(1))
//!     .provider(backup, ProviderMetadata::new("backup").with_priority(2))
//!     .build()?;
//!
//! let response = orchestrator
//!     .complete(vec![ChatMessage::user("Hello")], &CompletionConfig::default())
//!     .await?;
//! println!("{} answered", response.provider.unwrap_or_default());
//! ```

pub mod config;
pub mod error;
pub mod fault_handler;
pub mod health;
pub mod logging;
pub mod neurochain;
pub mod orchestrator;
pub mod providers;
pub mod reasoning;
pub mod resilience;
pub mod selection;

#[cfg(test)]
mod test_support;

pub use config::{OrchestratorConfig, ProviderSpec, RuntimeConfig};
pub use error::{CandidateFailure, ConfigError, LayerFailure, OrchestratorError};
pub use fault_handler::{AdaptiveFaultHandler, FaultHandledResponse, FaultHandlerConfig};
pub use health::{HealthMonitor, ProviderHealth};
pub use logging::{init_tracing, LogFormat};
pub use neurochain::{
    CrossValidation, Disagreement, NeuroChainConfig, NeuroChainOrchestrator, NeuroChainResult,
};
pub use orchestrator::{
    CallOptions, ProviderOrchestrator, ProviderOrchestratorBuilder, ProviderStatus,
};
pub use providers::{
    Capabilities, Capability, ChatMessage, CompletionConfig, CompletionResponse, ImageRequest,
    ImageResponse, LlmProvider, Modality, Pricing, ProviderError, ProviderFactory,
    ProviderFactoryRegistry, ProviderMetadata, Role, SpeechRequest, SpeechResponse,
    StreamCallback, TokenUsage,
};
pub use reasoning::{
    LayerKind, ModelLayer, PriorAnswer, ReasoningContext, ReasoningLayer, ReasoningResult,
};
pub use resilience::{
    BudgetAlert, BudgetAlertEvent, BudgetPeriod, CircuitBreakerConfig, CircuitMetrics,
    CircuitStatus, RetryConfig, UsageSummary, GLOBAL_BUDGET_KEY,
};
pub use selection::{SelectionContext, SelectionStrategy};
pub use switchyard_core::{ResponseType, ValidationContext, ValidationResult};

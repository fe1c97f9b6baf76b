//! Provider-backed reasoning layers.

use std::sync::Arc;

use async_trait::async_trait;
use switchyard_core::{ResponseType, ValidationContext};
use tokio::time::Instant;
use tracing::debug;

use super::parse::parse_reasoning;
use super::prompts::build_messages;
use super::{LayerKind, ReasoningContext, ReasoningLayer, ReasoningResult};
use crate::error::OrchestratorError;
use crate::fault_handler::{AdaptiveFaultHandler, FaultHandlerConfig};
use crate::providers::{CompletionConfig, LlmProvider};

/// A layer that asks a provider and parses its reply.
pub struct ModelLayer {
    name: String,
    kind: LayerKind,
    provider: Arc<dyn LlmProvider>,
    settings: CompletionConfig,

    /// Used when the reply carries no confidence
    default_confidence: f64,

    fault_handler: Option<AdaptiveFaultHandler>,
}

impl ModelLayer {
    pub fn new(
        name: impl Into<String>,
        kind: LayerKind,
        provider: Arc<dyn LlmProvider>,
        settings: CompletionConfig,
        default_confidence: f64,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            provider,
            settings,
            default_confidence: default_confidence.clamp(0.0, 1.0),
            fault_handler: None,
        }
    }

    /// Short answers at temperature 0.
    pub fn fast(provider: Arc<dyn LlmProvider>) -> Self {
        Self::new("fast", LayerKind::Fast, provider, settings(256, 0.0), 0.6)
    }

    /// Long, step-by-step answers.
    pub fn deep(provider: Arc<dyn LlmProvider>) -> Self {
        Self::new("deep", LayerKind::Deep, provider, settings(2048, 0.2), 0.75)
    }

    pub fn verification(provider: Arc<dyn LlmProvider>) -> Self {
        Self::new(
            "verification",
            LayerKind::Verification,
            provider,
            settings(1024, 0.0),
            0.7,
        )
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.settings.model = Some(model.into());
        self
    }

    /// Route calls through an [`AdaptiveFaultHandler`] that requires a JSON
    /// reply with an `answer` field.
    pub fn with_fault_handler(mut self, config: FaultHandlerConfig) -> Self {
        self.fault_handler = Some(AdaptiveFaultHandler::with_config(self.provider.clone(), config));
        self
    }
}

fn settings(max_tokens: u32, temperature: f32) -> CompletionConfig {
    CompletionConfig {
        max_tokens,
        temperature,
        ..Default::default()
    }
}

#[async_trait]
impl ReasoningLayer for ModelLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> LayerKind {
        self.kind
    }

    async fn reason(
        &self,
        prompt: &str,
        context: &ReasoningContext,
    ) -> Result<ReasoningResult, OrchestratorError> {
        let messages = build_messages(self.kind, prompt, context);
        let started = Instant::now();

        let (response, content, cost) = match &self.fault_handler {
            Some(handler) => {
                let validation = handler
                    .context_for(prompt)
                    .expecting(ResponseType::Json)
                    .require_field("answer");
                let handled = handler.execute(messages, &self.settings, &validation).await?;
                (handled.response, handled.content, handled.total_cost)
            }
            None => {
                let response = self.provider.complete(messages, &self.settings).await?;
                let content = response.content.clone();
                let cost = response.cost.unwrap_or(0.0);
                (response, content, cost)
            }
        };

        let parsed = parse_reasoning(&content, self.default_confidence);
        let result = ReasoningResult {
            layer: self.name.clone(),
            kind: self.kind,
            provider: response
                .provider
                .clone()
                .or_else(|| Some(self.provider.name().to_string())),
            answer: parsed.answer,
            confidence: parsed.confidence,
            steps: parsed.steps,
            assumptions: parsed.assumptions,
            cost,
            duration: started.elapsed(),
        };

        debug!(
            layer = %result.layer,
            kind = %result.kind,
            confidence = result.confidence,
            "Layer answered"
        );
        Ok(result)
    }
}

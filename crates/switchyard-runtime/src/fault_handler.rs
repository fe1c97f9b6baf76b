//! Adaptive fault handling.
//!
//! Wraps a provider (usually the orchestrator) and checks every response
//! with the analysis suite. Rejected responses are retried with a
//! corrective system message listing what was wrong, and each issue is
//! fed back into the error-pattern catalogue. Quality failures are never
//! errors: when attempts run out the best attempt is returned.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use switchyard_core::{
    AnalysisSuite, ChatMessage, ErrorPattern, Issue, ValidationContext, ValidationResult,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::OrchestratorError;
use crate::providers::{CompletionConfig, CompletionResponse, LlmProvider};

/// Fault handler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultHandlerConfig {
    /// Attempts per turn, including the first
    pub max_retries: u32,

    /// Acceptance threshold for contexts built by [`AdaptiveFaultHandler::context_for`]
    pub default_min_confidence: f64,
}

impl Default for FaultHandlerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            default_min_confidence: 0.7,
        }
    }
}

/// Outcome of one fault-handled turn.
#[derive(Debug, Clone)]
pub struct FaultHandledResponse {
    /// Provider response of the chosen attempt
    pub response: CompletionResponse,

    /// Final text: the corrected text when repaired, else the raw content
    pub content: String,

    /// Analysis of the chosen attempt
    pub validation: ValidationResult,

    pub attempts: u32,

    /// Passed validation and the confidence threshold
    pub accepted: bool,

    /// Content comes from an analyzer's correction
    pub repaired: bool,

    /// Every issue raised, across all attempts
    pub issues: Vec<Issue>,

    /// Summed cost of every priced attempt, rejected ones included
    pub total_cost: f64,
}

struct Attempt {
    response: CompletionResponse,
    validation: ValidationResult,
}

/// Retries a turn until its response passes analysis.
pub struct AdaptiveFaultHandler {
    provider: Arc<dyn LlmProvider>,
    suite: AnalysisSuite,
    config: FaultHandlerConfig,
}

impl AdaptiveFaultHandler {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self::with_config(provider, FaultHandlerConfig::default())
    }

    pub fn with_config(provider: Arc<dyn LlmProvider>, config: FaultHandlerConfig) -> Self {
        Self {
            provider,
            suite: AnalysisSuite::new(),
            config,
        }
    }

    /// Replace the analysis suite.
    pub fn with_suite(mut self, suite: AnalysisSuite) -> Self {
        self.suite = suite;
        self
    }

    pub fn suite(&self) -> &AnalysisSuite {
        &self.suite
    }

    pub fn config(&self) -> &FaultHandlerConfig {
        &self.config
    }

    /// A validation context for `prompt` using the configured threshold.
    pub fn context_for(&self, prompt: impl Into<String>) -> ValidationContext {
        ValidationContext::for_prompt(prompt).with_min_confidence(self.config.default_min_confidence)
    }

    pub async fn execute(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
        context: &ValidationContext,
    ) -> Result<FaultHandledResponse, OrchestratorError> {
        self.execute_with_cancel(messages, config, context, &CancellationToken::new())
            .await
    }

    /// Run one turn.
    ///
    /// Errors only when the first attempt fails at the provider level or
    /// the turn is cancelled. A provider failure after at least one
    /// analyzed attempt ends the loop with the best attempt so far.
    pub async fn execute_with_cancel(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
        context: &ValidationContext,
        cancel: &CancellationToken,
    ) -> Result<FaultHandledResponse, OrchestratorError> {
        let max_attempts = self.config.max_retries.max(1);
        let mut conversation = messages;
        let mut issues = Vec::new();
        let mut best: Option<Attempt> = None;
        let mut attempts = 0;
        let mut total_cost = 0.0;

        while attempts < max_attempts {
            if cancel.is_cancelled() {
                return Err(OrchestratorError::Cancelled);
            }
            attempts += 1;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
                result = self.provider.complete(conversation.clone(), config) => result,
            };
            let response = match result {
                Ok(response) => response,
                Err(e) if best.is_none() => return Err(e.into()),
                Err(e) => {
                    warn!(attempt = attempts, error = %e, "Provider failed during corrective retry");
                    break;
                }
            };

            total_cost += response.cost.unwrap_or(0.0);

            let analysis = self.suite.analyze(&response.content, context);
            let validation = analysis.combined.clone();
            issues.extend(validation.issues.iter().cloned());

            if analysis.is_acceptable(context) {
                debug!(attempt = attempts, confidence = validation.confidence, "Response accepted");
                return Ok(FaultHandledResponse {
                    content: response.content.clone(),
                    response,
                    validation,
                    attempts,
                    accepted: true,
                    repaired: false,
                    issues,
                    total_cost,
                });
            }

            if let Some(corrected) = validation.corrected.clone() {
                info!(attempt = attempts, "Response repaired by analyzer correction");
                return Ok(FaultHandledResponse {
                    content: corrected,
                    response,
                    validation,
                    attempts,
                    accepted: true,
                    repaired: true,
                    issues,
                    total_cost,
                });
            }

            self.learn(&validation.issues);
            if attempts < max_attempts {
                info!(
                    attempt = attempts,
                    issues = validation.issues.len(),
                    confidence = validation.confidence,
                    "Response rejected, retrying with corrections"
                );
                conversation.push(ChatMessage::assistant(response.content.clone()));
                conversation.push(ChatMessage::system(corrective_message(&validation.issues)));
            }

            // Strictly greater: the earliest attempt wins ties
            let better = best
                .as_ref()
                .map(|b| validation.confidence > b.validation.confidence)
                .unwrap_or(true);
            if better {
                best = Some(Attempt {
                    response,
                    validation,
                });
            }
        }

        let Some(best) = best else {
            return Err(OrchestratorError::Cancelled);
        };
        warn!(
            attempts,
            confidence = best.validation.confidence,
            "Attempts exhausted, returning best response"
        );
        let repaired = best.validation.corrected.is_some();
        Ok(FaultHandledResponse {
            content: best
                .validation
                .corrected
                .clone()
                .unwrap_or_else(|| best.response.content.clone()),
            response: best.response,
            validation: best.validation,
            attempts,
            accepted: false,
            repaired,
            issues,
            total_cost,
        })
    }

    fn learn(&self, issues: &[Issue]) {
        let recognizer = self.suite.recognizer();
        for issue in issues {
            if let Err(e) = recognizer.learn_pattern(ErrorPattern::learned_from(issue)) {
                warn!(error = %e, "Could not learn error pattern");
            }
        }
    }
}

fn corrective_message(issues: &[Issue]) -> String {
    let mut message =
        String::from("Your previous response was rejected. Fix these problems and answer again:\n");
    for issue in issues {
        message.push_str(&format!("- {}\n", issue));
    }
    message
}

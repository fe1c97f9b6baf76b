//! NeuroChain: multi-layer reasoning with consensus.
//!
//! Registered layers answer the same prompt. Sequential chains run layers
//! in registration order, hand each layer the answers before it, and may
//! stop early on a confident answer. Parallel chains run every layer at
//! once. With two or more answers, cross-validation picks the majority
//! answer.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{LayerFailure, OrchestratorError};
use crate::providers::LlmProvider;
use crate::reasoning::{
    ModelLayer, PriorAnswer, ReasoningContext, ReasoningLayer, ReasoningResult,
};

/// NeuroChain settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NeuroChainConfig {
    /// Run all layers concurrently; disables early stop
    pub parallel: bool,

    pub cross_validation: bool,
    pub early_stop: bool,

    /// Confidence that ends a sequential chain
    pub early_stop_threshold: f64,

    /// Successful layers required before an early stop
    pub min_layers_before_stop: usize,
}

impl Default for NeuroChainConfig {
    fn default() -> Self {
        Self {
            parallel: false,
            cross_validation: true,
            early_stop: true,
            early_stop_threshold: 0.95,
            min_layers_before_stop: 1,
        }
    }
}

/// A layer whose answer differs from the consensus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disagreement {
    pub layer: String,
    pub answer: String,
}

/// Agreement between layer answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossValidation {
    pub consensus: String,

    /// Fraction of layers agreeing with the consensus
    pub confidence: f64,

    /// Layers agreeing with the consensus
    pub agreements: Vec<String>,

    pub disagreements: Vec<Disagreement>,
}

/// Outcome of one chain run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeuroChainResult {
    pub answer: String,
    pub confidence: f64,

    /// Successful layers, in registration order
    pub layer_results: Vec<ReasoningResult>,

    pub failures: Vec<LayerFailure>,
    pub cross_validation: Option<CrossValidation>,

    /// Stopped before every layer ran
    pub early_stopped: bool,

    pub total_cost: f64,

    /// Sum of layer times when sequential, wall clock when parallel
    pub duration: Duration,
}

/// Runs reasoning layers and combines their answers.
pub struct NeuroChainOrchestrator {
    layers: RwLock<Vec<Arc<dyn ReasoningLayer>>>,
    config: NeuroChainConfig,
}

impl NeuroChainOrchestrator {
    pub fn new(config: NeuroChainConfig) -> Self {
        Self {
            layers: RwLock::new(Vec::new()),
            config,
        }
    }

    /// Fast, deep and verification layers over one provider.
    pub fn standard(provider: Arc<dyn LlmProvider>, config: NeuroChainConfig) -> Self {
        let chain = Self::new(config);
        chain.layers.write().extend([
            Arc::new(ModelLayer::fast(provider.clone())) as Arc<dyn ReasoningLayer>,
            Arc::new(ModelLayer::deep(provider.clone())) as Arc<dyn ReasoningLayer>,
            Arc::new(ModelLayer::verification(provider)) as Arc<dyn ReasoningLayer>,
        ]);
        chain
    }

    pub fn config(&self) -> &NeuroChainConfig {
        &self.config
    }

    /// Append a layer. Names must be unique.
    pub fn register_layer(&self, layer: Arc<dyn ReasoningLayer>) -> Result<(), OrchestratorError> {
        let mut layers = self.layers.write();
        if layers.iter().any(|l| l.name() == layer.name()) {
            return Err(OrchestratorError::InvalidArgument(format!(
                "layer '{}' is already registered",
                layer.name()
            )));
        }
        debug!(layer = layer.name(), kind = %layer.kind(), "Layer registered");
        layers.push(layer);
        Ok(())
    }

    pub fn clear_layers(&self) {
        self.layers.write().clear();
    }

    pub fn layer_names(&self) -> Vec<String> {
        self.layers.read().iter().map(|l| l.name().to_string()).collect()
    }

    pub async fn reason(
        &self,
        prompt: &str,
        context: &ReasoningContext,
    ) -> Result<NeuroChainResult, OrchestratorError> {
        self.reason_with_cancel(prompt, context, &CancellationToken::new())
            .await
    }

    /// Run the chain.
    ///
    /// Failed layers are recorded and skipped. Errors only when there are
    /// no layers, every layer failed, or the run was cancelled.
    pub async fn reason_with_cancel(
        &self,
        prompt: &str,
        context: &ReasoningContext,
        cancel: &CancellationToken,
    ) -> Result<NeuroChainResult, OrchestratorError> {
        let layers = self.layers.read().clone();
        if layers.is_empty() {
            return Err(OrchestratorError::NoLayers);
        }

        let run = if self.config.parallel {
            self.run_parallel(&layers, prompt, context, cancel).await?
        } else {
            self.run_sequential(&layers, prompt, context, cancel).await?
        };

        if run.results.is_empty() {
            return Err(OrchestratorError::AllLayersFailed {
                failures: run.failures,
            });
        }

        let cross_validation = if self.config.cross_validation {
            cross_validate(&run.results)
        } else {
            None
        };

        let (answer, confidence) = match &cross_validation {
            Some(cv) => (cv.consensus.clone(), cv.confidence),
            None => {
                let best = most_confident(&run.results);
                (best.answer.clone(), best.confidence)
            }
        };

        let total_cost = run.results.iter().map(|r| r.cost).sum();
        info!(
            layers = run.results.len(),
            failed = run.failures.len(),
            confidence,
            early_stopped = run.early_stopped,
            "Chain finished"
        );

        Ok(NeuroChainResult {
            answer,
            confidence,
            layer_results: run.results,
            failures: run.failures,
            cross_validation,
            early_stopped: run.early_stopped,
            total_cost,
            duration: run.duration,
        })
    }

    async fn run_sequential(
        &self,
        layers: &[Arc<dyn ReasoningLayer>],
        prompt: &str,
        context: &ReasoningContext,
        cancel: &CancellationToken,
    ) -> Result<ChainRun, OrchestratorError> {
        let mut run = ChainRun::default();
        let mut context = context.clone();

        for (index, layer) in layers.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(OrchestratorError::Cancelled);
            }

            let started = Instant::now();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
                outcome = layer.reason(prompt, &context) => outcome,
            };
            run.duration += started.elapsed();

            let result = match outcome {
                Ok(result) => result,
                Err(OrchestratorError::Cancelled) => return Err(OrchestratorError::Cancelled),
                Err(e) => {
                    run.record_failure(layer.name(), &e);
                    continue;
                }
            };

            debug!(layer = %result.layer, confidence = result.confidence, "Layer result");
            context.prior_answers.push(PriorAnswer {
                layer: result.layer.clone(),
                answer: result.answer.clone(),
                confidence: result.confidence,
            });

            let stop = self.config.early_stop
                && run.results.len() + 1 >= self.config.min_layers_before_stop
                && result.confidence >= self.config.early_stop_threshold;
            run.results.push(result);

            if stop {
                run.early_stopped = index + 1 < layers.len();
                break;
            }
        }

        Ok(run)
    }

    async fn run_parallel(
        &self,
        layers: &[Arc<dyn ReasoningLayer>],
        prompt: &str,
        context: &ReasoningContext,
        cancel: &CancellationToken,
    ) -> Result<ChainRun, OrchestratorError> {
        let started = Instant::now();
        let calls = join_all(layers.iter().map(|layer| layer.reason(prompt, context)));
        let outcomes = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
            outcomes = calls => outcomes,
        };

        let mut run = ChainRun {
            duration: started.elapsed(),
            ..Default::default()
        };
        for (layer, outcome) in layers.iter().zip(outcomes) {
            match outcome {
                Ok(result) => {
                    debug!(layer = %result.layer, confidence = result.confidence, "Layer result");
                    run.results.push(result);
                }
                Err(OrchestratorError::Cancelled) => return Err(OrchestratorError::Cancelled),
                Err(e) => run.record_failure(layer.name(), &e),
            }
        }
        Ok(run)
    }
}

#[derive(Default)]
struct ChainRun {
    results: Vec<ReasoningResult>,
    failures: Vec<LayerFailure>,
    early_stopped: bool,
    duration: Duration,
}

impl ChainRun {
    fn record_failure(&mut self, layer: &str, error: &OrchestratorError) {
        warn!(layer, error = %error, "Layer failed");
        self.failures.push(LayerFailure {
            layer: layer.to_string(),
            reason: error.to_string(),
        });
    }
}

/// Highest confidence; the earliest wins ties. `results` must be non-empty.
fn most_confident(results: &[ReasoningResult]) -> &ReasoningResult {
    let mut best = &results[0];
    for result in &results[1..] {
        if result.confidence > best.confidence {
            best = result;
        }
    }
    best
}

/// Answers compare equal after trimming, lowercasing, collapsing
/// whitespace and dropping trailing punctuation.
pub fn normalize_answer(answer: &str) -> String {
    answer
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .trim_end_matches(|c: char| matches!(c, '.' | ',' | '!' | '?' | ';' | ':'))
        .trim_end()
        .to_string()
}

/// Majority answer across at least two results.
///
/// A tie between equally large groups goes to the group holding the most
/// confident layer. The consensus text is that of the group's most
/// confident layer.
pub fn cross_validate(results: &[ReasoningResult]) -> Option<CrossValidation> {
    if results.len() < 2 {
        return None;
    }

    // (normalized answer, member indices), in order of first appearance
    let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
    for (index, result) in results.iter().enumerate() {
        let key = normalize_answer(&result.answer);
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(index),
            None => groups.push((key, vec![index])),
        }
    }

    let top_confidence = |members: &[usize]| {
        members
            .iter()
            .map(|&i| results[i].confidence)
            .fold(f64::MIN, f64::max)
    };

    let mut winner = &groups[0];
    for group in &groups[1..] {
        let larger = group.1.len() > winner.1.len();
        let tie_but_surer =
            group.1.len() == winner.1.len() && top_confidence(&group.1) > top_confidence(&winner.1);
        if larger || tie_but_surer {
            winner = group;
        }
    }

    let members = &winner.1;
    let representative = members
        .iter()
        .map(|&i| &results[i])
        .fold(None::<&ReasoningResult>, |best, r| match best {
            Some(b) if b.confidence >= r.confidence => Some(b),
            _ => Some(r),
        })?;

    let agreements = members.iter().map(|&i| results[i].layer.clone()).collect();
    let disagreements = results
        .iter()
        .enumerate()
        .filter(|(i, _)| !members.contains(i))
        .map(|(_, r)| Disagreement {
            layer: r.layer.clone(),
            answer: r.answer.clone(),
        })
        .collect();

    Some(CrossValidation {
        consensus: representative.answer.trim().to_string(),
        confidence: members.len() as f64 / results.len() as f64,
        agreements,
        disagreements,
    })
}

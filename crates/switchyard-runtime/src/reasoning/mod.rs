//! Reasoning layers for NeuroChain.
//!
//! A layer turns a prompt into an answer with a confidence. Layers are
//! independent: each sees the prompt, the shared context and, in
//! sequential chains, the answers of the layers that ran before it.

mod layers;
pub mod parse;
pub mod prompts;

pub use layers::ModelLayer;
pub use parse::{parse_reasoning, ParsedReasoning};

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;

/// What a layer is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    /// Cheap, short answer
    Fast,

    /// Step-by-step reasoning
    Deep,

    /// Checks a candidate answer
    Verification,
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerKind::Fast => write!(f, "fast"),
            LayerKind::Deep => write!(f, "deep"),
            LayerKind::Verification => write!(f, "verification"),
        }
    }
}

/// An answer from an earlier layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorAnswer {
    pub layer: String,
    pub answer: String,
    pub confidence: f64,
}

/// Shared input for every layer in a chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningContext {
    /// Extra system instructions
    pub system_context: Option<String>,

    /// Facts the answer must respect
    pub facts: Vec<String>,

    /// Filled in by sequential chains
    pub prior_answers: Vec<PriorAnswer>,
}

impl ReasoningContext {
    pub fn with_system_context(mut self, context: impl Into<String>) -> Self {
        self.system_context = Some(context.into());
        self
    }

    pub fn with_fact(mut self, fact: impl Into<String>) -> Self {
        self.facts.push(fact.into());
        self
    }

    pub fn with_prior_answer(mut self, prior: PriorAnswer) -> Self {
        self.prior_answers.push(prior);
        self
    }

    /// Highest-confidence prior answer; the earliest wins ties.
    pub fn best_prior(&self) -> Option<&PriorAnswer> {
        self.prior_answers.iter().fold(None, |best, p| match best {
            Some(b) if b.confidence >= p.confidence => Some(b),
            _ => Some(p),
        })
    }
}

/// One layer's answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningResult {
    pub layer: String,
    pub kind: LayerKind,

    /// Provider that answered, when known
    pub provider: Option<String>,

    pub answer: String,

    /// In [0, 1]
    pub confidence: f64,

    pub steps: Vec<String>,
    pub assumptions: Vec<String>,
    pub cost: f64,
    pub duration: Duration,
}

/// A reasoning layer.
///
/// # Isolation Contract
/// - MUST NOT depend on other layers except through `prior_answers`
/// - MUST report a confidence in [0, 1]
#[async_trait]
pub trait ReasoningLayer: Send + Sync {
    /// Unique within a chain.
    fn name(&self) -> &str;

    fn kind(&self) -> LayerKind;

    async fn reason(
        &self,
        prompt: &str,
        context: &ReasoningContext,
    ) -> Result<ReasoningResult, OrchestratorError>;
}

//! Confidence scoring.
//!
//! Scoring is pluggable through [`ConfidenceScorer`]. The default
//! [`HeuristicConfidenceScorer`] reads surface signals only: hedging,
//! admissions of ignorance, answers that are suspiciously short, and
//! structure that does not match what the caller asked for.

use serde::{Deserialize, Serialize};

use super::patterns::hedge_count;
use crate::types::{ResponseType, ValidationContext};

/// A confidence score with its explanation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceScore {
    /// Score in [0, 1]
    pub score: f64,

    /// Whether the score is below the context's minimum
    pub is_low_confidence: bool,

    pub reasoning: String,
}

/// Assigns a confidence score to a response.
pub trait ConfidenceScorer: Send + Sync {
    fn score(&self, response: &str, context: &ValidationContext) -> ConfidenceScore;
}

/// Default surface-signal scorer.
#[derive(Debug, Clone)]
pub struct HeuristicConfidenceScorer {
    /// Penalty per hedging phrase
    pub hedge_penalty: f64,

    /// Maximum total hedging penalty
    pub max_hedge_penalty: f64,
}

impl Default for HeuristicConfidenceScorer {
    fn default() -> Self {
        Self {
            hedge_penalty: 0.1,
            max_hedge_penalty: 0.5,
        }
    }
}

const IGNORANCE_MARKERS: &[&str] = &[
    "i don't know",
    "i do not know",
    "no idea",
    "cannot be determined",
    "can't be determined",
];

impl ConfidenceScorer for HeuristicConfidenceScorer {
    fn score(&self, response: &str, context: &ValidationContext) -> ConfidenceScore {
        let trimmed = response.trim();
        if trimmed.is_empty() {
            return ConfidenceScore {
                score: 0.0,
                is_low_confidence: true,
                reasoning: "empty response".to_string(),
            };
        }

        let mut score: f64 = 1.0;
        let mut reasons = Vec::new();

        let hedges = hedge_count(trimmed);
        if hedges > 0 {
            let penalty = (hedges as f64 * self.hedge_penalty).min(self.max_hedge_penalty);
            score -= penalty;
            reasons.push(format!("{} hedging phrase(s) (-{:.2})", hedges, penalty));
        }

        let lower = trimmed.to_lowercase();
        if IGNORANCE_MARKERS.iter().any(|m| lower.contains(m)) {
            score -= 0.4;
            reasons.push("admits not knowing (-0.40)".to_string());
        }

        if trimmed.chars().count() < 3 && context.expected_type == ResponseType::PlainText {
            score -= 0.1;
            reasons.push("very short answer (-0.10)".to_string());
        }

        if context.expected_type == ResponseType::Json
            && serde_json::from_str::<serde_json::Value>(trimmed).is_err()
        {
            score -= 0.3;
            reasons.push("expected JSON but could not parse (-0.30)".to_string());
        }

        let missing = missing_fields(trimmed, context);
        if missing > 0 {
            let penalty = (missing as f64 * 0.15).min(0.45);
            score -= penalty;
            reasons.push(format!("{} required field(s) missing (-{:.2})", missing, penalty));
        }

        let score = score.clamp(0.0, 1.0);
        let reasoning = if reasons.is_empty() {
            "no uncertainty signals".to_string()
        } else {
            reasons.join("; ")
        };

        ConfidenceScore {
            score,
            is_low_confidence: score < context.min_confidence,
            reasoning,
        }
    }
}

fn missing_fields(response: &str, context: &ValidationContext) -> usize {
    if context.required_fields.is_empty() {
        return 0;
    }
    match serde_json::from_str::<serde_json::Value>(response) {
        Ok(serde_json::Value::Object(obj)) => context
            .required_fields
            .iter()
            .filter(|f| !obj.contains_key(f.as_str()))
            .count(),
        _ => 0,
    }
}

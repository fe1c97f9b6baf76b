//! Pattern-based hallucination heuristics.
//!
//! None of these checks understand the text. They look for surface signals
//! that correlate with fabricated output:
//!
//! | Signal | Check |
//! |--------|-------|
//! | Contradiction | Opposite word pairs against earlier assistant turns, or a ground-truth subject mentioned without its known value |
//! | Unsupported claim | Definitive phrasing in a sentence no ground truth backs |
//! | Context mismatch | Under 20% keyword overlap with the prompt on a response over 50 characters |
//! | Fabrication | Too many improbably precise numbers, timestamps or identifiers |
//! | Temporal impossibility | A calendar year later than the current one |

use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::patterns::{
    keyword_overlap, keywords, DEFINITIVE_CLAIM_PATTERN, ID_LIKE_PATTERN, PRECISE_NUMBER_PATTERN,
    TIMESTAMP_PATTERN, YEAR_PATTERN,
};
use crate::types::{Issue, IssueCategory, Severity, ValidationContext, ValidationResult};

/// Word pairs whose members contradict each other.
const OPPOSITES: &[(&str, &str)] = &[
    ("yes", "no"),
    ("true", "false"),
    ("correct", "incorrect"),
    ("possible", "impossible"),
    ("always", "never"),
    ("safe", "unsafe"),
    ("increase", "decrease"),
    ("valid", "invalid"),
];

const CONTEXT_MISMATCH_OVERLAP: f64 = 0.2;
const CONTEXT_MISMATCH_MIN_LEN: usize = 50;

/// Kind of hallucination signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HallucinationKind {
    Contradiction,
    UnsupportedClaim,
    ContextMismatch,
    Fabrication,
    TemporalImpossibility,
}

impl HallucinationKind {
    fn category(self) -> IssueCategory {
        match self {
            HallucinationKind::Contradiction => IssueCategory::Contradiction,
            HallucinationKind::UnsupportedClaim => IssueCategory::UnsupportedClaim,
            HallucinationKind::ContextMismatch => IssueCategory::ContextMismatch,
            HallucinationKind::Fabrication => IssueCategory::Fabrication,
            HallucinationKind::TemporalImpossibility => IssueCategory::TemporalImpossibility,
        }
    }

    fn severity(self) -> Severity {
        match self {
            HallucinationKind::Contradiction | HallucinationKind::TemporalImpossibility => {
                Severity::High
            }
            HallucinationKind::UnsupportedClaim
            | HallucinationKind::ContextMismatch
            | HallucinationKind::Fabrication => Severity::Medium,
        }
    }
}

/// One detected signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HallucinationInstance {
    pub kind: HallucinationKind,
    pub description: String,

    /// Text that triggered the signal
    pub evidence: String,

    /// How likely this signal is a real hallucination, in [0, 1]
    pub confidence: f64,
}

/// Result of running the detector over one response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HallucinationReport {
    pub instances: Vec<HallucinationInstance>,

    /// Confidence that the response is free of hallucination, in [0, 1]
    pub confidence: f64,
}

impl HallucinationReport {
    fn from_instances(instances: Vec<HallucinationInstance>) -> Self {
        let confidence = if instances.is_empty() {
            1.0
        } else {
            let mean =
                instances.iter().map(|i| i.confidence).sum::<f64>() / instances.len() as f64;
            (1.0 - mean * 0.8).max(0.0)
        };
        Self {
            instances,
            confidence,
        }
    }

    pub fn has_hallucination(&self) -> bool {
        !self.instances.is_empty()
    }

    /// Convert to a validation result for the fault-detection loop.
    pub fn to_validation(&self) -> ValidationResult {
        let issues: Vec<Issue> = self
            .instances
            .iter()
            .map(|i| {
                Issue::new(i.kind.category(), i.kind.severity(), i.description.clone())
                    .with_fix("Only state facts supported by the conversation and known context")
            })
            .collect();
        let is_valid = !issues.iter().any(|i| i.severity.is_blocking());
        ValidationResult {
            is_valid,
            confidence: self.confidence,
            issues,
            corrected: None,
        }
    }
}

/// Heuristic hallucination detector.
#[derive(Debug, Clone)]
pub struct HallucinationDetector {
    /// Precision tokens tolerated before flagging fabrication
    pub max_precise_tokens: usize,

    /// Year used for the temporal check; `None` means the current year
    current_year: Option<i32>,
}

impl HallucinationDetector {
    pub fn new() -> Self {
        Self {
            max_precise_tokens: 3,
            current_year: None,
        }
    }

    /// Pin the year used by the temporal check.
    pub fn with_current_year(mut self, year: i32) -> Self {
        self.current_year = Some(year);
        self
    }

    /// Run every heuristic against a response.
    pub fn detect(&self, response: &str, context: &ValidationContext) -> HallucinationReport {
        let mut instances = Vec::new();

        self.check_contradictions(response, context, &mut instances);
        self.check_ground_truth(response, context, &mut instances);
        self.check_unsupported_claims(response, context, &mut instances);
        self.check_context_mismatch(response, context, &mut instances);
        self.check_fabrication(response, &mut instances);
        self.check_temporal(response, &mut instances);

        if !instances.is_empty() {
            tracing::debug!(count = instances.len(), "hallucination signals detected");
        }

        HallucinationReport::from_instances(instances)
    }

    /// Opposite-word flips against earlier assistant turns on the same topic.
    fn check_contradictions(
        &self,
        response: &str,
        context: &ValidationContext,
        out: &mut Vec<HallucinationInstance>,
    ) {
        let current = words(response);
        let current_topic = keywords(response);

        for previous in context.prior_assistant_turns() {
            let prior = words(previous);
            let shared_topic = keywords(previous)
                .intersection(&current_topic)
                .filter(|w| !is_opposite_word(w))
                .count();
            if shared_topic == 0 {
                continue;
            }

            for (a, b) in OPPOSITES {
                for (before, after) in [(a, b), (b, a)] {
                    if prior.contains(*before)
                        && !prior.contains(*after)
                        && current.contains(*after)
                        && !current.contains(*before)
                    {
                        out.push(HallucinationInstance {
                            kind: HallucinationKind::Contradiction,
                            description: format!(
                                "Response says '{}' where an earlier answer said '{}'",
                                after, before
                            ),
                            evidence: truncate(previous, 80),
                            confidence: 0.7,
                        });
                    }
                }
            }
        }
    }

    /// Ground-truth subjects mentioned without their known value.
    fn check_ground_truth(
        &self,
        response: &str,
        context: &ValidationContext,
        out: &mut Vec<HallucinationInstance>,
    ) {
        let lower = response.to_lowercase();
        for (subject, value) in &context.ground_truth {
            if keyword_overlap(subject, response) >= 0.5 && !lower.contains(&value.to_lowercase()) {
                out.push(HallucinationInstance {
                    kind: HallucinationKind::Contradiction,
                    description: format!(
                        "Response discusses '{}' without the known value '{}'",
                        subject, value
                    ),
                    evidence: subject.clone(),
                    confidence: 0.6,
                });
            }
        }
    }

    /// Definitive phrasing in sentences that no ground truth backs.
    fn check_unsupported_claims(
        &self,
        response: &str,
        context: &ValidationContext,
        out: &mut Vec<HallucinationInstance>,
    ) {
        for sentence in sentences(response) {
            let Some(claim) = DEFINITIVE_CLAIM_PATTERN.find(sentence) else {
                continue;
            };
            let lower = sentence.to_lowercase();
            let backed = context
                .ground_truth
                .values()
                .any(|v| !v.is_empty() && lower.contains(&v.to_lowercase()));
            if !backed {
                out.push(HallucinationInstance {
                    kind: HallucinationKind::UnsupportedClaim,
                    description: format!("Definitive claim '{}' is not backed by known facts", claim.as_str()),
                    evidence: truncate(sentence, 80),
                    confidence: 0.5,
                });
            }
        }
    }

    fn check_context_mismatch(
        &self,
        response: &str,
        context: &ValidationContext,
        out: &mut Vec<HallucinationInstance>,
    ) {
        if context.original_prompt.trim().is_empty()
            || response.chars().count() <= CONTEXT_MISMATCH_MIN_LEN
        {
            return;
        }
        let overlap = keyword_overlap(&context.original_prompt, response);
        if overlap < CONTEXT_MISMATCH_OVERLAP {
            out.push(HallucinationInstance {
                kind: HallucinationKind::ContextMismatch,
                description: format!(
                    "Response shares only {:.0}% of the prompt's keywords",
                    overlap * 100.0
                ),
                evidence: truncate(&context.original_prompt, 80),
                confidence: 0.6,
            });
        }
    }

    fn check_fabrication(&self, response: &str, out: &mut Vec<HallucinationInstance>) {
        let count = PRECISE_NUMBER_PATTERN.find_iter(response).count()
            + TIMESTAMP_PATTERN.find_iter(response).count()
            + ID_LIKE_PATTERN.find_iter(response).count();

        if count > self.max_precise_tokens {
            out.push(HallucinationInstance {
                kind: HallucinationKind::Fabrication,
                description: format!(
                    "{} improbably precise numbers, timestamps or identifiers",
                    count
                ),
                evidence: format!("{} tokens", count),
                confidence: (0.3 + 0.1 * count as f64).min(0.9),
            });
        }
    }

    fn check_temporal(&self, response: &str, out: &mut Vec<HallucinationInstance>) {
        let current_year = self.current_year.unwrap_or_else(|| chrono::Utc::now().year());
        let future: Vec<i32> = YEAR_PATTERN
            .find_iter(response)
            .filter_map(|m| m.as_str().parse::<i32>().ok())
            .filter(|year| *year > current_year)
            .collect();

        if let Some(year) = future.iter().max() {
            out.push(HallucinationInstance {
                kind: HallucinationKind::TemporalImpossibility,
                description: format!("References year {} which is after {}", year, current_year),
                evidence: year.to_string(),
                confidence: 0.8,
            });
        }
    }
}

impl Default for HallucinationDetector {
    fn default() -> Self {
        Self::new()
    }
}

fn words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

fn is_opposite_word(word: &str) -> bool {
    OPPOSITES.iter().any(|(a, b)| *a == word || *b == word)
}

fn sentences(text: &str) -> impl Iterator<Item = &str> {
    text.split(['.', '!', '?', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_chars).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatMessage;

    fn detector() -> HallucinationDetector {
        HallucinationDetector::new().with_current_year(2025)
    }

    #[test]
    fn test_clean_response() {
        let ctx = ValidationContext::for_prompt("What is the capital of France?");
        let report = detector().detect("The capital of France is Paris.", &ctx);
        assert!(!report.has_hallucination());
        assert_eq!(report.confidence, 1.0);
    }

    #[test]
    fn test_contradiction_with_history() {
        let ctx = ValidationContext::for_prompt("Is the bridge safe?").with_history(vec![
            ChatMessage::user("Is the bridge safe?"),
            ChatMessage::assistant("Yes, the bridge is safe to cross."),
        ]);
        let report = detector().detect("No, the bridge is unsafe.", &ctx);
        assert!(report
            .instances
            .iter()
            .any(|i| i.kind == HallucinationKind::Contradiction));
        assert!(!report.to_validation().is_valid);
    }

    #[test]
    fn test_unrelated_history_is_not_contradiction() {
        let ctx = ValidationContext::default().with_history(vec![ChatMessage::assistant(
            "Yes, tomatoes are fruit.",
        )]);
        let report = detector().detect("No meetings today.", &ctx);
        assert!(report.instances.is_empty());
    }

    #[test]
    fn test_unsupported_claim() {
        let ctx = ValidationContext::for_prompt("Who invented the telephone?");
        let report = detector().detect("It was definitely invented by Tesla.", &ctx);
        assert!(report
            .instances
            .iter()
            .any(|i| i.kind == HallucinationKind::UnsupportedClaim));
    }

    #[test]
    fn test_claim_backed_by_ground_truth() {
        let ctx = ValidationContext::for_prompt("Who invented the telephone?")
            .with_fact("telephone inventor", "Bell");
        let report = detector().detect("It was definitely invented by Bell.", &ctx);
        assert!(report.instances.is_empty());
    }

    #[test]
    fn test_ground_truth_conflict() {
        let ctx = ValidationContext::for_prompt("capital?").with_fact("capital France", "Paris");
        let report = detector().detect("The capital of France is Lyon.", &ctx);
        assert!(report
            .instances
            .iter()
            .any(|i| i.description.contains("Paris")));
    }

    #[test]
    fn test_context_mismatch() {
        let ctx = ValidationContext::for_prompt("Explain photosynthesis in plants");
        let report = detector().detect(
            "The stock market closed higher today as investors cheered quarterly earnings.",
            &ctx,
        );
        assert!(report
            .instances
            .iter()
            .any(|i| i.kind == HallucinationKind::ContextMismatch));
    }

    #[test]
    fn test_short_response_skips_mismatch() {
        let ctx = ValidationContext::for_prompt("Explain photosynthesis in plants");
        let report = detector().detect("Sure.", &ctx);
        assert!(report.instances.is_empty());
    }

    #[test]
    fn test_fabrication() {
        let response = "Values: 1.23456, 2.34567, 3.45678 and ticket INV-2093841.";
        let report = detector().detect(response, &ValidationContext::default());
        assert!(report
            .instances
            .iter()
            .any(|i| i.kind == HallucinationKind::Fabrication));
    }

    #[test]
    fn test_future_year() {
        let report = detector().detect("This happened in 2031.", &ValidationContext::default());
        assert_eq!(report.instances.len(), 1);
        assert_eq!(report.instances[0].kind, HallucinationKind::TemporalImpossibility);
        // 1 - 0.8 * 0.8
        assert!((report.confidence - 0.36).abs() < 1e-9);
    }
}

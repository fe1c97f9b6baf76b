//! Response analyzers.
//!
//! Four independent analyzers each inspect one response:
//!
//! - [`ResponseValidator`]: structure by declared type, schema, rules
//! - [`HallucinationDetector`]: contradiction, unsupported claims, context
//!   mismatch, fabrication, impossible dates
//! - [`ErrorPatternRecognizer`]: learned catalogue of known bad output
//! - [`ConfidenceScorer`]: pluggable confidence estimate
//!
//! [`AnalysisSuite`] runs all four and folds them into one
//! [`ValidationResult`].

mod confidence;
mod hallucination;
pub mod patterns;
mod recognizer;
mod validator;

pub use confidence::{ConfidenceScore, ConfidenceScorer, HeuristicConfidenceScorer};
pub use hallucination::{
    HallucinationDetector, HallucinationInstance, HallucinationKind, HallucinationReport,
};
pub use recognizer::{
    default_patterns, ErrorPattern, ErrorPatternRecognizer, LearnOutcome, MatcherKind,
    PatternMatch, PatternMatchReport, SEMANTIC_MATCH_THRESHOLD,
};
pub use validator::{ResponseValidator, ValidationRule};

use std::sync::Arc;

use crate::types::{Issue, IssueCategory, Severity, ValidationContext, ValidationResult};

/// Output of every analyzer for one response, plus the combined verdict.
#[derive(Debug, Clone)]
pub struct Analysis {
    /// Combined verdict
    pub combined: ValidationResult,

    pub validation: ValidationResult,
    pub hallucination: HallucinationReport,
    pub patterns: PatternMatchReport,
    pub confidence: ConfidenceScore,
}

impl Analysis {
    /// Valid and at least as confident as the context requires.
    pub fn is_acceptable(&self, context: &ValidationContext) -> bool {
        self.combined.is_valid && self.combined.confidence >= context.min_confidence
    }
}

/// The four analyzers, run together.
pub struct AnalysisSuite {
    validator: ResponseValidator,
    detector: HallucinationDetector,
    recognizer: Arc<ErrorPatternRecognizer>,
    scorer: Arc<dyn ConfidenceScorer>,
}

impl AnalysisSuite {
    /// Default analyzers with the default pattern catalogue.
    pub fn new() -> Self {
        Self {
            validator: ResponseValidator::new(),
            detector: HallucinationDetector::new(),
            recognizer: Arc::new(ErrorPatternRecognizer::new()),
            scorer: Arc::new(HeuristicConfidenceScorer::default()),
        }
    }

    pub fn with_validator(mut self, validator: ResponseValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_detector(mut self, detector: HallucinationDetector) -> Self {
        self.detector = detector;
        self
    }

    /// Share a recognizer, so learned patterns survive across suites.
    pub fn with_recognizer(mut self, recognizer: Arc<ErrorPatternRecognizer>) -> Self {
        self.recognizer = recognizer;
        self
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn ConfidenceScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn recognizer(&self) -> &Arc<ErrorPatternRecognizer> {
        &self.recognizer
    }

    /// Run every analyzer and combine the results.
    ///
    /// The combined result is invalid if any analyzer says so. Its
    /// confidence is the scorer's value. Issues are concatenated in analyzer
    /// order and the validator's correction, if any, is carried through.
    pub fn analyze(&self, response: &str, context: &ValidationContext) -> Analysis {
        let validation = self.validator.validate(response, context);
        let hallucination = self.detector.detect(response, context);
        let patterns = self.recognizer.recognize(response, context);
        let confidence = self.scorer.score(response, context);

        let hallucination_result = hallucination.to_validation();
        let pattern_result = patterns.to_validation();

        let mut issues = Vec::new();
        issues.extend(validation.issues.iter().cloned());
        issues.extend(hallucination_result.issues);
        issues.extend(pattern_result.issues);
        if confidence.is_low_confidence {
            issues.push(
                Issue::new(
                    IssueCategory::LowConfidence,
                    Severity::Medium,
                    format!(
                        "Confidence {:.2} below {:.2}: {}",
                        confidence.score, context.min_confidence, confidence.reasoning
                    ),
                )
                .with_fix("Give a direct, definite answer"),
            );
        }

        let combined = ValidationResult {
            is_valid: validation.is_valid && hallucination_result.is_valid && pattern_result.is_valid,
            confidence: confidence.score,
            issues,
            corrected: validation.corrected.clone(),
        };

        Analysis {
            combined,
            validation,
            hallucination,
            patterns,
            confidence,
        }
    }
}

impl Default for AnalysisSuite {
    fn default() -> Self {
        Self::new()
    }
}

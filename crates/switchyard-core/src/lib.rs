//! # switchyard-core
//!
//! Deterministic response analysis for Switchyard.
//!
//! This crate inspects text a provider returned and decides whether it can
//! be trusted. It answers:
//! - Is the output structurally what the caller asked for?
//! - Does it show signs of hallucination?
//! - Does it match a known failure shape?
//! - How confident does it sound?
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: Same input always produces same output
//! 2. **No I/O**: Analyzers never call a provider
//! 3. **Bounded**: Every confidence is in [0, 1]
//!
//! ## Example
//!
//! ```rust
//! use switchyard_core::{AnalysisSuite, ResponseType, ValidationContext};
//!
//! let suite = AnalysisSuite::new();
//! let context = ValidationContext::for_prompt("Reply with a JSON object")
//!     .expecting(ResponseType::Json)
//!     .require_field("answer");
//!
//! let analysis = suite.analyze(r#"{"answer": 42}"#, &context);
//! assert!(analysis.combined.is_valid);
//! ```

pub mod analysis;
pub mod types;

pub use analysis::{
    Analysis, AnalysisSuite, ConfidenceScore, ConfidenceScorer, ErrorPattern,
    ErrorPatternRecognizer, HallucinationDetector, HallucinationKind, HallucinationReport,
    HeuristicConfidenceScorer, LearnOutcome, MatcherKind, PatternMatchReport, ResponseValidator,
    ValidationRule,
};
pub use types::{
    ChatMessage, Issue, IssueCategory, ResponseType, Role, Severity, ValidationContext,
    ValidationResult,
};

use thiserror::Error;

/// Errors raised while configuring analyzers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("Invalid pattern '{name}': {reason}")]
    InvalidPattern { name: String, reason: String },

    #[error("Invalid JSON schema: {0}")]
    InvalidSchema(String),
}

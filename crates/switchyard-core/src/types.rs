//! Shared vocabulary for response analysis.
//!
//! These types are used by every analyzer and by the runtime when it feeds
//! conversation state into the fault-detection loop.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Who authored a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A chat message exchanged with a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author of the message
    pub role: Role,

    /// Message content
    pub content: String,
}

impl ChatMessage {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Declared shape of the response a caller expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    #[default]
    PlainText,
    Json,
    Xml,
    Code,
}

/// How serious an issue is.
///
/// Ordered so that `Severity::High > Severity::Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Confidence penalty applied per issue of this severity.
    pub fn penalty(self) -> f64 {
        match self {
            Severity::Info => 0.0,
            Severity::Low => 0.05,
            Severity::Medium => 0.15,
            Severity::High => 0.3,
            Severity::Critical => 0.5,
        }
    }

    /// Whether an issue of this severity makes a response invalid.
    pub fn is_blocking(self) -> bool {
        self >= Severity::High
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

/// What kind of problem an issue describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    /// Empty or structurally broken output
    Structure,
    /// Output does not parse as the declared type
    Format,
    /// A caller-supplied rule failed
    Rule,
    /// Contradicts an earlier assistant turn
    Contradiction,
    /// Definitive claim not backed by ground truth
    UnsupportedClaim,
    /// Response does not relate to the prompt
    ContextMismatch,
    /// Improbably precise numbers, timestamps or identifiers
    Fabrication,
    /// References a date that cannot have happened yet
    TemporalImpossibility,
    /// Matched a known error pattern
    ErrorPattern,
    /// Hedged or uncertain answer
    LowConfidence,
}

/// A single problem found in a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub category: IssueCategory,
    pub severity: Severity,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_fix: Option<String>,
}

impl Issue {
    pub fn new(category: IssueCategory, severity: Severity, description: impl Into<String>) -> Self {
        Self {
            category,
            severity,
            description: description.into(),
            suggested_fix: None,
        }
    }

    /// Attach a suggested fix.
    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.suggested_fix = Some(fix.into());
        self
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.severity, self.description)?;
        if let Some(fix) = &self.suggested_fix {
            write!(f, " (fix: {})", fix)?;
        }
        Ok(())
    }
}

/// Everything an analyzer may consult besides the response itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationContext {
    /// The prompt that produced the response
    #[serde(default)]
    pub original_prompt: String,

    /// Prior conversation turns
    #[serde(default)]
    pub history: Vec<ChatMessage>,

    /// Known facts, keyed by subject
    #[serde(default)]
    pub ground_truth: BTreeMap<String, String>,

    /// Minimum confidence a response needs to be accepted
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// Declared response shape
    #[serde(default)]
    pub expected_type: ResponseType,

    /// Top-level fields a JSON response must carry
    #[serde(default)]
    pub required_fields: Vec<String>,
}

fn default_min_confidence() -> f64 {
    0.7
}

impl Default for ValidationContext {
    fn default() -> Self {
        Self {
            original_prompt: String::new(),
            history: Vec::new(),
            ground_truth: BTreeMap::new(),
            min_confidence: default_min_confidence(),
            expected_type: ResponseType::PlainText,
            required_fields: Vec::new(),
        }
    }
}

impl ValidationContext {
    /// Create a context for a prompt.
    pub fn for_prompt(prompt: impl Into<String>) -> Self {
        Self {
            original_prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// Expect a response of the given type.
    pub fn expecting(mut self, response_type: ResponseType) -> Self {
        self.expected_type = response_type;
        self
    }

    /// Require a top-level JSON field.
    pub fn require_field(mut self, field: impl Into<String>) -> Self {
        self.required_fields.push(field.into());
        self
    }

    /// Add a known fact.
    pub fn with_fact(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ground_truth.insert(key.into(), value.into());
        self
    }

    /// Set the conversation history.
    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }

    /// Set the acceptance threshold, clamped to [0, 1].
    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence.clamp(0.0, 1.0);
        self
    }

    /// Assistant turns from the history, oldest first.
    pub fn prior_assistant_turns(&self) -> impl Iterator<Item = &str> {
        self.history
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .map(|m| m.content.as_str())
    }
}

/// Outcome of validating one response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,

    /// Confidence in [0, 1]
    pub confidence: f64,

    pub issues: Vec<Issue>,

    /// Repaired response text, when an analyzer could fix the output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrected: Option<String>,
}

impl ValidationResult {
    /// A clean, fully confident result.
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            confidence: 1.0,
            issues: Vec::new(),
            corrected: None,
        }
    }

    /// Derive validity and confidence from a list of issues.
    ///
    /// Any High or Critical issue invalidates the response. Confidence is
    /// reduced by each issue's severity penalty.
    pub fn from_issues(issues: Vec<Issue>) -> Self {
        let is_valid = !issues.iter().any(|i| i.severity.is_blocking());
        let penalty: f64 = issues.iter().map(|i| i.severity.penalty()).sum();
        Self {
            is_valid,
            confidence: (1.0 - penalty).clamp(0.0, 1.0),
            issues,
            corrected: None,
        }
    }

    /// Highest severity among the issues, if any.
    pub fn max_severity(&self) -> Option<Severity> {
        self.issues.iter().map(|i| i.severity).max()
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::valid()
    }
}

//! Learned error-pattern recognition.
//!
//! The recognizer keeps a growing list of named patterns that describe known
//! bad provider output. It ships with defaults for the common failure shapes
//! and learns new ones from issues the fault-detection loop reports.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::patterns::{code_structure_error, keywords, xml_structure_error};
use crate::types::{
    Issue, IssueCategory, ResponseType, Severity, ValidationContext, ValidationResult,
};
use crate::AnalysisError;

/// Keyword overlap needed for a semantic match.
pub const SEMANTIC_MATCH_THRESHOLD: f64 = 0.6;

/// How a pattern is matched against a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatcherKind {
    /// `pattern` is a regular expression
    Regex,
    /// `pattern` is a case-insensitive literal substring
    Text,
    /// At least 60% of `pattern`'s keywords appear in the response
    Semantic,
    /// `pattern` names a structure (`json`, `xml`, `code`) the response breaks
    Structural,
}

/// A named description of bad output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPattern {
    pub name: String,
    pub kind: MatcherKind,
    pub pattern: String,
    pub severity: Severity,
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_fix: Option<String>,

    /// Times this pattern has been learned or reinforced
    pub occurrences: u64,

    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl ErrorPattern {
    pub fn new(
        name: impl Into<String>,
        kind: MatcherKind,
        pattern: impl Into<String>,
        severity: Severity,
        description: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            kind,
            pattern: pattern.into(),
            severity,
            description: description.into(),
            suggested_fix: None,
            occurrences: 1,
            first_seen: now,
            last_seen: now,
        }
    }

    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.suggested_fix = Some(fix.into());
        self
    }

    /// Derive a semantic pattern from an issue reported during validation.
    pub fn learned_from(issue: &Issue) -> Self {
        let slug: String = issue
            .description
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .collect::<String>()
            .split('_')
            .filter(|s| !s.is_empty())
            .take(6)
            .collect::<Vec<_>>()
            .join("_");
        let mut pattern = Self::new(
            format!("learned_{}", slug),
            MatcherKind::Semantic,
            issue.description.clone(),
            issue.severity,
            issue.description.clone(),
        );
        pattern.suggested_fix = issue.suggested_fix.clone();
        pattern
    }
}

/// One pattern that matched a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub name: String,
    pub kind: MatcherKind,
    pub severity: Severity,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_fix: Option<String>,
}

/// All pattern matches for one response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMatchReport {
    pub matches: Vec<PatternMatch>,

    /// Confidence that the response is free of known errors, in [0, 1]
    pub confidence: f64,
}

impl PatternMatchReport {
    pub fn to_validation(&self) -> ValidationResult {
        let issues = self
            .matches
            .iter()
            .map(|m| {
                let issue = Issue::new(
                    IssueCategory::ErrorPattern,
                    m.severity,
                    format!("{}: {}", m.name, m.description),
                );
                match &m.suggested_fix {
                    Some(fix) => issue.with_fix(fix.clone()),
                    None => issue,
                }
            })
            .collect();
        ValidationResult::from_issues(issues)
    }
}

/// What `learn_pattern` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearnOutcome {
    /// Reinforced an existing pattern; carries its new occurrence count
    Merged(u64),
    Added,
}

struct CompiledPattern {
    pattern: ErrorPattern,
    regex: Option<Regex>,
}

impl CompiledPattern {
    fn compile(pattern: ErrorPattern) -> Result<Self, AnalysisError> {
        let regex = match pattern.kind {
            MatcherKind::Regex => Some(Regex::new(&pattern.pattern).map_err(|e| {
                AnalysisError::InvalidPattern {
                    name: pattern.name.clone(),
                    reason: e.to_string(),
                }
            })?),
            _ => None,
        };
        Ok(Self { pattern, regex })
    }

    fn matches(&self, response: &str, context: &ValidationContext) -> bool {
        match self.pattern.kind {
            MatcherKind::Regex => self.regex.as_ref().is_some_and(|re| re.is_match(response)),
            MatcherKind::Text => response
                .to_lowercase()
                .contains(&self.pattern.pattern.to_lowercase()),
            MatcherKind::Semantic => {
                let wanted = keywords(&self.pattern.pattern);
                if wanted.is_empty() {
                    return false;
                }
                let present = keywords(response);
                let shared = wanted.intersection(&present).count();
                shared as f64 / wanted.len() as f64 >= SEMANTIC_MATCH_THRESHOLD
            }
            MatcherKind::Structural => structural_break(&self.pattern.pattern, response, context),
        }
    }
}

/// Whether `response` breaks the named structure.
///
/// A structure only applies when the context expects it or the response
/// looks like an attempt at it, so plain prose never counts as broken JSON.
fn structural_break(structure: &str, response: &str, context: &ValidationContext) -> bool {
    let trimmed = response.trim();
    match structure.to_ascii_lowercase().as_str() {
        "json" => {
            let attempted = context.expected_type == ResponseType::Json
                || trimmed.starts_with('{')
                || trimmed.starts_with('[');
            attempted
                && !trimmed.is_empty()
                && serde_json::from_str::<serde_json::Value>(trimmed).is_err()
        }
        "xml" => {
            let attempted = context.expected_type == ResponseType::Xml || trimmed.starts_with('<');
            attempted && xml_structure_error(trimmed).is_some()
        }
        "code" => {
            context.expected_type == ResponseType::Code && code_structure_error(trimmed).is_some()
        }
        _ => false,
    }
}

/// Matches responses against a growing list of error patterns.
pub struct ErrorPatternRecognizer {
    patterns: RwLock<Vec<CompiledPattern>>,
}

impl ErrorPatternRecognizer {
    /// Create a recognizer with the default patterns.
    pub fn new() -> Self {
        let patterns = default_patterns()
            .into_iter()
            .filter_map(|p| CompiledPattern::compile(p).ok())
            .collect();
        Self {
            patterns: RwLock::new(patterns),
        }
    }

    /// Create a recognizer with no patterns.
    pub fn empty() -> Self {
        Self {
            patterns: RwLock::new(Vec::new()),
        }
    }

    /// Match a response against every known pattern.
    pub fn recognize(&self, response: &str, context: &ValidationContext) -> PatternMatchReport {
        let matches: Vec<PatternMatch> = self
            .patterns
            .read()
            .iter()
            .filter(|c| c.matches(response, context))
            .map(|c| PatternMatch {
                name: c.pattern.name.clone(),
                kind: c.pattern.kind,
                severity: c.pattern.severity,
                description: c.pattern.description.clone(),
                suggested_fix: c.pattern.suggested_fix.clone(),
            })
            .collect();

        let penalty: f64 = matches.iter().map(|m| m.severity.penalty()).sum();
        PatternMatchReport {
            confidence: (1.0 - penalty).clamp(0.0, 1.0),
            matches,
        }
    }

    /// Merge a pattern into the list or append it.
    ///
    /// A pattern with the same name, or the same matcher kind and pattern
    /// text, is reinforced: its occurrence counter grows, its timestamp moves
    /// forward and it keeps the higher of the two severities.
    pub fn learn_pattern(&self, pattern: ErrorPattern) -> Result<LearnOutcome, AnalysisError> {
        let mut patterns = self.patterns.write();

        if let Some(existing) = patterns.iter_mut().find(|c| {
            c.pattern.name == pattern.name
                || (c.pattern.kind == pattern.kind && c.pattern.pattern == pattern.pattern)
        }) {
            let entry = &mut existing.pattern;
            entry.occurrences += 1;
            entry.last_seen = Utc::now();
            entry.severity = entry.severity.max(pattern.severity);
            if entry.suggested_fix.is_none() {
                entry.suggested_fix = pattern.suggested_fix;
            }
            tracing::debug!(pattern = %entry.name, occurrences = entry.occurrences, "error pattern reinforced");
            return Ok(LearnOutcome::Merged(entry.occurrences));
        }

        let compiled = CompiledPattern::compile(pattern)?;
        tracing::debug!(pattern = %compiled.pattern.name, "error pattern learned");
        patterns.push(compiled);
        Ok(LearnOutcome::Added)
    }

    /// Snapshot of every known pattern.
    pub fn patterns(&self) -> Vec<ErrorPattern> {
        self.patterns
            .read()
            .iter()
            .map(|c| c.pattern.clone())
            .collect()
    }

    /// Look up a pattern by name.
    pub fn get(&self, name: &str) -> Option<ErrorPattern> {
        self.patterns
            .read()
            .iter()
            .find(|c| c.pattern.name == name)
            .map(|c| c.pattern.clone())
    }

    pub fn len(&self) -> usize {
        self.patterns.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.read().is_empty()
    }
}

impl Default for ErrorPatternRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Patterns every recognizer starts with.
pub fn default_patterns() -> Vec<ErrorPattern> {
    vec![
        ErrorPattern::new(
            "empty_response",
            MatcherKind::Regex,
            r"^\s*$",
            Severity::Critical,
            "Provider returned an empty response",
        )
        .with_fix("Provide a complete answer"),
        ErrorPattern::new(
            "apology_prefix",
            MatcherKind::Regex,
            r"(?i)^\s*(i'm sorry|i am sorry|i apologi[sz]e|sorry,)",
            Severity::Medium,
            "Response opens with an apology instead of an answer",
        )
        .with_fix("Answer directly without apologizing"),
        ErrorPattern::new(
            "inability",
            MatcherKind::Regex,
            r"(?i)\b(i cannot|i can't|i am unable to|i'm unable to|unable to (help|assist|comply|provide))\b",
            Severity::High,
            "Response claims it cannot complete the task",
        )
        .with_fix("Attempt the task with the information available"),
        ErrorPattern::new(
            "no_information",
            MatcherKind::Regex,
            r"(?i)\b(i (don't|do not) have (any )?(information|data|access)|no information (is )?available)\b",
            Severity::Medium,
            "Response says no information is available",
        )
        .with_fix("Use the provided context to answer"),
        ErrorPattern::new(
            "malformed_json",
            MatcherKind::Structural,
            "json",
            Severity::High,
            "Response is not valid JSON",
        )
        .with_fix("Return only a valid JSON document"),
        ErrorPattern::new(
            "generic_exception",
            MatcherKind::Regex,
            r"(?i)\b(exception|stack trace|traceback|internal (server )?error|an error occurred)\b",
            Severity::High,
            "Response contains error or exception output",
        )
        .with_fix("Return the answer, not an error report"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(report: &PatternMatchReport) -> Vec<&str> {
        report.matches.iter().map(|m| m.name.as_str()).collect()
    }

    #[test]
    fn test_defaults_loaded() {
        let recognizer = ErrorPatternRecognizer::new();
        assert_eq!(recognizer.len(), default_patterns().len());
    }

    #[test]
    fn test_clean_response() {
        let recognizer = ErrorPatternRecognizer::new();
        let report = recognizer.recognize("Paris is the capital.", &ValidationContext::default());
        assert!(report.matches.is_empty());
        assert_eq!(report.confidence, 1.0);
    }

    #[test]
    fn test_default_matches() {
        let recognizer = ErrorPatternRecognizer::new();
        let ctx = ValidationContext::default();

        assert_eq!(names(&recognizer.recognize("", &ctx)), vec!["empty_response"]);
        assert!(names(&recognizer.recognize("I'm sorry, I cannot do that.", &ctx))
            .contains(&"apology_prefix"));
        assert!(names(&recognizer.recognize("I'm sorry, I cannot do that.", &ctx))
            .contains(&"inability"));
        assert!(names(&recognizer.recognize("I don't have information on that.", &ctx))
            .contains(&"no_information"));
        assert!(names(&recognizer.recognize("Traceback (most recent call last)", &ctx))
            .contains(&"generic_exception"));
    }

    #[test]
    fn test_structural_json_only_when_attempted() {
        let recognizer = ErrorPatternRecognizer::new();
        let plain = ValidationContext::default();
        assert!(recognizer.recognize("just prose", &plain).matches.is_empty());
        assert_eq!(names(&recognizer.recognize("{\"a\": ", &plain)), vec!["malformed_json"]);

        let json = ValidationContext::default().expecting(ResponseType::Json);
        assert_eq!(names(&recognizer.recognize("just prose", &json)), vec!["malformed_json"]);
    }

    #[test]
    fn test_semantic_match() {
        let recognizer = ErrorPatternRecognizer::empty();
        recognizer
            .learn_pattern(ErrorPattern::new(
                "refund_policy",
                MatcherKind::Semantic,
                "refund policy expired receipt",
                Severity::Medium,
                "Talks about expired refunds",
            ))
            .unwrap();

        let ctx = ValidationContext::default();
        // 3 of 4 keywords = 75%
        assert_eq!(
            recognizer.recognize("Your refund receipt has expired.", &ctx).matches.len(),
            1
        );
        // 1 of 4 keywords = 25%
        assert!(recognizer.recognize("No refund today.", &ctx).matches.is_empty());
    }

    #[test]
    fn test_text_match_is_case_insensitive() {
        let recognizer = ErrorPatternRecognizer::empty();
        recognizer
            .learn_pattern(ErrorPattern::new(
                "lorem",
                MatcherKind::Text,
                "Lorem Ipsum",
                Severity::Low,
                "Placeholder text",
            ))
            .unwrap();
        let report = recognizer.recognize("here is lorem ipsum dolor", &ValidationContext::default());
        assert_eq!(report.matches.len(), 1);
    }

    #[test]
    fn test_learn_merges_by_name_and_text() {
        let recognizer = ErrorPatternRecognizer::empty();
        let pattern = ErrorPattern::new("p", MatcherKind::Text, "oops", Severity::Low, "oops");

        assert_eq!(recognizer.learn_pattern(pattern.clone()).unwrap(), LearnOutcome::Added);
        assert_eq!(recognizer.learn_pattern(pattern).unwrap(), LearnOutcome::Merged(2));

        let same_text = ErrorPattern::new("other", MatcherKind::Text, "oops", Severity::High, "x");
        assert_eq!(recognizer.learn_pattern(same_text).unwrap(), LearnOutcome::Merged(3));

        assert_eq!(recognizer.len(), 1);
        let stored = recognizer.get("p").unwrap();
        assert_eq!(stored.occurrences, 3);
        assert_eq!(stored.severity, Severity::High);
    }

    #[test]
    fn test_learn_invalid_regex() {
        let recognizer = ErrorPatternRecognizer::empty();
        let bad = ErrorPattern::new("bad", MatcherKind::Regex, "(", Severity::Low, "bad");
        assert!(matches!(
            recognizer.learn_pattern(bad),
            Err(AnalysisError::InvalidPattern { .. })
        ));
        assert!(recognizer.is_empty());
    }

    #[test]
    fn test_learned_from_issue() {
        let issue = Issue::new(
            IssueCategory::Structure,
            Severity::High,
            "Missing required field 'answer'",
        )
        .with_fix("Include the 'answer' field");
        let pattern = ErrorPattern::learned_from(&issue);
        assert_eq!(pattern.name, "learned_missing_required_field_answer");
        assert_eq!(pattern.kind, MatcherKind::Semantic);
        assert_eq!(pattern.suggested_fix.as_deref(), Some("Include the 'answer' field"));
    }
}

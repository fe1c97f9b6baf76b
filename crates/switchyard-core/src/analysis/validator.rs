//! Structural validation of provider output.
//!
//! The validator checks a response against its declared [`ResponseType`],
//! an optional JSON Schema, the context's required fields and any
//! caller-supplied rules. When the only thing wrong is a code fence around
//! otherwise valid output, it hands back the unwrapped text as a correction.

use std::fmt;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use super::patterns::{code_structure_error, strip_code_fence, xml_structure_error};
use crate::types::{Issue, IssueCategory, ResponseType, Severity, ValidationContext, ValidationResult};
use crate::AnalysisError;

type RuleCheck = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// A caller-supplied predicate over the response text.
#[derive(Clone)]
pub struct ValidationRule {
    /// Short identifier used in issue descriptions
    pub name: String,

    /// Severity reported when the rule fails
    pub severity: Severity,

    /// Required rules always fail as Critical
    pub required: bool,

    check: RuleCheck,
}

impl ValidationRule {
    /// Create an optional rule.
    pub fn new(
        name: impl Into<String>,
        severity: Severity,
        check: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            severity,
            required: false,
            check: Arc::new(check),
        }
    }

    /// Create a required rule.
    pub fn required(
        name: impl Into<String>,
        check: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            severity: Severity::Critical,
            required: true,
            check: Arc::new(check),
        }
    }

    /// Whether the response satisfies this rule.
    pub fn passes(&self, response: &str) -> bool {
        (self.check)(response)
    }

    fn failure_severity(&self) -> Severity {
        if self.required {
            Severity::Critical
        } else {
            self.severity
        }
    }
}

impl fmt::Debug for ValidationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationRule")
            .field("name", &self.name)
            .field("severity", &self.severity)
            .field("required", &self.required)
            .finish()
    }
}

/// Validates responses by type, schema and rules.
pub struct ResponseValidator {
    rules: Vec<ValidationRule>,
    schema: Option<jsonschema::Validator>,
    auto_correct: bool,
}

impl ResponseValidator {
    /// Create a validator with no rules and auto-correction enabled.
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            schema: None,
            auto_correct: true,
        }
    }

    /// Add a rule.
    pub fn with_rule(mut self, rule: ValidationRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Validate JSON responses against a JSON Schema.
    pub fn with_schema(mut self, schema: &JsonValue) -> Result<Self, AnalysisError> {
        let compiled = jsonschema::options()
            .build(schema)
            .map_err(|e| AnalysisError::InvalidSchema(e.to_string()))?;
        self.schema = Some(compiled);
        Ok(self)
    }

    /// Enable or disable the code-fence correction pass.
    pub fn with_auto_correct(mut self, enabled: bool) -> Self {
        self.auto_correct = enabled;
        self
    }

    /// Number of registered rules.
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Validate a response.
    ///
    /// If the response is invalid but unwrapping a surrounding code fence
    /// yields a valid one, the returned result keeps the original issues and
    /// carries the unwrapped text in `corrected`.
    pub fn validate(&self, response: &str, context: &ValidationContext) -> ValidationResult {
        let result = ValidationResult::from_issues(self.collect_issues(response, context));

        if result.is_valid || !self.auto_correct {
            return result;
        }

        match self.auto_correct(response, context) {
            Some(corrected) => {
                tracing::debug!("response repaired by stripping code fence");
                ValidationResult {
                    corrected: Some(corrected),
                    ..result
                }
            }
            None => result,
        }
    }

    /// Strip a surrounding code fence and re-validate.
    ///
    /// Returns the unwrapped text only if it passes validation.
    pub fn auto_correct(&self, response: &str, context: &ValidationContext) -> Option<String> {
        let stripped = strip_code_fence(response)?;
        let revalidated = ValidationResult::from_issues(self.collect_issues(&stripped, context));
        revalidated.is_valid.then_some(stripped)
    }

    fn collect_issues(&self, response: &str, context: &ValidationContext) -> Vec<Issue> {
        let mut issues = Vec::new();

        if response.trim().is_empty() {
            issues.push(
                Issue::new(IssueCategory::Structure, Severity::Critical, "Response is empty")
                    .with_fix("Provide a complete, non-empty answer"),
            );
            return issues;
        }

        match context.expected_type {
            ResponseType::Json => self.check_json(response, context, &mut issues),
            ResponseType::Xml => {
                if let Some(problem) = xml_structure_error(response) {
                    issues.push(
                        Issue::new(
                            IssueCategory::Format,
                            Severity::Critical,
                            format!("Invalid XML: {}", problem),
                        )
                        .with_fix("Return well-formed XML with every element closed"),
                    );
                }
            }
            ResponseType::Code => {
                if let Some(problem) = code_structure_error(response) {
                    issues.push(
                        Issue::new(
                            IssueCategory::Format,
                            Severity::High,
                            format!("Malformed code: {}", problem),
                        )
                        .with_fix("Balance all brackets and braces"),
                    );
                }
            }
            ResponseType::PlainText => {}
        }

        for rule in &self.rules {
            if !rule.passes(response) {
                issues.push(Issue::new(
                    IssueCategory::Rule,
                    rule.failure_severity(),
                    format!("Rule '{}' not satisfied", rule.name),
                ));
            }
        }

        issues
    }

    fn check_json(&self, response: &str, context: &ValidationContext, issues: &mut Vec<Issue>) {
        let value: JsonValue = match serde_json::from_str(response.trim()) {
            Ok(v) => v,
            Err(e) => {
                issues.push(
                    Issue::new(
                        IssueCategory::Format,
                        Severity::Critical,
                        format!("Invalid JSON: {}", e),
                    )
                    .with_fix("Return only a valid JSON document with no surrounding text"),
                );
                return;
            }
        };

        for field in &context.required_fields {
            let present = value.as_object().is_some_and(|obj| obj.contains_key(field));
            if !present {
                issues.push(
                    Issue::new(
                        IssueCategory::Structure,
                        Severity::High,
                        format!("Missing required field '{}'", field),
                    )
                    .with_fix(format!("Include the '{}' field", field)),
                );
            }
        }

        if let Some(schema) = &self.schema {
            for error in schema.iter_errors(&value) {
                issues.push(Issue::new(
                    IssueCategory::Structure,
                    Severity::High,
                    format!("Schema violation: {} at {}", error, error.instance_path),
                ));
            }
        }
    }
}

impl Default for ResponseValidator {
    fn default() -> Self {
        Self::new()
    }
}

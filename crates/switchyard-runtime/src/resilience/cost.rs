//! Per-provider cost accounting.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::{Add, AddAssign};

use crate::providers::{Pricing, TokenUsage};

/// Usage of one call, priced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsageInfo {
    pub input_tokens: u64,
    pub output_tokens: u64,

    /// Cost in USD
    pub cost: f64,

    pub model: String,
}

impl TokenUsageInfo {
    /// Price a provider's usage report.
    pub fn priced(usage: &TokenUsage, model: impl Into<String>, pricing: &Pricing) -> Self {
        Self {
            input_tokens: usage.input_tokens as u64,
            output_tokens: usage.output_tokens as u64,
            cost: pricing.cost(usage),
            model: model.into(),
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

impl Add for TokenUsageInfo {
    type Output = TokenUsageInfo;

    /// Counts and costs add; the model is the most recent non-empty one.
    fn add(mut self, rhs: TokenUsageInfo) -> TokenUsageInfo {
        self += rhs;
        self
    }
}

impl AddAssign for TokenUsageInfo {
    fn add_assign(&mut self, rhs: TokenUsageInfo) {
        self.input_tokens += rhs.input_tokens;
        self.output_tokens += rhs.output_tokens;
        self.cost += rhs.cost;
        if !rhs.model.is_empty() {
            self.model = rhs.model;
        }
    }
}

/// Accumulated usage for one provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,

    /// Number of recorded calls
    pub calls: u64,

    /// Cost in USD
    pub cost: f64,

    pub last_model: Option<String>,
}

impl UsageSummary {
    pub fn add(&mut self, usage: &TokenUsageInfo) {
        self.input_tokens += usage.input_tokens;
        self.output_tokens += usage.output_tokens;
        self.total_tokens += usage.total_tokens();
        self.calls += 1;
        self.cost += usage.cost;
        if !usage.model.is_empty() {
            self.last_model = Some(usage.model.clone());
        }
    }
}

/// Accumulated usage per provider.
#[derive(Debug, Default)]
pub struct CostTracker {
    usage: RwLock<HashMap<String, UsageSummary>>,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_usage(&self, provider: &str, usage: &TokenUsageInfo) {
        self.usage
            .write()
            .entry(provider.to_string())
            .or_default()
            .add(usage);
    }

    pub fn total_cost(&self) -> f64 {
        self.usage.read().values().map(|u| u.cost).sum()
    }

    pub fn provider_cost(&self, provider: &str) -> f64 {
        self.usage.read().get(provider).map(|u| u.cost).unwrap_or(0.0)
    }

    pub fn cost_by_provider(&self) -> HashMap<String, f64> {
        self.usage
            .read()
            .iter()
            .map(|(name, u)| (name.clone(), u.cost))
            .collect()
    }

    pub fn usage(&self, provider: &str) -> Option<UsageSummary> {
        self.usage.read().get(provider).cloned()
    }

    pub fn usage_by_provider(&self) -> HashMap<String, UsageSummary> {
        self.usage.read().clone()
    }

    /// Usage summed over every provider.
    pub fn total_usage(&self) -> UsageSummary {
        let usage = self.usage.read();
        let mut total = UsageSummary::default();
        for summary in usage.values() {
            total.input_tokens += summary.input_tokens;
            total.output_tokens += summary.output_tokens;
            total.total_tokens += summary.total_tokens;
            total.calls += summary.calls;
            total.cost += summary.cost;
        }
        total
    }

    pub fn reset(&self) {
        self.usage.write().clear();
    }

    pub fn reset_provider(&self, provider: &str) {
        self.usage.write().remove(provider);
    }
}

/// Guess which known provider served `model`.
///
/// Used only for usage reported without attribution. A known provider
/// whose name appears in the model string wins; otherwise well-known model
/// families map to their vendor if that vendor is registered.
pub fn infer_provider_from_model(model: &str, known: &[String]) -> Option<String> {
    let model = model.to_lowercase();
    if model.is_empty() {
        return None;
    }

    if let Some(name) = known
        .iter()
        .find(|name| !name.is_empty() && model.contains(&name.to_lowercase()))
    {
        return Some(name.clone());
    }

    let vendor = match model.as_str() {
        m if m.starts_with("gpt") || m.starts_with("o1") || m.starts_with("o3") => "openai",
        m if m.contains("claude") => "anthropic",
        m if m.contains("gemini") => "google",
        m if m.contains("mistral") || m.contains("mixtral") => "mistral",
        m if m.contains("command") => "cohere",
        m if m.contains("llama") => "ollama",
        _ => return None,
    };

    known
        .iter()
        .find(|name| name.to_lowercase().contains(vendor))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn info(input: u64, output: u64, cost: f64) -> TokenUsageInfo {
        TokenUsageInfo {
            input_tokens: input,
            output_tokens: output,
            cost,
            model: String::new(),
        }
    }

    #[test]
    fn test_pricing_per_thousand() {
        let usage = TokenUsageInfo::priced(
            &TokenUsage::new(1000, 500),
            "m",
            &Pricing::new(0.01, 0.03),
        );
        assert!((usage.cost - 0.025).abs() < 1e-12);
    }

    #[test]
    fn test_tracker_totals() {
        let tracker = CostTracker::new();
        tracker.record_usage("p1", &info(100, 50, 0.5));
        tracker.record_usage("p1", &info(10, 5, 0.25));
        tracker.record_usage("p2", &info(1, 1, 1.0));

        assert!((tracker.total_cost() - 1.75).abs() < 1e-12);
        assert!((tracker.provider_cost("p1") - 0.75).abs() < 1e-12);
        assert_eq!(tracker.usage("p1").unwrap().calls, 2);
        assert_eq!(tracker.total_usage().total_tokens, 167);

        tracker.reset_provider("p1");
        assert_eq!(tracker.provider_cost("p1"), 0.0);
        tracker.reset();
        assert_eq!(tracker.total_cost(), 0.0);
    }

    #[test]
    fn test_model_kept_when_adding_empty() {
        let a = TokenUsageInfo {
            model: "gpt-4o".into(),
            ..info(1, 1, 0.0)
        };
        let sum = a + info(1, 1, 0.0);
        assert_eq!(sum.model, "gpt-4o");
    }

    #[test]
    fn test_infer_provider() {
        let known = vec!["openai".to_string(), "anthropic-main".to_string(), "local".to_string()];
        assert_eq!(infer_provider_from_model("gpt-4o-mini", &known).as_deref(), Some("openai"));
        assert_eq!(
            infer_provider_from_model("claude-sonnet-4-5", &known).as_deref(),
            Some("anthropic-main")
        );
        assert_eq!(infer_provider_from_model("local-7b", &known).as_deref(), Some("local"));
        assert_eq!(infer_provider_from_model("gemini-pro", &known), None);
        assert_eq!(infer_provider_from_model("", &known), None);
    }

    proptest! {
        #[test]
        fn prop_usage_addition_associative(
            a in (0u64..10_000, 0u64..10_000, 0.0f64..10.0),
            b in (0u64..10_000, 0u64..10_000, 0.0f64..10.0),
            c in (0u64..10_000, 0u64..10_000, 0.0f64..10.0),
        ) {
            let (a, b, c) = (info(a.0, a.1, a.2), info(b.0, b.1, b.2), info(c.0, c.1, c.2));
            let left = (a.clone() + b.clone()) + c.clone();
            let right = a + (b + c);
            prop_assert_eq!(left.input_tokens, right.input_tokens);
            prop_assert_eq!(left.output_tokens, right.output_tokens);
            prop_assert!((left.cost - right.cost).abs() < 1e-9);
        }

        #[test]
        fn prop_recording_is_additive(
            records in proptest::collection::vec((0u64..5_000, 0u64..5_000, 0.0f64..5.0), 1..20)
        ) {
            let tracker = CostTracker::new();
            let mut expected = TokenUsageInfo::default();
            for (i, o, c) in records {
                let usage = info(i, o, c);
                tracker.record_usage("p", &usage);
                expected += usage;
            }
            let summary = tracker.usage("p").unwrap();
            prop_assert_eq!(summary.input_tokens, expected.input_tokens);
            prop_assert_eq!(summary.output_tokens, expected.output_tokens);
            prop_assert!((summary.cost - expected.cost).abs() < 1e-9);
        }
    }
}

//! Candidate selection.
//!
//! Turns the registry snapshot into an ordered candidate list for
//! failover. Selection never fails: an empty list is a valid answer and
//! failover reports it.

use std::cmp::Ordering as CmpOrdering;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::providers::{Capability, ProviderEntry};

/// How candidates are ordered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Priority ascending
    #[default]
    Priority,

    /// Effective price ascending
    LeastCost,

    /// Priority order, rotated by one on every selection
    RoundRobin,

    /// Average latency ascending; unmeasured providers last
    Fastest,

    Random,

    /// Named provider first, the rest by priority
    Pinned(String),
}

/// Per-call constraints on selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionContext {
    /// Moved to the front if eligible
    pub preferred_provider: Option<String>,

    pub required_capabilities: Vec<Capability>,
    pub excluded_providers: Vec<String>,
}

impl SelectionContext {
    pub fn prefer(mut self, provider: impl Into<String>) -> Self {
        self.preferred_provider = Some(provider.into());
        self
    }

    pub fn require(mut self, capability: Capability) -> Self {
        if !self.required_capabilities.contains(&capability) {
            self.required_capabilities.push(capability);
        }
        self
    }

    pub fn exclude(mut self, provider: impl Into<String>) -> Self {
        self.excluded_providers.push(provider.into());
        self
    }

    fn admits(&self, entry: &ProviderEntry) -> bool {
        entry.metadata.enabled
            && !self.excluded_providers.iter().any(|p| p == entry.name())
            && self
                .required_capabilities
                .iter()
                .all(|c| entry.metadata.capabilities.supports(*c))
    }
}

/// Orders candidates according to a [`SelectionStrategy`].
#[derive(Debug, Default)]
pub struct ProviderSelector {
    cursor: AtomicUsize,
}

impl ProviderSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ordered, deduplicated, enabled candidates.
    ///
    /// Healthy providers come before unhealthy ones; within each group the
    /// strategy decides. A pinned or preferred provider goes first
    /// regardless of health. `max_candidates` of zero means no limit.
    pub fn select(
        &self,
        entries: Vec<ProviderEntry>,
        strategy: &SelectionStrategy,
        max_candidates: usize,
        context: &SelectionContext,
    ) -> Vec<ProviderEntry> {
        let mut seen = HashSet::new();
        let mut candidates: Vec<ProviderEntry> = entries
            .into_iter()
            .filter(|e| context.admits(e))
            .filter(|e| seen.insert(e.metadata.name.clone()))
            .collect();

        candidates.sort_by(by_priority);
        match strategy {
            SelectionStrategy::Priority | SelectionStrategy::Pinned(_) => {}
            SelectionStrategy::LeastCost => candidates.sort_by(|a, b| {
                a.metadata
                    .pricing
                    .effective_price()
                    .total_cmp(&b.metadata.pricing.effective_price())
                    .then_with(|| by_priority(a, b))
            }),
            SelectionStrategy::RoundRobin => {
                if !candidates.is_empty() {
                    let offset = self.cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
                    candidates.rotate_left(offset);
                }
            }
            SelectionStrategy::Fastest => candidates.sort_by(|a, b| {
                match (a.latency_ms, b.latency_ms) {
                    (Some(x), Some(y)) => x.total_cmp(&y),
                    (Some(_), None) => CmpOrdering::Less,
                    (None, Some(_)) => CmpOrdering::Greater,
                    (None, None) => CmpOrdering::Equal,
                }
                .then_with(|| by_priority(a, b))
            }),
            SelectionStrategy::Random => candidates.shuffle(&mut rand::rng()),
        }

        // Stable: keeps strategy order within each group
        candidates.sort_by_key(|e| !e.health.healthy);

        let forced = match strategy {
            SelectionStrategy::Pinned(name) => Some(name.as_str()),
            _ => context.preferred_provider.as_deref(),
        };
        if let Some(name) = forced {
            match candidates.iter().position(|e| e.name() == name) {
                Some(pos) => {
                    let entry = candidates.remove(pos);
                    candidates.insert(0, entry);
                }
                None => warn!(provider = name, "Requested provider is not eligible, ignoring"),
            }
        }

        if max_candidates > 0 {
            candidates.truncate(max_candidates);
        }
        candidates
    }
}

fn by_priority(a: &ProviderEntry, b: &ProviderEntry) -> CmpOrdering {
    a.metadata
        .priority
        .cmp(&b.metadata.priority)
        .then_with(|| a.seq.cmp(&b.seq))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::ProviderHealth;
    use crate::providers::{Capabilities, Pricing, ProviderMetadata};
    use crate::test_support::ScriptedProvider;
    use std::sync::Arc;

    fn entry(name: &str, priority: u32, seq: u64) -> ProviderEntry {
        ProviderEntry {
            client: Arc::new(ScriptedProvider::always(name, "ok")),
            metadata: ProviderMetadata::new(name).with_priority(priority),
            health: ProviderHealth::default(),
            latency_ms: None,
            seq,
        }
    }

    fn names(entries: &[ProviderEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.name()).collect()
    }

    fn pool() -> Vec<ProviderEntry> {
        vec![entry("c", 3, 0), entry("a", 1, 1), entry("b", 2, 2)]
    }

    #[test]
    fn test_priority_order() {
        let selector = ProviderSelector::new();
        let out = selector.select(pool(), &SelectionStrategy::Priority, 0, &Default::default());
        assert_eq!(names(&out), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_disabled_and_excluded_dropped() {
        let mut entries = pool();
        entries[1].metadata.enabled = false;
        let ctx = SelectionContext::default().exclude("c");

        let out = ProviderSelector::new().select(entries, &SelectionStrategy::Priority, 0, &ctx);
        assert_eq!(names(&out), vec!["b"]);
    }

    #[test]
    fn test_duplicates_removed() {
        let entries = vec![entry("a", 1, 0), entry("a", 1, 1), entry("b", 2, 2)];
        let out = ProviderSelector::new().select(entries, &SelectionStrategy::Priority, 0, &Default::default());
        assert_eq!(names(&out), vec!["a", "b"]);
    }

    #[test]
    fn test_least_cost() {
        let mut entries = pool();
        entries[0].metadata.pricing = Pricing::new(0.001, 0.001); // c
        entries[1].metadata.pricing = Pricing::new(0.01, 0.03); // a
        entries[2].metadata.pricing = Pricing::new(0.002, 0.004); // b

        let out = ProviderSelector::new().select(entries, &SelectionStrategy::LeastCost, 0, &Default::default());
        assert_eq!(names(&out), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_round_robin_rotates() {
        let selector = ProviderSelector::new();
        let first = selector.select(pool(), &SelectionStrategy::RoundRobin, 0, &Default::default());
        let second = selector.select(pool(), &SelectionStrategy::RoundRobin, 0, &Default::default());
        let third = selector.select(pool(), &SelectionStrategy::RoundRobin, 0, &Default::default());
        assert_eq!(names(&first), vec!["a", "b", "c"]);
        assert_eq!(names(&second), vec!["b", "c", "a"]);
        assert_eq!(names(&third), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_fastest_puts_unmeasured_last() {
        let mut entries = pool();
        entries[0].latency_ms = Some(50.0); // c
        entries[2].latency_ms = Some(200.0); // b

        let out = ProviderSelector::new().select(entries, &SelectionStrategy::Fastest, 0, &Default::default());
        assert_eq!(names(&out), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_random_keeps_members() {
        let out = ProviderSelector::new().select(pool(), &SelectionStrategy::Random, 0, &Default::default());
        let mut got = names(&out);
        got.sort();
        assert_eq!(got, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_pinned_first_then_priority() {
        let out = ProviderSelector::new().select(
            pool(),
            &SelectionStrategy::Pinned("c".into()),
            0,
            &Default::default(),
        );
        assert_eq!(names(&out), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_unhealthy_last_but_kept() {
        let mut entries = pool();
        entries[1].health.healthy = false; // a

        let out = ProviderSelector::new().select(entries, &SelectionStrategy::Priority, 0, &Default::default());
        assert_eq!(names(&out), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_preferred_and_capabilities() {
        let mut entries = pool();
        entries[2].metadata.capabilities = Capabilities::all(); // b
        entries[0].metadata.capabilities = Capabilities::all(); // c

        let ctx = SelectionContext::default()
            .require(Capability::Embeddings)
            .prefer("c");
        let out = ProviderSelector::new().select(entries, &SelectionStrategy::Priority, 0, &ctx);
        assert_eq!(names(&out), vec!["c", "b"]);
    }

    #[test]
    fn test_max_candidates() {
        let out = ProviderSelector::new().select(pool(), &SelectionStrategy::Priority, 2, &Default::default());
        assert_eq!(names(&out), vec!["a", "b"]);
    }
}

//! Per-pair success statistics backing the rule-based selector.

use dashmap::DashMap;
use serde::Serialize;

/// Running counters for one (protection type, strategy) pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsRecord {
    pub attempts: u64,
    pub successes: u64,
}

impl StatsRecord {
    /// Observed success rate, `None` before the first attempt.
    pub fn success_rate(&self) -> Option<f64> {
        (self.attempts > 0).then(|| self.successes as f64 / self.attempts as f64)
    }
}

/// Concurrent store of per-pair counters.
///
/// Updates go through the sharded entry API, so both counters of a pair
/// move together and a torn read (attempts bumped, successes not) is never
/// observable. Unrelated pairs do not contend.
#[derive(Debug, Default)]
pub struct StatsStore {
    pairs: DashMap<(String, String), StatsRecord>,
}

impl StatsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one attempt for a pair.
    pub fn record(&self, protection_type: &str, strategy_name: &str, success: bool) {
        let mut entry = self
            .pairs
            .entry((protection_type.to_string(), strategy_name.to_string()))
            .or_default();
        entry.attempts += 1;
        if success {
            entry.successes += 1;
        }
    }

    /// Counter snapshot for a pair, zeroed when the pair was never tried.
    pub fn get(&self, protection_type: &str, strategy_name: &str) -> StatsRecord {
        self.pairs
            .get(&(protection_type.to_string(), strategy_name.to_string()))
            .map(|entry| *entry)
            .unwrap_or_default()
    }

    /// All pairs with their counters, sorted for stable output.
    pub fn snapshot(&self) -> Vec<((String, String), StatsRecord)> {
        let mut rows: Vec<_> = self
            .pairs
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }

    /// Number of pairs with at least one recorded attempt.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

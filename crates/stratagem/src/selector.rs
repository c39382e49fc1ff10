//! Rule-based strategy selection from observed success rates.
//!
//! Never-tried strategies score an optimistic prior instead of zero, so new
//! catalog entries get traffic instead of being starved by incumbents with
//! long histories.

use std::sync::Arc;

use tracing::debug;

use crate::registry::StrategyRegistry;
use crate::stats::StatsStore;
use crate::types::{EngineResult, Strategy};

/// Statistics-driven selector over the strategy catalog.
pub struct RuleBasedSelector {
    registry: Arc<StrategyRegistry>,
    stats: Arc<StatsStore>,
    optimistic_prior: f64,
}

impl RuleBasedSelector {
    pub fn new(
        registry: Arc<StrategyRegistry>,
        stats: Arc<StatsStore>,
        optimistic_prior: f64,
    ) -> Self {
        Self {
            registry,
            stats,
            optimistic_prior,
        }
    }

    /// Pick the highest-scoring candidate for a protection type.
    ///
    /// Score is the observed success rate, or the optimistic prior with no
    /// attempts on record. Ties go to the candidate with fewer attempts,
    /// then to catalog order.
    pub fn best_strategy(&self, protection_type: &str) -> EngineResult<Strategy> {
        let candidates = self.registry.strategies_for(protection_type)?;

        let mut best: Option<(usize, f64, u64)> = None;
        for (index, strategy) in candidates.iter().enumerate() {
            let record = self.stats.get(protection_type, strategy.name());
            let rate = record.success_rate().unwrap_or(self.optimistic_prior);

            let replaces = match best {
                None => true,
                Some((_, best_rate, best_attempts)) => {
                    rate > best_rate || (rate == best_rate && record.attempts < best_attempts)
                }
            };
            if replaces {
                best = Some((index, rate, record.attempts));
            }
        }

        let (index, rate, attempts) = best.ok_or_else(|| {
            crate::types::EngineError::UnknownProtectionType(protection_type.to_string())
        })?;
        let strategy = candidates[index].clone();
        debug!(
            "rule-based pick for `{protection_type}`: {strategy} (rate {rate:.2}, {attempts} attempts)"
        );
        Ok(strategy)
    }

    /// Fold one realized outcome into the pair counters.
    pub fn record_outcome(&self, protection_type: &str, strategy_name: &str, success: bool) {
        self.stats.record(protection_type, strategy_name, success);
    }
}

//! A/B arbitration between the learned and rule-based policies.
//!
//! Every decision starts with an independent weighted coin flip. The
//! learned arm is best-effort: a missing model or a prediction outside the
//! catalog falls through to the rule-based policy, and the decision is
//! labeled with the policy that actually chose. Mislabeling fallbacks as
//! ML would poison the per-method comparison the split exists to produce.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::predictor::StrategyPredictor;
use crate::registry::StrategyRegistry;
use crate::selector::RuleBasedSelector;
use crate::types::{
    Decision, DecisionToken, EngineError, EngineResult, ProtectionContext, SelectionMethod,
};

/// One per-decision arm draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoinFlip {
    UseMl,
    UseRuleBased,
}

/// Weighted-coin arbiter over the two selection policies.
pub struct AbArbiter {
    selector: Arc<RuleBasedSelector>,
    predictor: Arc<StrategyPredictor>,
    registry: Arc<StrategyRegistry>,
    ml_weight: f64,
    rng: Mutex<StdRng>,
}

impl AbArbiter {
    /// Arbiter with an entropy-seeded RNG.
    pub fn new(
        selector: Arc<RuleBasedSelector>,
        predictor: Arc<StrategyPredictor>,
        registry: Arc<StrategyRegistry>,
        ml_weight: f64,
    ) -> EngineResult<Self> {
        Self::with_rng(selector, predictor, registry, ml_weight, StdRng::from_entropy())
    }

    /// Arbiter with a caller-supplied RNG, for reproducible draws.
    pub fn with_rng(
        selector: Arc<RuleBasedSelector>,
        predictor: Arc<StrategyPredictor>,
        registry: Arc<StrategyRegistry>,
        ml_weight: f64,
        rng: StdRng,
    ) -> EngineResult<Self> {
        if !ml_weight.is_finite() || !(0.0..=1.0).contains(&ml_weight) {
            return Err(EngineError::Config(format!(
                "ml_weight must be within [0, 1], got {ml_weight}"
            )));
        }
        Ok(Self {
            selector,
            predictor,
            registry,
            ml_weight,
            rng: Mutex::new(rng),
        })
    }

    pub fn ml_weight(&self) -> f64 {
        self.ml_weight
    }

    /// Draw which arm handles the next decision.
    fn flip(&self) -> CoinFlip {
        let use_ml = self
            .rng
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .gen_bool(self.ml_weight);
        if use_ml {
            CoinFlip::UseMl
        } else {
            CoinFlip::UseRuleBased
        }
    }

    /// Decide a strategy for one request.
    ///
    /// The only error out of here is an unresolvable protection type; every
    /// learned-arm problem falls back to the rule-based policy instead.
    pub fn select_strategy(
        &self,
        protection_type: &str,
        context: &ProtectionContext,
    ) -> EngineResult<Decision> {
        let (strategy, method) = match self.flip() {
            CoinFlip::UseMl => match self.predictor.predict_best_strategy(context) {
                Ok(strategy) if self.registry.is_registered(protection_type, strategy.name()) => {
                    (strategy, SelectionMethod::Ml)
                }
                Ok(strategy) => {
                    warn!(
                        "model predicted `{strategy}` outside the `{protection_type}` catalog, \
                         using rule-based pick"
                    );
                    (self.selector.best_strategy(protection_type)?, SelectionMethod::RuleBased)
                }
                Err(e) => {
                    warn!("learned policy unavailable ({e}), using rule-based pick");
                    (self.selector.best_strategy(protection_type)?, SelectionMethod::RuleBased)
                }
            },
            CoinFlip::UseRuleBased => (
                self.selector.best_strategy(protection_type)?,
                SelectionMethod::RuleBased,
            ),
        };

        debug!("decision for `{protection_type}`: {strategy} via {method}");
        Ok(Decision {
            protection_type: protection_type.to_string(),
            strategy,
            method,
            decided_at: Utc::now(),
            token: DecisionToken::mint(),
        })
    }
}

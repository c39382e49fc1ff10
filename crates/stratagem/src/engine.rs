//! Decision engine — the public decide/report surface.
//!
//! ## Decision loop
//!
//! 1. [`select_strategy`] arbitrates between the two policies and returns a
//!    tokened [`Decision`].
//! 2. The caller executes the strategy however it likes.
//! 3. [`log_result`] persists the outcome and feeds the rule-based
//!    counters; the learned policy only improves through offline
//!    retraining plus [`reload_model`].
//!
//! [`select_strategy`]: DecisionEngine::select_strategy
//! [`log_result`]: DecisionEngine::log_result
//! [`reload_model`]: DecisionEngine::reload_model

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::rngs::StdRng;
use tracing::info;

use crate::arbiter::AbArbiter;
use crate::config::EngineConfig;
use crate::model::ArtifactMeta;
use crate::outcomes::{self, MethodSummary, OutcomeLog};
use crate::predictor::StrategyPredictor;
use crate::recorder::{OutcomeRecorder, OutcomeReport, PendingDecisions};
use crate::registry::StrategyRegistry;
use crate::selector::RuleBasedSelector;
use crate::stats::{StatsRecord, StatsStore};
use crate::types::{Decision, EngineResult, ProtectionContext, SelectionMethod};

/// Adaptive strategy decision engine.
///
/// Cheap to share behind an `Arc`; all methods take `&self` and internal
/// state is independently locked.
pub struct DecisionEngine {
    registry: Arc<StrategyRegistry>,
    stats: Arc<StatsStore>,
    predictor: Arc<StrategyPredictor>,
    arbiter: AbArbiter,
    recorder: OutcomeRecorder,
    pending: Arc<PendingDecisions>,
    model_path: PathBuf,
    log_path: PathBuf,
}

impl DecisionEngine {
    /// Build an engine from config, rebuilding the rule-based counters
    /// from any existing outcome log.
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        Self::build(config, None)
    }

    /// Build an engine with a caller-supplied RNG, for reproducible
    /// arbitration in tests and replay setups.
    pub fn with_rng(config: EngineConfig, rng: StdRng) -> EngineResult<Self> {
        Self::build(config, Some(rng))
    }

    fn build(config: EngineConfig, rng: Option<StdRng>) -> EngineResult<Self> {
        config.validate()?;

        let registry = Arc::new(match &config.registry_path {
            Some(path) => StrategyRegistry::from_file(path)?,
            None => StrategyRegistry::with_defaults(),
        });
        let stats = Arc::new(StatsStore::new());
        let selector = Arc::new(RuleBasedSelector::new(
            Arc::clone(&registry),
            Arc::clone(&stats),
            config.optimistic_prior,
        ));
        let predictor = Arc::new(StrategyPredictor::open(&config.model_path));

        let arbiter = match rng {
            Some(rng) => AbArbiter::with_rng(
                Arc::clone(&selector),
                Arc::clone(&predictor),
                Arc::clone(&registry),
                config.ml_weight,
                rng,
            )?,
            None => AbArbiter::new(
                Arc::clone(&selector),
                Arc::clone(&predictor),
                Arc::clone(&registry),
                config.ml_weight,
            )?,
        };

        let pending = Arc::new(PendingDecisions::new(
            config.pending_cap,
            config.pending_max_age_secs,
        ));
        let recorder = OutcomeRecorder::new(
            OutcomeLog::open(&config.log_path)?,
            Arc::clone(&stats),
            Arc::clone(&pending),
            Arc::clone(&registry),
        );

        // The counters live in memory; the log is the durable copy. Replay
        // it so rates survive restarts.
        let (history, _) = outcomes::read_log(&config.log_path)?;
        let mut replayed = 0usize;
        for record in &history {
            if record.method == SelectionMethod::RuleBased {
                stats.record(&record.protection_type, record.strategy.name(), record.success);
                replayed += 1;
            }
        }
        if replayed > 0 {
            info!("rebuilt rule-based counters from {replayed} logged outcomes");
        }

        Ok(Self {
            registry,
            stats,
            predictor,
            arbiter,
            recorder,
            pending,
            model_path: config.model_path,
            log_path: config.log_path,
        })
    }

    /// Decide which strategy to attempt for one request.
    ///
    /// The decision is tracked until its outcome is reported or it ages
    /// out; pass the token back through [`log_result`](Self::log_result).
    pub fn select_strategy(
        &self,
        protection_type: &str,
        context: &ProtectionContext,
    ) -> EngineResult<Decision> {
        let decision = self.arbiter.select_strategy(protection_type, context)?;
        self.pending.register(decision.clone());
        Ok(decision)
    }

    /// Report the realized outcome of a prior decision.
    pub fn log_result(&self, report: OutcomeReport) -> EngineResult<()> {
        self.recorder.log_result(report)
    }

    /// Swap in a freshly trained model artifact from disk.
    pub fn reload_model(&self) -> EngineResult<ArtifactMeta> {
        self.predictor.reload()
    }

    /// Whether the learned policy currently has a model.
    pub fn model_available(&self) -> bool {
        self.predictor.is_available()
    }

    /// Metadata of the loaded model, if any.
    pub fn model_meta(&self) -> Option<ArtifactMeta> {
        self.predictor.meta()
    }

    /// The strategy catalog in use.
    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    /// Copy of the rule-based counters, sorted by pair.
    pub fn stats_snapshot(&self) -> Vec<((String, String), StatsRecord)> {
        self.stats.snapshot()
    }

    /// Per-method aggregates over the whole outcome log.
    pub fn method_summary(&self) -> EngineResult<HashMap<SelectionMethod, MethodSummary>> {
        let (records, _) = outcomes::read_log(&self.log_path)?;
        Ok(outcomes::summarize_by_method(&records))
    }

    /// Decisions currently awaiting an outcome report.
    pub fn pending_decisions(&self) -> usize {
        self.pending.len()
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}

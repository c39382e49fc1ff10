//! Stratagem — adaptive bypass-strategy selection with live A/B arbitration.
//!
//! For each request against a protection-guarded target, the engine flips a
//! weighted coin between a statistics-driven rule-based selector and a
//! learned classifier, hands back a [`Decision`], and folds the reported
//! outcome into an append-only log. The log drives both the live
//! rule-based counters and offline retraining of the classifier.

pub mod arbiter;
pub mod config;
pub mod engine;
pub mod features;
pub mod model;
pub mod outcomes;
pub mod predictor;
pub mod recorder;
pub mod registry;
pub mod selector;
pub mod stats;
pub mod trainer;
pub mod types;

pub use arbiter::{AbArbiter, CoinFlip};
pub use config::{resolve_data_dir, EngineConfig};
pub use engine::DecisionEngine;
pub use features::{url_depth, FeatureBuilder, FeatureSchema, FeatureVector, FEATURE_DIM};
pub use model::{ArtifactMeta, ArtifactReader, ArtifactWriter, Classifier, ModelArtifact};
pub use outcomes::{read_log, summarize_by_method, MethodSummary, OutcomeLog, OutcomeRecord, LOG_HEADER};
pub use predictor::StrategyPredictor;
pub use recorder::{OutcomeMetadata, OutcomeRecorder, OutcomeReport, PendingDecisions};
pub use registry::StrategyRegistry;
pub use selector::RuleBasedSelector;
pub use stats::{StatsRecord, StatsStore};
pub use trainer::{should_retrain, train_from_log, train_if_due, RetrainPolicy, TrainReport};
pub use types::*;

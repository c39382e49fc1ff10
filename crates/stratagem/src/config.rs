//! Engine configuration and data-directory resolution.

use std::path::{Path, PathBuf};

use crate::types::{EngineError, EngineResult};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "STRATAGEM_DIR";
/// Strategy catalog file name inside the data directory.
pub const REGISTRY_FILENAME: &str = "strategies.json";
/// Model artifact file name inside the data directory.
pub const MODEL_FILENAME: &str = "strategy_model.sgem";
/// Outcome log file name inside the data directory.
pub const LOG_FILENAME: &str = "outcomes.csv";

/// Probability of routing a decision to the learned policy.
pub const DEFAULT_ML_WEIGHT: f64 = 0.5;
/// Success rate assumed for strategies with no recorded attempts.
pub const DEFAULT_OPTIMISTIC_PRIOR: f64 = 0.75;
/// Bound on decisions held while awaiting their outcome report.
pub const DEFAULT_PENDING_CAP: usize = 1024;
/// Age in seconds after which an unreported decision is dropped.
pub const DEFAULT_PENDING_MAX_AGE_SECS: u64 = 600;

/// Construction parameters for a [`DecisionEngine`](crate::engine::DecisionEngine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Strategy catalog file. `None` uses the built-in catalog.
    pub registry_path: Option<PathBuf>,
    /// Model artifact consumed by the predictor.
    pub model_path: PathBuf,
    /// Append-only outcome log.
    pub log_path: PathBuf,
    /// Probability of the learned arm per decision, in `[0, 1]`.
    pub ml_weight: f64,
    /// Assumed success rate for never-tried strategies, in `[0, 1]`.
    pub optimistic_prior: f64,
    /// Maximum pending decisions retained for outcome correlation.
    pub pending_cap: usize,
    /// Maximum age of a pending decision before it is dropped.
    pub pending_max_age_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::at_dir(resolve_data_dir(None))
    }
}

impl EngineConfig {
    /// Config rooted at an explicit data directory.
    ///
    /// The catalog file is only picked up if it already exists there;
    /// otherwise the built-in catalog applies.
    pub fn at_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        let registry = dir.join(REGISTRY_FILENAME);

        Self {
            registry_path: registry.exists().then_some(registry),
            model_path: dir.join(MODEL_FILENAME),
            log_path: dir.join(LOG_FILENAME),
            ml_weight: DEFAULT_ML_WEIGHT,
            optimistic_prior: DEFAULT_OPTIMISTIC_PRIOR,
            pending_cap: DEFAULT_PENDING_CAP,
            pending_max_age_secs: DEFAULT_PENDING_MAX_AGE_SECS,
        }
    }

    /// Check numeric ranges before the engine is built.
    pub fn validate(&self) -> EngineResult<()> {
        if !self.ml_weight.is_finite() || !(0.0..=1.0).contains(&self.ml_weight) {
            return Err(EngineError::Config(format!(
                "ml_weight must be within [0, 1], got {}",
                self.ml_weight
            )));
        }
        if !self.optimistic_prior.is_finite() || !(0.0..=1.0).contains(&self.optimistic_prior) {
            return Err(EngineError::Config(format!(
                "optimistic_prior must be within [0, 1], got {}",
                self.optimistic_prior
            )));
        }
        if self.pending_cap == 0 {
            return Err(EngineError::Config(
                "pending_cap must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Resolve the engine data directory.
pub fn resolve_data_dir(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }

    if let Ok(env_dir) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(env_dir);
    }

    let cwd_dir = PathBuf::from(".stratagem");
    if cwd_dir.exists() {
        return cwd_dir;
    }

    resolve_default_data_dir()
}

fn resolve_default_data_dir() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());

    PathBuf::from(format!("{home}/.stratagem"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_dir_wins() {
        let dir = resolve_data_dir(Some(Path::new("/tmp/custom")));
        assert_eq!(dir, PathBuf::from("/tmp/custom"));
    }

    #[test]
    fn test_at_dir_paths() {
        let config = EngineConfig::at_dir("/tmp/stratagem-test-missing");
        assert_eq!(
            config.model_path,
            PathBuf::from("/tmp/stratagem-test-missing").join(MODEL_FILENAME)
        );
        assert!(config.registry_path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_weight() {
        let mut config = EngineConfig::at_dir("/tmp/x");
        config.ml_weight = 1.5;
        assert!(config.validate().is_err());

        config.ml_weight = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_cap() {
        let mut config = EngineConfig::at_dir("/tmp/x");
        config.pending_cap = 0;
        assert!(config.validate().is_err());
    }
}

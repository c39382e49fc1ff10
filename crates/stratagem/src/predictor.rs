//! Learned strategy prediction over a loadable model artifact.
//!
//! The predictor degrades instead of failing: a missing or corrupt
//! artifact leaves it empty, callers get [`EngineError::ModelUnavailable`],
//! and the arbiter routes around it. Retrains land via [`reload`], which
//! swaps the whole artifact in one step so in-flight predictions finish
//! against the model they started with.
//!
//! [`reload`]: StrategyPredictor::reload

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use crate::model::{ArtifactMeta, ArtifactReader, ModelArtifact};
use crate::types::{EngineError, EngineResult, ProtectionContext, Strategy};

/// Inference endpoint over the current model artifact.
pub struct StrategyPredictor {
    path: PathBuf,
    current: RwLock<Option<Arc<ModelArtifact>>>,
}

impl StrategyPredictor {
    /// Open a predictor over an artifact path.
    ///
    /// Never fails: load problems are logged and the predictor starts
    /// empty until a later [`reload`](Self::reload) succeeds.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let current = match ArtifactReader::read_from_file(&path) {
            Ok(artifact) => {
                info!(
                    "loaded strategy model v{} ({} classes) from {}",
                    artifact.meta.model_version,
                    artifact.classifier.labels().len(),
                    path.display()
                );
                Some(Arc::new(artifact))
            }
            Err(e) => {
                if path.exists() {
                    warn!("unreadable model artifact at {}: {e}", path.display());
                } else {
                    info!(
                        "no model artifact at {}, predictions disabled until trained",
                        path.display()
                    );
                }
                None
            }
        };

        Self {
            path,
            current: RwLock::new(current),
        }
    }

    pub fn artifact_path(&self) -> &Path {
        &self.path
    }

    /// Whether a model is currently loaded.
    pub fn is_available(&self) -> bool {
        self.artifact().is_some()
    }

    /// Handle to the current artifact, if any.
    pub fn artifact(&self) -> Option<Arc<ModelArtifact>> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Metadata of the current artifact, if any.
    pub fn meta(&self) -> Option<ArtifactMeta> {
        self.artifact().map(|a| a.meta.clone())
    }

    /// Re-read the artifact from disk and swap it in.
    ///
    /// The new artifact is fully parsed before the swap, so a bad file on
    /// disk leaves the current model serving.
    pub fn reload(&self) -> EngineResult<ArtifactMeta> {
        let artifact = ArtifactReader::read_from_file(&self.path)?;
        let meta = artifact.meta.clone();

        let mut slot = self.current.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(Arc::new(artifact));
        drop(slot);

        info!(
            "model reloaded: v{} trained on {} samples",
            meta.model_version, meta.training_samples
        );
        Ok(meta)
    }

    /// Predict the best strategy for a context.
    pub fn predict_best_strategy(&self, context: &ProtectionContext) -> EngineResult<Strategy> {
        let artifact = self
            .artifact()
            .ok_or_else(|| EngineError::ModelUnavailable("no model artifact loaded".to_string()))?;

        let name = artifact.predict(context).ok_or_else(|| {
            EngineError::ModelUnavailable("classifier has no classes".to_string())
        })?;
        Ok(Strategy::from(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{FeatureBuilder, FeatureSchema};
    use crate::model::{ArtifactWriter, CentroidClassifier, Classifier};
    use chrono::Utc;

    fn write_artifact(path: &Path, version: u32, label: &str) {
        let schema = FeatureSchema::builtin();
        let context = ProtectionContext::new("cloudflare");
        let rows = vec![(FeatureBuilder::encode_with(&schema, &context), label.to_string())];

        let artifact = ModelArtifact {
            meta: ArtifactMeta {
                model_version: version,
                trained_at: Utc::now(),
                training_samples: 1,
                log_records: 1,
            },
            schema,
            classifier: Classifier::Centroid(CentroidClassifier::fit(&rows)),
        };
        ArtifactWriter::write_to_file(&artifact, path).unwrap();
    }

    #[test]
    fn test_missing_artifact_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let predictor = StrategyPredictor::open(dir.path().join("none.sgem"));

        assert!(!predictor.is_available());
        let err = predictor
            .predict_best_strategy(&ProtectionContext::new("cloudflare"))
            .unwrap_err();
        assert!(matches!(err, EngineError::ModelUnavailable(_)));
    }

    #[test]
    fn test_corrupt_artifact_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.sgem");
        std::fs::write(&path, b"garbage").unwrap();

        let predictor = StrategyPredictor::open(&path);
        assert!(!predictor.is_available());
    }

    #[test]
    fn test_predicts_from_loaded_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.sgem");
        write_artifact(&path, 1, "selenium_stealth");

        let predictor = StrategyPredictor::open(&path);
        assert!(predictor.is_available());

        let strategy = predictor
            .predict_best_strategy(&ProtectionContext::new("cloudflare"))
            .unwrap();
        assert_eq!(strategy.name(), "selenium_stealth");
    }

    #[test]
    fn test_reload_swaps_versions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.sgem");
        write_artifact(&path, 1, "selenium_stealth");

        let predictor = StrategyPredictor::open(&path);
        assert_eq!(predictor.meta().unwrap().model_version, 1);

        write_artifact(&path, 2, "playwright_interactive");
        let meta = predictor.reload().unwrap();
        assert_eq!(meta.model_version, 2);

        let strategy = predictor
            .predict_best_strategy(&ProtectionContext::new("cloudflare"))
            .unwrap();
        assert_eq!(strategy.name(), "playwright_interactive");
    }

    #[test]
    fn test_failed_reload_keeps_current_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.sgem");
        write_artifact(&path, 1, "selenium_stealth");

        let predictor = StrategyPredictor::open(&path);
        std::fs::write(&path, b"truncated junk").unwrap();

        assert!(predictor.reload().is_err());
        assert!(predictor.is_available());
        assert_eq!(predictor.meta().unwrap().model_version, 1);
    }
}

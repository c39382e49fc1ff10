//! Offline model training from the outcome log.
//!
//! Runs outside the decision path, typically from a cron job or a
//! maintenance thread: read the log, refit the classifier on successful
//! outcomes, write a fresh artifact. The live engine picks the artifact up
//! through a predictor reload; trainer and engine share nothing but the
//! file.

use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use tracing::info;

use crate::features::{url_depth, FeatureBuilder, FeatureSchema, FeatureVector};
use crate::model::{
    ArtifactMeta, ArtifactReader, ArtifactWriter, CentroidClassifier, Classifier, ModelArtifact,
};
use crate::outcomes::{count_records, read_log, OutcomeRecord};
use crate::types::{EngineError, EngineResult, ProtectionContext, TimeOfDay};

/// Cadence policy for scheduled retraining.
#[derive(Debug, Clone, Copy)]
pub struct RetrainPolicy {
    /// Retrain once this many rows landed after the last training run.
    pub min_new_records: u64,
    /// Retrain when the current model is older than this many hours,
    /// regardless of volume.
    pub max_age_hours: i64,
}

impl Default for RetrainPolicy {
    fn default() -> Self {
        Self {
            min_new_records: 100,
            max_age_hours: 24,
        }
    }
}

/// Result of one training run.
#[derive(Debug, Clone)]
pub struct TrainReport {
    /// Rows the classifier was fitted on.
    pub samples: usize,
    /// Malformed log rows skipped while reading.
    pub skipped: usize,
    /// Strategy labels the new model can emit.
    pub labels: Vec<String>,
    pub model_version: u32,
    pub artifact_path: PathBuf,
}

/// Whether a training run is due under the policy.
///
/// True when log data exists but no readable artifact does, when enough
/// new rows accumulated, or when the artifact aged out.
pub fn should_retrain(policy: &RetrainPolicy, artifact_path: &Path, log_path: &Path) -> bool {
    let records = count_records(log_path).unwrap_or(0);
    if records == 0 {
        return false;
    }

    match ArtifactReader::read_from_file(artifact_path) {
        Err(_) => true,
        Ok(artifact) => {
            let new_records = records.saturating_sub(artifact.meta.log_records);
            if new_records >= policy.min_new_records {
                return true;
            }
            Utc::now() - artifact.meta.trained_at >= Duration::hours(policy.max_age_hours)
        }
    }
}

/// Run a training pass when the policy says one is due.
pub fn train_if_due(
    policy: &RetrainPolicy,
    log_path: &Path,
    artifact_path: &Path,
) -> EngineResult<Option<TrainReport>> {
    if !should_retrain(policy, artifact_path, log_path) {
        return Ok(None);
    }
    train_from_log(log_path, artifact_path).map(Some)
}

/// Fit a fresh classifier from the outcome log and write it atomically.
///
/// Only successful outcomes become training rows: the model learns "what
/// worked here", and rows from both policies count so learned-arm results
/// feed back in. The version counter continues from any readable previous
/// artifact.
pub fn train_from_log(log_path: &Path, artifact_path: &Path) -> EngineResult<TrainReport> {
    let (records, skipped) = read_log(log_path)?;
    let successes: Vec<&OutcomeRecord> = records.iter().filter(|r| r.success).collect();
    if successes.is_empty() {
        return Err(EngineError::Training(format!(
            "no successful outcomes among {} log rows",
            records.len()
        )));
    }

    let schema = derive_schema(&successes);
    let rows: Vec<(FeatureVector, String)> = successes
        .iter()
        .map(|r| {
            (
                FeatureBuilder::encode_with(&schema, &context_from_record(r)),
                r.strategy.name().to_string(),
            )
        })
        .collect();
    let classifier = CentroidClassifier::fit(&rows);

    let model_version = ArtifactReader::read_from_file(artifact_path)
        .map(|previous| previous.meta.model_version + 1)
        .unwrap_or(1);

    let artifact = ModelArtifact {
        meta: ArtifactMeta {
            model_version,
            trained_at: Utc::now(),
            training_samples: rows.len() as u64,
            // Malformed rows count too: should_retrain sizes the log with
            // count_records, which cannot tell wreckage from data.
            log_records: (records.len() + skipped) as u64,
        },
        schema,
        classifier: Classifier::Centroid(classifier),
    };
    ArtifactWriter::write_atomic(&artifact, artifact_path)?;

    let labels = artifact.classifier.labels().to_vec();
    info!(
        "trained model v{model_version}: {} samples, {} classes, {} rows skipped",
        rows.len(),
        labels.len(),
        skipped
    );

    Ok(TrainReport {
        samples: rows.len(),
        skipped,
        labels,
        model_version,
        artifact_path: artifact_path.to_path_buf(),
    })
}

/// Extend the built-in vocabulary with values observed in the log, so
/// categories seen in production get real codes on the next model.
fn derive_schema(records: &[&OutcomeRecord]) -> FeatureSchema {
    let mut schema = FeatureSchema::builtin();
    for record in records {
        schema.protection_types.insert(&record.protection_type);
        schema.user_agents.insert(&record.user_agent);
        schema.ip_regions.insert(&record.ip_region);
    }
    schema
}

/// Rebuild a decision context from a logged row. Page titles are not
/// persisted, so keyword slots stay unset for training rows.
fn context_from_record(record: &OutcomeRecord) -> ProtectionContext {
    ProtectionContext {
        protection_type: record.protection_type.clone(),
        user_agent: record.user_agent.clone(),
        has_captcha: record.has_captcha,
        title_keywords: Vec::new(),
        ip_region: record.ip_region.clone(),
        url_depth: url_depth(&record.url),
        time_of_day: TimeOfDay::from_timestamp(&record.timestamp),
    }
}

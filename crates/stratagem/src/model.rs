//! .sgem model artifact format and the classifier it carries.
//!
//! An artifact bundles everything inference needs: the fitted classifier,
//! the feature schema it was fitted against, and training metadata. The
//! trainer writes artifacts, the predictor loads them; the two sides never
//! share memory.

use std::io::{Read, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::features::{FeatureBuilder, FeatureSchema, FeatureVector};
use crate::types::{EngineError, EngineResult, ProtectionContext};

/// Magic bytes: "SGEM"
const SGEM_MAGIC: u32 = 0x5347454D;

/// Current format version.
const FORMAT_VERSION: u16 = 1;

/// Header size in bytes.
const HEADER_SIZE: usize = 32;

/// Upper bound on the serialized payload; anything larger is a corrupt
/// header, not a real model.
const MAX_PAYLOAD: u64 = 64 * 1024 * 1024;

/// Training metadata carried by an artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMeta {
    /// Monotonic counter, bumped on every retrain.
    pub model_version: u32,
    pub trained_at: DateTime<Utc>,
    /// Rows the classifier was actually fitted on.
    pub training_samples: u64,
    /// Data rows in the outcome log when training ran, malformed included.
    pub log_records: u64,
}

/// A fitted classifier. Variants share the predict contract so the
/// predictor stays agnostic to the model family behind an artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Classifier {
    Centroid(CentroidClassifier),
}

impl Classifier {
    /// Map a feature vector to a strategy name; `None` with no classes.
    pub fn predict(&self, features: &FeatureVector) -> Option<&str> {
        match self {
            Self::Centroid(c) => c.predict(features),
        }
    }

    /// Strategy names the classifier can emit.
    pub fn labels(&self) -> &[String] {
        match self {
            Self::Centroid(c) => c.labels(),
        }
    }
}

/// Nearest-centroid classifier over the feature space.
///
/// Each class is the mean vector of its training rows; prediction is
/// cosine argmax over the centroids. Small, deterministic, and cheap to
/// refit from scratch on every training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CentroidClassifier {
    labels: Vec<String>,
    centroids: Vec<Vec<f32>>,
    /// Training rows per label. Similarity ties resolve toward the
    /// better-supported class.
    counts: Vec<u64>,
}

impl CentroidClassifier {
    /// Fit centroids from labeled feature rows. Labels are ordered
    /// lexicographically so refits over the same data are identical.
    pub fn fit(rows: &[(FeatureVector, String)]) -> Self {
        let mut groups: std::collections::BTreeMap<String, (Vec<f64>, u64)> =
            std::collections::BTreeMap::new();

        for (features, label) in rows {
            let entry = groups
                .entry(label.clone())
                .or_insert_with(|| (vec![0.0; features.len()], 0));
            for (sum, value) in entry.0.iter_mut().zip(features.iter()) {
                *sum += f64::from(*value);
            }
            entry.1 += 1;
        }

        let mut labels = Vec::with_capacity(groups.len());
        let mut centroids = Vec::with_capacity(groups.len());
        let mut counts = Vec::with_capacity(groups.len());
        for (label, (sums, count)) in groups {
            labels.push(label);
            centroids.push(sums.iter().map(|s| (*s / count as f64) as f32).collect());
            counts.push(count);
        }

        Self {
            labels,
            centroids,
            counts,
        }
    }

    /// Nearest centroid by cosine similarity.
    ///
    /// A zero query vector has no direction; it resolves to the
    /// best-supported class, as do exact similarity ties.
    pub fn predict(&self, features: &FeatureVector) -> Option<&str> {
        let mut best: Option<(f32, u64, usize)> = None;

        for (index, centroid) in self.centroids.iter().enumerate() {
            let score = cosine_similarity(features, centroid);
            let count = self.counts[index];
            let replaces = match best {
                None => true,
                Some((best_score, best_count, _)) => {
                    score > best_score || (score == best_score && count > best_count)
                }
            };
            if replaces {
                best = Some((score, count, index));
            }
        }

        best.map(|(_, _, index)| self.labels[index].as_str())
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Cosine similarity with f64 accumulation. Zero-norm inputs score 0.0.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())) as f32
}

/// A fully loaded model artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub meta: ArtifactMeta,
    pub schema: FeatureSchema,
    pub classifier: Classifier,
}

impl ModelArtifact {
    /// Run inference: encode through the embedded schema, then classify.
    pub fn predict(&self, context: &ProtectionContext) -> Option<&str> {
        let features = FeatureBuilder::encode_with(&self.schema, context);
        self.classifier.predict(&features)
    }
}

/// Writer for .sgem files.
pub struct ArtifactWriter;

/// Reader for .sgem files.
pub struct ArtifactReader;

impl ArtifactWriter {
    /// Write an artifact to a file.
    pub fn write_to_file(artifact: &ModelArtifact, path: &Path) -> EngineResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = std::fs::File::create(path)?;
        Self::write_to(artifact, &mut file)
    }

    /// Write an artifact through a temp file and rename, so a reader never
    /// sees a half-written artifact at the final path.
    pub fn write_atomic(artifact: &ModelArtifact, path: &Path) -> EngineResult<()> {
        let tmp = path.with_extension("sgem.tmp");
        Self::write_to_file(artifact, &tmp)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Write an artifact to any writer.
    pub fn write_to<W: Write>(artifact: &ModelArtifact, writer: &mut W) -> EngineResult<()> {
        let payload = serde_json::to_vec(artifact)
            .map_err(|e| EngineError::Artifact(format!("Serialization failed: {e}")))?;

        let mut header = [0u8; HEADER_SIZE];
        write_u32(&mut header[0..4], SGEM_MAGIC);
        write_u16(&mut header[4..6], FORMAT_VERSION);
        write_u16(&mut header[6..8], 0); // flags
        write_u32(&mut header[8..12], artifact.meta.model_version);
        write_u64(&mut header[12..20], artifact.meta.training_samples);
        write_u64(&mut header[20..28], payload.len() as u64);

        writer.write_all(&header)?;
        writer.write_all(&payload)?;

        Ok(())
    }
}

impl ArtifactReader {
    /// Read an artifact from a file.
    pub fn read_from_file(path: &Path) -> EngineResult<ModelArtifact> {
        let mut file = std::fs::File::open(path)?;
        Self::read_from(&mut file)
    }

    /// Read an artifact from any reader.
    pub fn read_from<R: Read>(reader: &mut R) -> EngineResult<ModelArtifact> {
        let mut header = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header)?;

        let magic = read_u32(&header[0..4]);
        if magic != SGEM_MAGIC {
            return Err(EngineError::Artifact(format!(
                "Invalid magic: expected 0x{SGEM_MAGIC:08X}, got 0x{magic:08X}"
            )));
        }

        let version = read_u16(&header[4..6]);
        if version != FORMAT_VERSION {
            return Err(EngineError::Artifact(format!(
                "Unsupported version: {version}"
            )));
        }

        let _model_version = read_u32(&header[8..12]);
        let _training_samples = read_u64(&header[12..20]);
        let payload_len = read_u64(&header[20..28]);
        if payload_len > MAX_PAYLOAD {
            return Err(EngineError::Artifact(format!(
                "Payload length {payload_len} exceeds limit"
            )));
        }

        let mut payload = vec![0u8; payload_len as usize];
        reader.read_exact(&mut payload)?;

        serde_json::from_slice(&payload)
            .map_err(|e| EngineError::Artifact(format!("Deserialization failed: {e}")))
    }
}

// Little-endian byte helpers
fn write_u16(buf: &mut [u8], val: u16) {
    buf[..2].copy_from_slice(&val.to_le_bytes());
}
fn write_u32(buf: &mut [u8], val: u32) {
    buf[..4].copy_from_slice(&val.to_le_bytes());
}
fn write_u64(buf: &mut [u8], val: u64) {
    buf[..8].copy_from_slice(&val.to_le_bytes());
}
fn read_u16(buf: &[u8]) -> u16 {
    u16::from_le_bytes([buf[0], buf[1]])
}
fn read_u32(buf: &[u8]) -> u32 {
    u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
}
fn read_u64(buf: &[u8]) -> u64 {
    u64::from_le_bytes([buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7]])
}

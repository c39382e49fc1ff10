//! Encode decision contexts into fixed-shape feature vectors.
//!
//! ## Encoding strategy
//!
//! - `0.0` means "absent/unknown" for all features.
//! - Categorical values go through stable [`EncodingTable`]s: code `0` is
//!   the reserved bucket for values outside the table, real entries get
//!   codes `1..=31` in insertion order, and codes are normalized by a fixed
//!   capacity so the feature space does not shift as vocabularies grow.
//! - Keyword slots are binary presence bits over a fixed vocabulary.
//! - The same schema must encode training rows and inference contexts, so
//!   the schema travels inside the model artifact.

use serde::{Deserialize, Serialize};

use crate::types::ProtectionContext;

/// Number of feature dimensions.
pub const FEATURE_DIM: usize = 16;

/// Protection-type category code.
pub const FEAT_PROTECTION_TYPE: usize = 0;
/// User-agent fingerprint category code.
pub const FEAT_USER_AGENT: usize = 1;
/// Captcha widget observed on the page.
pub const FEAT_HAS_CAPTCHA: usize = 2;
/// First of [`TITLE_KEYWORD_SLOTS`] keyword presence bits.
pub const FEAT_TITLE_KEYWORDS: usize = 3;
/// Number of keyword presence slots.
pub const TITLE_KEYWORD_SLOTS: usize = 8;
/// Egress IP region category code.
pub const FEAT_IP_REGION: usize = 11;
/// URL path depth, normalized.
pub const FEAT_URL_DEPTH: usize = 12;
/// Time-of-day bucket, normalized.
pub const FEAT_TIME_OF_DAY: usize = 13;
// Slots 14-15 are reserved for future context fields.

/// Categorical codes normalize as `code / CATEGORY_CAP`.
const CATEGORY_CAP: f32 = 31.0;
/// Largest assignable category code; everything past it encodes as unseen.
const MAX_CODE: usize = 31;

/// A context encoded for the classifier.
pub type FeatureVector = [f32; FEATURE_DIM];

/// Stable string-to-code table for one categorical feature.
///
/// Codes are positions in insertion order, starting at 1. Code 0 is the
/// reserved unseen bucket and is what lookups of unknown values return, so
/// growing the table never renumbers existing entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncodingTable {
    values: Vec<String>,
}

impl EncodingTable {
    /// Table over the given values, in order. Entries past the code
    /// capacity are dropped.
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut table = Self::default();
        for value in values {
            table.insert(&value.into());
        }
        table
    }

    /// Code for a value; 0 when the value is not in the table.
    pub fn code(&self, value: &str) -> u32 {
        self.values
            .iter()
            .position(|v| v == value)
            .map(|pos| pos as u32 + 1)
            .unwrap_or(0)
    }

    /// Add a value if there is room, returning its code. Existing values
    /// keep their code; a full table returns the unseen code.
    pub fn insert(&mut self, value: &str) -> u32 {
        if value.is_empty() {
            return 0;
        }
        let existing = self.code(value);
        if existing != 0 {
            return existing;
        }
        if self.values.len() >= MAX_CODE {
            return 0;
        }
        self.values.push(value.to_string());
        self.values.len() as u32
    }

    /// Normalized encoding of a value.
    pub fn encoded(&self, value: &str) -> f32 {
        self.code(value) as f32 / CATEGORY_CAP
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// The categorical vocabulary shared between training and inference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub protection_types: EncodingTable,
    pub user_agents: EncodingTable,
    pub ip_regions: EncodingTable,
    /// Keyword vocabulary, one word per presence slot.
    pub title_keywords: Vec<String>,
}

impl FeatureSchema {
    /// The built-in vocabulary used before any training has run.
    pub fn builtin() -> Self {
        Self {
            protection_types: EncodingTable::new([
                "cloudflare",
                "ddos_guard",
                "recaptcha",
                "captcha",
                "ip_block",
                "js_challenge",
                "403",
            ]),
            user_agents: EncodingTable::new([
                "chrome_91",
                "safari_14",
                "firefox_89",
                "mobile_chrome_91",
            ]),
            ip_regions: EncodingTable::new(["US", "EU", "RU", "DE", "CN"]),
            title_keywords: [
                "verification",
                "captcha",
                "blocked",
                "denied",
                "security",
                "checking",
                "robot",
                "attention",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
        }
    }
}

impl Default for FeatureSchema {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Deterministic context encoder over a fixed schema.
#[derive(Debug, Clone, Default)]
pub struct FeatureBuilder {
    schema: FeatureSchema,
}

impl FeatureBuilder {
    pub fn new(schema: FeatureSchema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Encode a context into a feature vector.
    pub fn encode(&self, context: &ProtectionContext) -> FeatureVector {
        Self::encode_with(&self.schema, context)
    }

    /// Encode through a borrowed schema.
    pub fn encode_with(schema: &FeatureSchema, context: &ProtectionContext) -> FeatureVector {
        let mut feats = [0.0f32; FEATURE_DIM];

        // ── Categorical codes ──
        feats[FEAT_PROTECTION_TYPE] = schema.protection_types.encoded(&context.protection_type);
        feats[FEAT_USER_AGENT] = schema.user_agents.encoded(&context.user_agent);
        feats[FEAT_IP_REGION] = schema.ip_regions.encoded(&context.ip_region);

        // ── Page signals ──
        feats[FEAT_HAS_CAPTCHA] = if context.has_captcha { 1.0 } else { 0.0 };
        for (slot, keyword) in schema
            .title_keywords
            .iter()
            .take(TITLE_KEYWORD_SLOTS)
            .enumerate()
        {
            let present = context
                .title_keywords
                .iter()
                .any(|k| k.eq_ignore_ascii_case(keyword));
            if present {
                feats[FEAT_TITLE_KEYWORDS + slot] = 1.0;
            }
        }

        // ── Request shape ──
        feats[FEAT_URL_DEPTH] = (context.url_depth as f32 / 10.0).clamp(0.0, 1.0);
        feats[FEAT_TIME_OF_DAY] = context.time_of_day.index() as f32 / 3.0;

        feats
    }
}

/// Path depth of a URL: segments after the host, query and fragment
/// stripped.
pub fn url_depth(url: &str) -> u32 {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    let path = rest.split('?').next().unwrap_or(rest);
    let path = path.split('#').next().unwrap_or(path);

    if let Some(slash_pos) = path.find('/') {
        path[slash_pos..].split('/').filter(|s| !s.is_empty()).count() as u32
    } else {
        0
    }
}

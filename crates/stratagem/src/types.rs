//! Core data types for strategy decisions and their outcomes.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A named bypass strategy from the catalog.
///
/// The engine treats strategy names as opaque identifiers; executing a
/// strategy is the caller's business.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Strategy(String);

impl Strategy {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Strategy {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl AsRef<str> for Strategy {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Coarse time-of-day bucket, used as a model feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeOfDay {
    Night,
    Morning,
    Afternoon,
    Evening,
}

impl TimeOfDay {
    /// Bucket for an hour of day. Hours past 23 wrap.
    pub fn from_hour(hour: u32) -> Self {
        match hour % 24 {
            0..=5 => Self::Night,
            6..=11 => Self::Morning,
            12..=17 => Self::Afternoon,
            _ => Self::Evening,
        }
    }

    /// Bucket for a UTC timestamp.
    pub fn from_timestamp(ts: &DateTime<Utc>) -> Self {
        Self::from_hour(ts.hour())
    }

    /// Bucket for the current wall clock.
    pub fn now() -> Self {
        Self::from_timestamp(&Utc::now())
    }

    /// Ordinal position, stable across releases.
    pub fn index(self) -> usize {
        match self {
            Self::Night => 0,
            Self::Morning => 1,
            Self::Afternoon => 2,
            Self::Evening => 3,
        }
    }
}

/// Everything known about a request at decision time.
///
/// Fields default to neutral values so callers only fill in what their
/// detection layer actually observed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectionContext {
    /// Detected protection mechanism, e.g. `"cloudflare"`.
    pub protection_type: String,
    /// Fingerprint tag of the user agent in play, not the raw header.
    pub user_agent: String,
    /// Whether a captcha widget was observed on the page.
    pub has_captcha: bool,
    /// Lowercased keywords extracted from the blocking page title.
    pub title_keywords: Vec<String>,
    /// Region of the egress IP, e.g. `"US"`.
    pub ip_region: String,
    /// Path depth of the target URL.
    pub url_depth: u32,
    pub time_of_day: TimeOfDay,
}

impl ProtectionContext {
    /// A context with neutral values for everything but the protection type.
    pub fn new(protection_type: impl Into<String>) -> Self {
        Self {
            protection_type: protection_type.into(),
            user_agent: String::new(),
            has_captcha: false,
            title_keywords: Vec::new(),
            ip_region: String::new(),
            url_depth: 0,
            time_of_day: TimeOfDay::now(),
        }
    }
}

/// Which policy produced a strategy choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SelectionMethod {
    /// The learned classifier.
    #[serde(rename = "ML")]
    Ml,
    /// The statistics-driven selector.
    #[serde(rename = "RuleBased")]
    RuleBased,
}

impl SelectionMethod {
    /// Tag as written to the outcome log.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ml => "ML",
            Self::RuleBased => "RuleBased",
        }
    }
}

impl fmt::Display for SelectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SelectionMethod {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ML" => Ok(Self::Ml),
            "RuleBased" => Ok(Self::RuleBased),
            other => Err(EngineError::MalformedRow(format!(
                "unknown selection method `{other}`"
            ))),
        }
    }
}

/// Opaque token correlating a decision with its later outcome report.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DecisionToken(String);

impl DecisionToken {
    /// Mint a fresh unique token.
    pub fn mint() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DecisionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for DecisionToken {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl From<&str> for DecisionToken {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

/// The result of one strategy selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub protection_type: String,
    pub strategy: Strategy,
    /// Policy that actually chose the strategy, after any fallback.
    pub method: SelectionMethod,
    pub decided_at: DateTime<Utc>,
    /// Hand this back with the outcome report to close the loop.
    pub token: DecisionToken,
}

/// Errors surfaced by the decision engine.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("Unknown protection type: {0}")]
    UnknownProtectionType(String),

    #[error("Model not available: {0}")]
    ModelUnavailable(String),

    #[error("Outcome log write failed: {0}")]
    LogWrite(String),

    #[error("Malformed log row: {0}")]
    MalformedRow(String),

    #[error("Invalid outcome report: {0}")]
    InvalidOutcome(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Model artifact error: {0}")]
    Artifact(String),

    #[error("Training failed: {0}")]
    Training(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type EngineResult<T> = Result<T, EngineError>;

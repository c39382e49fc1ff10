//! Append-only CSV outcome log — system of record for the feedback loop.
//!
//! ## Row format
//!
//! Ten canonical columns, then a trailing correlation-token column:
//!
//! ```text
//! timestamp,strategy_name,method,success,duration,protection_type,url,ip_region,user_agent,has_captcha,decision_token
//! ```
//!
//! Fields containing commas, quotes, or line breaks are quoted with
//! doubled inner quotes. Readers ignore extra trailing columns and skip
//! malformed rows instead of aborting, so one bad row never costs the
//! history around it.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::{DecisionToken, EngineError, EngineResult, SelectionMethod, Strategy};

/// Column header written when a log file is created.
pub const LOG_HEADER: &str = "timestamp,strategy_name,method,success,duration,protection_type,url,ip_region,user_agent,has_captcha,decision_token";

/// Number of canonical columns a row must carry.
const MIN_COLUMNS: usize = 10;
/// Zero-based position of the optional token column.
const TOKEN_COLUMN: usize = 10;

/// One realized outcome, as persisted in the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub timestamp: DateTime<Utc>,
    pub strategy: Strategy,
    pub method: SelectionMethod,
    pub success: bool,
    pub duration_secs: f64,
    pub protection_type: String,
    pub url: String,
    pub ip_region: String,
    pub user_agent: String,
    pub has_captcha: bool,
    pub token: Option<DecisionToken>,
}

impl OutcomeRecord {
    /// Serialize as one CSV row, without the trailing newline.
    pub fn to_row(&self) -> String {
        let fields = [
            self.timestamp.to_rfc3339(),
            self.strategy.name().to_string(),
            self.method.as_str().to_string(),
            self.success.to_string(),
            format!("{}", self.duration_secs),
            self.protection_type.clone(),
            self.url.clone(),
            self.ip_region.clone(),
            self.user_agent.clone(),
            self.has_captcha.to_string(),
            self.token.as_ref().map(|t| t.to_string()).unwrap_or_default(),
        ];
        fields
            .iter()
            .map(|f| escape_field(f))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Parse one CSV row. Columns past the token are ignored.
    pub fn parse_row(line: &str) -> EngineResult<Self> {
        let fields = split_row(line)?;
        if fields.len() < MIN_COLUMNS {
            return Err(EngineError::MalformedRow(format!(
                "expected at least {MIN_COLUMNS} columns, got {}",
                fields.len()
            )));
        }

        let timestamp = DateTime::parse_from_rfc3339(&fields[0])
            .map_err(|e| EngineError::MalformedRow(format!("bad timestamp `{}`: {e}", fields[0])))?
            .with_timezone(&Utc);

        if fields[1].is_empty() {
            return Err(EngineError::MalformedRow("empty strategy name".to_string()));
        }

        let duration_secs: f64 = fields[4]
            .parse()
            .map_err(|_| EngineError::MalformedRow(format!("bad duration `{}`", fields[4])))?;
        if !duration_secs.is_finite() || duration_secs < 0.0 {
            return Err(EngineError::MalformedRow(format!(
                "duration out of range: {duration_secs}"
            )));
        }

        let token = fields
            .get(TOKEN_COLUMN)
            .filter(|t| !t.is_empty())
            .map(|t| DecisionToken::from(t.as_str()));

        Ok(Self {
            timestamp,
            strategy: Strategy::from(fields[1].as_str()),
            method: fields[2].parse()?,
            success: parse_bool(&fields[3])?,
            duration_secs,
            protection_type: fields[5].clone(),
            url: fields[6].clone(),
            ip_region: fields[7].clone(),
            user_agent: fields[8].clone(),
            has_captcha: parse_bool(&fields[9])?,
            token,
        })
    }
}

fn parse_bool(raw: &str) -> EngineResult<bool> {
    match raw {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(EngineError::MalformedRow(format!("bad boolean `{other}`"))),
    }
}

fn escape_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn split_row(line: &str) -> EngineResult<Vec<String>> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
        } else {
            match c {
                '"' => in_quotes = true,
                ',' => fields.push(std::mem::take(&mut field)),
                _ => field.push(c),
            }
        }
    }
    if in_quotes {
        return Err(EngineError::MalformedRow(
            "unterminated quoted field".to_string(),
        ));
    }

    fields.push(field);
    Ok(fields)
}

/// Append-only writer over the outcome log file.
pub struct OutcomeLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl OutcomeLog {
    /// Open the log for appending, creating it (and the header row) when
    /// absent or empty.
    pub fn open(path: impl Into<PathBuf>) -> EngineResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new().append(true).create(true).open(&path)?;
        if file.metadata()?.len() == 0 {
            writeln!(file, "{LOG_HEADER}")?;
            file.flush()?;
        }

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record.
    ///
    /// The whole row goes out in a single write under the lock, so rows
    /// from concurrent reporters never interleave.
    pub fn append(&self, record: &OutcomeRecord) -> EngineResult<()> {
        let mut line = record.to_row();
        line.push('\n');

        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        file.write_all(line.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| EngineError::LogWrite(e.to_string()))
    }
}

/// Read every well-formed record from a log file.
///
/// Returns the records plus the number of rows skipped as malformed.
pub fn read_log(path: &Path) -> EngineResult<(Vec<OutcomeRecord>, usize)> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let mut records = Vec::new();
    let mut skipped = 0usize;
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if line_no == 0 && line.starts_with("timestamp,") {
            continue;
        }
        match OutcomeRecord::parse_row(&line) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!("skipping malformed outcome row {}: {e}", line_no + 1);
                skipped += 1;
            }
        }
    }

    Ok((records, skipped))
}

/// Count data rows without parsing them. A missing file counts as zero.
pub fn count_records(path: &Path) -> EngineResult<u64> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    let reader = BufReader::new(file);

    let mut count = 0u64;
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if line_no == 0 && line.starts_with("timestamp,") {
            continue;
        }
        count += 1;
    }
    Ok(count)
}

/// Aggregate performance of one selection method.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MethodSummary {
    pub total: u64,
    pub successes: u64,
    pub mean_duration_secs: f64,
}

impl MethodSummary {
    /// Success rate, `None` with no outcomes.
    pub fn success_rate(&self) -> Option<f64> {
        (self.total > 0).then(|| self.successes as f64 / self.total as f64)
    }
}

/// Per-method aggregates over a set of records. This is the readout the
/// A/B split exists to produce.
pub fn summarize_by_method(records: &[OutcomeRecord]) -> HashMap<SelectionMethod, MethodSummary> {
    let mut sums: HashMap<SelectionMethod, (u64, u64, f64)> = HashMap::new();
    for record in records {
        let entry = sums.entry(record.method).or_default();
        entry.0 += 1;
        if record.success {
            entry.1 += 1;
        }
        entry.2 += record.duration_secs;
    }

    sums.into_iter()
        .map(|(method, (total, successes, duration_sum))| {
            (
                method,
                MethodSummary {
                    total,
                    successes,
                    mean_duration_secs: duration_sum / total as f64,
                },
            )
        })
        .collect()
}

//! Outcome intake — decision correlation and the feedback transaction.
//!
//! Reports are matched back to their decision (by token, else by the
//! newest pending decision for the same strategy and protection type) so
//! the persisted method label is the one the arbiter actually emitted,
//! not whatever the caller remembered. The log write commits the outcome;
//! rule-based stats only move after the row is durable, keeping the log
//! and the counters from drifting apart under write failures.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use tracing::{debug, warn};

use crate::outcomes::{OutcomeLog, OutcomeRecord};
use crate::registry::StrategyRegistry;
use crate::stats::StatsStore;
use crate::types::{
    Decision, DecisionToken, EngineError, EngineResult, SelectionMethod, Strategy,
};

/// Caller-facing outcome report.
#[derive(Debug, Clone)]
pub struct OutcomeReport {
    pub strategy: Strategy,
    /// Method the caller believes chose the strategy. Overridden by the
    /// matched decision when the two disagree.
    pub method: SelectionMethod,
    pub success: bool,
    pub duration_secs: f64,
    pub metadata: OutcomeMetadata,
    pub token: Option<DecisionToken>,
}

impl OutcomeReport {
    /// Report closing the loop on a specific decision.
    pub fn for_decision(
        decision: &Decision,
        success: bool,
        duration_secs: f64,
        metadata: OutcomeMetadata,
    ) -> Self {
        Self {
            strategy: decision.strategy.clone(),
            method: decision.method,
            success,
            duration_secs,
            metadata,
            token: Some(decision.token.clone()),
        }
    }
}

/// Request metadata persisted alongside an outcome.
#[derive(Debug, Clone, Default)]
pub struct OutcomeMetadata {
    pub protection_type: String,
    pub url: String,
    pub ip_region: String,
    pub user_agent: String,
    pub has_captcha: bool,
}

/// Bounded table of decisions still waiting for their outcome report.
///
/// Attempts run for seconds, so the table stays small; the cap and the
/// age limit only matter when callers stop reporting.
pub struct PendingDecisions {
    inner: Mutex<VecDeque<Decision>>,
    cap: usize,
    max_age: Duration,
}

impl PendingDecisions {
    pub fn new(cap: usize, max_age_secs: u64) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            cap,
            max_age: Duration::seconds(max_age_secs as i64),
        }
    }

    /// Track a freshly issued decision, evicting expired and overflow
    /// entries from the old end.
    pub fn register(&self, decision: Decision) {
        let mut queue = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        let now = Utc::now();
        while let Some(front) = queue.front() {
            if now - front.decided_at > self.max_age {
                queue.pop_front();
            } else {
                break;
            }
        }
        while queue.len() >= self.cap {
            queue.pop_front();
        }

        queue.push_back(decision);
    }

    /// Remove and return the decision matching a report: exact token match
    /// when a token is given, else the newest entry for the pair.
    pub fn claim(
        &self,
        token: Option<&DecisionToken>,
        strategy_name: &str,
        protection_type: &str,
    ) -> Option<Decision> {
        let mut queue = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        let index = match token {
            Some(token) => queue.iter().position(|d| &d.token == token),
            None => queue.iter().rposition(|d| {
                d.strategy.name() == strategy_name && d.protection_type == protection_type
            }),
        };
        index.and_then(|i| queue.remove(i))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Applies outcome reports: correlate, persist, then update stats.
pub struct OutcomeRecorder {
    log: OutcomeLog,
    stats: Arc<StatsStore>,
    pending: Arc<PendingDecisions>,
    registry: Arc<StrategyRegistry>,
}

impl OutcomeRecorder {
    pub fn new(
        log: OutcomeLog,
        stats: Arc<StatsStore>,
        pending: Arc<PendingDecisions>,
        registry: Arc<StrategyRegistry>,
    ) -> Self {
        Self {
            log,
            stats,
            pending,
            registry,
        }
    }

    /// Record one realized outcome.
    ///
    /// The row append is the commit point: a failed write leaves the
    /// rule-based counters untouched and surfaces [`EngineError::LogWrite`].
    /// Learned-policy outcomes reach the selector only through retraining,
    /// never through the live counters.
    pub fn log_result(&self, report: OutcomeReport) -> EngineResult<()> {
        if !report.duration_secs.is_finite() || report.duration_secs < 0.0 {
            return Err(EngineError::InvalidOutcome(format!(
                "duration must be a non-negative number, got {}",
                report.duration_secs
            )));
        }

        let claimed = self.pending.claim(
            report.token.as_ref(),
            report.strategy.name(),
            &report.metadata.protection_type,
        );

        if let Some(decision) = &claimed {
            if decision.strategy.name() != report.strategy.name() {
                warn!(
                    "report names {} but decision {} chose {}, keeping the report's strategy",
                    report.strategy, decision.token, decision.strategy
                );
            }
        }

        let method = match &claimed {
            Some(decision) if decision.method != report.method => {
                warn!(
                    "report says {} but decision {} was {}, keeping the decision's label",
                    report.method, decision.token, decision.method
                );
                decision.method
            }
            Some(decision) => decision.method,
            None => report.method,
        };
        let token = claimed
            .as_ref()
            .map(|d| d.token.clone())
            .or_else(|| report.token.clone());
        // Token-only reports may omit the protection type; the matched
        // decision fills it so the counters land under the right key.
        let protection_type = if report.metadata.protection_type.is_empty() {
            claimed
                .as_ref()
                .map(|d| d.protection_type.clone())
                .unwrap_or_default()
        } else {
            report.metadata.protection_type.clone()
        };

        if !self.registry.is_registered(&protection_type, report.strategy.name()) {
            warn!(
                "outcome for unregistered pair ({protection_type}, {}), recording anyway",
                report.strategy
            );
        }

        let record = OutcomeRecord {
            timestamp: Utc::now(),
            strategy: report.strategy.clone(),
            method,
            success: report.success,
            duration_secs: report.duration_secs,
            protection_type,
            url: report.metadata.url.clone(),
            ip_region: report.metadata.ip_region.clone(),
            user_agent: report.metadata.user_agent.clone(),
            has_captcha: report.metadata.has_captcha,
            token,
        };

        self.log.append(&record)?;

        if method == SelectionMethod::RuleBased {
            self.stats
                .record(&record.protection_type, record.strategy.name(), record.success);
        }

        debug!(
            "outcome recorded: {} via {method} {} in {:.2}s",
            record.strategy,
            if record.success { "succeeded" } else { "failed" },
            record.duration_secs
        );
        Ok(())
    }
}

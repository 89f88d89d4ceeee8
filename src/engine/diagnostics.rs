//! Structured cycle diagnostics.
//!
//! Every rule evaluated in a cycle produces exactly one diagnostic entry so
//! a caller can see why each rule did or did not trade. Shapes are fixed
//! enums so tests assert on structure, not strings.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::evaluator::RejectReason;
use super::exits::ExitDecision;
use crate::market::MarketStatus;

/// What started a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleTrigger {
    /// Interval scheduler while the engine is running.
    Scheduled,
    /// Caller-invoked run-now.
    Manual,
}

/// Per-rule outcome of the entry pass.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RuleOutcome {
    Executed {
        trade_id: u64,
        position_id: u64,
        confidence: Decimal,
    },
    Rejected {
        #[serde(flatten)]
        reason: RejectReason,
        confidence: Option<Decimal>,
    },
    /// Collaborator failure or invariant violation; distinct from rejection.
    Errored { message: String },
    /// Entry scanning skipped because the market was closed on a scheduled
    /// cycle.
    SkippedMarketClosed,
}

impl RuleOutcome {
    pub fn is_executed(&self) -> bool {
        matches!(self, RuleOutcome::Executed { .. })
    }

    pub fn is_errored(&self) -> bool {
        matches!(self, RuleOutcome::Errored { .. })
    }
}

/// One entry-pass diagnostic.
#[derive(Debug, Clone, Serialize)]
pub struct RuleDiagnostic {
    pub automation_id: u64,
    pub rule_name: String,
    pub symbol: String,
    #[serde(flatten)]
    pub outcome: RuleOutcome,
}

/// One exit-pass diagnostic.
#[derive(Debug, Clone, Serialize)]
pub struct ExitOutcome {
    pub position_id: u64,
    pub symbol: String,
    pub decision: ExitDecision,
}

/// Aggregated result of one complete cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub trigger: CycleTrigger,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub market_status: MarketStatus,
    pub automations_scanned: usize,
    pub opportunities_found: usize,
    pub trades_executed: usize,
    pub positions_closed: usize,
    pub rule_outcomes: Vec<RuleDiagnostic>,
    pub exit_outcomes: Vec<ExitOutcome>,
}

impl CycleReport {
    pub fn errored_rules(&self) -> usize {
        self.rule_outcomes
            .iter()
            .filter(|d| d.outcome.is_errored())
            .count()
    }
}

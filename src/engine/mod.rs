//! The automated trading engine.
//!
//! - `evaluator`: pure entry decision logic
//! - `exits`: pure exit decision logic
//! - `diagnostics`: structured per-rule and per-cycle outcome types
//! - `coordinator`: the cycle state machine
//! - `controller`: public control surface (start/stop/run-now/test-trade)

pub mod controller;
pub mod coordinator;
pub mod diagnostics;
pub mod evaluator;
pub mod exits;

pub use controller::{ActivityReport, EngineController, EngineStatus, RuleActivity};
pub use coordinator::{CycleCoordinator, TestTradeOutcome, TestTradeReport};
pub use diagnostics::{CycleReport, CycleTrigger, ExitOutcome, RuleDiagnostic, RuleOutcome};
pub use evaluator::{evaluate, ConfidenceGate, Decision, RejectReason};
pub use exits::{check_exit, ExitDecision, ExitReason};

use thiserror::Error;

use crate::positions::PositionError;
use crate::rules::RuleError;

/// Engine-level failures. Rejections are not errors; they travel as
/// structured diagnostics.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A cycle is already running for this owner; overlap is rejected, not
    /// queued.
    #[error("a cycle is already in progress")]
    CycleInProgress,
    #[error(transparent)]
    Rule(#[from] RuleError),
    #[error(transparent)]
    Position(#[from] PositionError),
}

//! Exit evaluator: pure per-position exit decision.
//!
//! Checks run in a fixed order so a position past several thresholds at
//! once always closes for a single unambiguous reason: profit target,
//! then stop loss, then max holding period.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::positions::Position;
use crate::rules::ExitParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    ProfitTarget,
    StopLoss,
    MaxHoldTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ExitDecision {
    Hold,
    Close {
        reason: ExitReason,
        pnl_pct: Decimal,
    },
}

impl ExitDecision {
    pub fn is_close(&self) -> bool {
        matches!(self, ExitDecision::Close { .. })
    }
}

/// Decide whether a position should be closed.
///
/// P/L percent comes from the position's last refreshed price with the
/// short-side sign convention applied. Boundaries are inclusive: a position
/// exactly at the profit target closes.
pub fn check_exit(position: &Position, exit: &ExitParams, now: DateTime<Utc>) -> ExitDecision {
    if !position.is_open() {
        return ExitDecision::Hold;
    }

    let pnl_pct = position.unrealized_pnl_pct();

    if pnl_pct >= exit.profit_target_pct {
        return ExitDecision::Close {
            reason: ExitReason::ProfitTarget,
            pnl_pct,
        };
    }

    if let Some(stop) = exit.stop_loss_pct {
        if pnl_pct <= -stop {
            return ExitDecision::Close {
                reason: ExitReason::StopLoss,
                pnl_pct,
            };
        }
    }

    if let Some(max_days) = exit.max_days_to_hold {
        if position.days_held(now) >= max_days as i64 {
            return ExitDecision::Close {
                reason: ExitReason::MaxHoldTime,
                pnl_pct,
            };
        }
    }

    ExitDecision::Hold
}

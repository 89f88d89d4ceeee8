//! Rule evaluator: pure entry decision logic.
//!
//! Given a signal, a chain snapshot, and a rule's entry parameters, decides
//! accept/reject and picks the best matching contract. No side effects;
//! safe to call concurrently and repeatedly.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::trace;

use crate::market::{OptionCandidate, Signal};
use crate::positions::{Position, PositionSide};
use crate::rules::Automation;

/// Structured reasons an entry is rejected. These are expected outcomes,
/// reported as diagnostics rather than errors.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    /// Rule is inactive or paused.
    Dormant,
    LowConfidence {
        confidence: Decimal,
        required: Decimal,
    },
    /// No chain entries of the right kind inside the DTE window.
    NoContractsInWindow { min_dte: u32, max_dte: u32 },
    /// Delta bounds excluded every contract at the chosen expiration.
    NoDeltaMatch {
        min_delta: Option<Decimal>,
        max_delta: Option<Decimal>,
    },
    /// An equivalent open position already exists for this rule.
    DuplicatePosition { position_id: u64 },
    /// Ledger rejected the buy. Produced by the execution path, never by
    /// evaluation itself.
    InsufficientFunds {
        required: Decimal,
        available: Decimal,
    },
}

/// Whether the confidence threshold applies. Test trades bypass it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceGate {
    Enforce,
    Bypass,
}

/// Outcome of entry evaluation.
#[derive(Debug, Clone)]
pub enum Decision {
    Accept {
        candidate: OptionCandidate,
        quantity: u32,
        side: PositionSide,
    },
    Reject(RejectReason),
}

impl Decision {
    pub fn is_accept(&self) -> bool {
        matches!(self, Decision::Accept { .. })
    }
}

/// Evaluate one rule against fresh market data.
///
/// Ranking: among chain entries of the strategy's option kind within
/// `[min_dte, max_dte]`, prefer the expiration closest to `preferred_dte`
/// (ties to the nearer date); within that expiration, prefer the delta
/// closest to `target_delta` constrained to the delta bounds, or fall back
/// to the chain's quality score when no target is set.
pub fn evaluate(
    rule: &Automation,
    signal: &Signal,
    chain: &[OptionCandidate],
    open_for_rule: &[Position],
    as_of: NaiveDate,
    gate: ConfidenceGate,
) -> Decision {
    if rule.is_dormant() {
        return Decision::Reject(RejectReason::Dormant);
    }

    if gate == ConfidenceGate::Enforce && signal.confidence < rule.entry.min_confidence {
        return Decision::Reject(RejectReason::LowConfidence {
            confidence: signal.confidence,
            required: rule.entry.min_confidence,
        });
    }

    if let Some(existing) = open_for_rule.iter().find(|p| p.is_open()) {
        return Decision::Reject(RejectReason::DuplicatePosition {
            position_id: existing.id,
        });
    }

    let kind = rule.strategy.option_kind();
    let in_window: Vec<&OptionCandidate> = chain
        .iter()
        .filter(|c| {
            c.kind == kind
                && c.dte(as_of) >= rule.entry.min_dte as i64
                && c.dte(as_of) <= rule.entry.max_dte as i64
        })
        .collect();

    if in_window.is_empty() {
        return Decision::Reject(RejectReason::NoContractsInWindow {
            min_dte: rule.entry.min_dte,
            max_dte: rule.entry.max_dte,
        });
    }

    // Expiration closest to preferred DTE, ties broken toward the nearer date.
    let preferred = rule.entry.preferred_dte as i64;
    let best_expiration = in_window
        .iter()
        .map(|c| c.expiration)
        .min_by_key(|exp| {
            let dte = (*exp - as_of).num_days();
            ((dte - preferred).abs(), dte)
        })
        .expect("window is non-empty");

    let at_expiration: Vec<&OptionCandidate> = in_window
        .iter()
        .filter(|c| c.expiration == best_expiration)
        .copied()
        .collect();

    let chosen = match rule.entry.target_delta {
        Some(target) => {
            let within_bounds: Vec<&OptionCandidate> = at_expiration
                .iter()
                .filter(|c| {
                    let delta = c.greeks.delta.abs();
                    rule.entry.min_delta.map_or(true, |min| delta >= min)
                        && rule.entry.max_delta.map_or(true, |max| delta <= max)
                })
                .copied()
                .collect();

            if within_bounds.is_empty() {
                return Decision::Reject(RejectReason::NoDeltaMatch {
                    min_delta: rule.entry.min_delta,
                    max_delta: rule.entry.max_delta,
                });
            }

            within_bounds
                .into_iter()
                .min_by_key(|c| (c.greeks.delta.abs() - target).abs())
                .expect("bounded set is non-empty")
        }
        None => {
            // No delta target: defer to chain-provided ranking.
            at_expiration
                .into_iter()
                .max_by_key(|c| c.quality_score.unwrap_or(Decimal::ZERO))
                .expect("expiration set is non-empty")
        }
    };

    trace!(
        rule_id = rule.id,
        symbol = %rule.symbol,
        strike = %chosen.strike,
        expiration = %chosen.expiration,
        delta = %chosen.greeks.delta,
        "Selected entry candidate"
    );

    Decision::Accept {
        candidate: chosen.clone(),
        quantity: 1,
        side: rule.strategy.side(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{Direction, Greeks, OptionKind};
    use crate::positions::{OpenRequest, PositionStore};
    use crate::rules::{Automation, EntryParams, ExitParams, StrategyKind};
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 9, 1).unwrap()
    }

    fn rule() -> Automation {
        Automation {
            id: 1,
            owner: "advisor-1".to_string(),
            name: "SPY premium".to_string(),
            symbol: "SPY".to_string(),
            strategy: StrategyKind::LongCall,
            entry: EntryParams {
                min_confidence: dec!(0.3),
                preferred_dte: 30,
                min_dte: 21,
                max_dte: 60,
                target_delta: Some(dec!(0.3)),
                min_delta: Some(dec!(0.1)),
                max_delta: Some(dec!(0.5)),
            },
            exit: ExitParams {
                profit_target_pct: dec!(50),
                stop_loss_pct: None,
                max_days_to_hold: None,
            },
            active: true,
            paused: false,
            execution_count: 0,
            created_at: Utc::now(),
        }
    }

    fn signal(confidence: Decimal) -> Signal {
        Signal::new("SPY", confidence, Direction::Bullish)
    }

    fn candidate(dte: i64, delta: Decimal) -> OptionCandidate {
        OptionCandidate {
            symbol: "SPY".to_string(),
            kind: OptionKind::Call,
            strike: dec!(450),
            expiration: as_of() + Duration::days(dte),
            greeks: Greeks::with_delta(delta),
            implied_volatility: dec!(0.22),
            bid: dec!(1.90),
            ask: dec!(2.10),
            last: dec!(2.00),
            open_interest: 1000,
            quality_score: None,
        }
    }

    #[test]
    fn test_low_confidence_rejected() {
        let decision = evaluate(
            &rule(),
            &signal(dec!(0.2)),
            &[candidate(30, dec!(0.3))],
            &[],
            as_of(),
            ConfidenceGate::Enforce,
        );
        assert!(matches!(
            decision,
            Decision::Reject(RejectReason::LowConfidence { .. })
        ));
    }

    #[test]
    fn test_confidence_gate_bypass_for_test_trades() {
        let decision = evaluate(
            &rule(),
            &signal(dec!(0.0)),
            &[candidate(30, dec!(0.3))],
            &[],
            as_of(),
            ConfidenceGate::Bypass,
        );
        assert!(decision.is_accept());
    }

    #[test]
    fn test_dormant_rule_rejected() {
        let mut r = rule();
        r.paused = true;
        let decision = evaluate(
            &r,
            &signal(dec!(0.9)),
            &[candidate(30, dec!(0.3))],
            &[],
            as_of(),
            ConfidenceGate::Enforce,
        );
        assert!(matches!(decision, Decision::Reject(RejectReason::Dormant)));
    }

    #[test]
    fn test_empty_window_rejected() {
        // All contracts outside [21, 60]
        let chain = vec![candidate(10, dec!(0.3)), candidate(90, dec!(0.3))];
        let decision = evaluate(
            &rule(),
            &signal(dec!(0.5)),
            &chain,
            &[],
            as_of(),
            ConfidenceGate::Enforce,
        );
        assert!(matches!(
            decision,
            Decision::Reject(RejectReason::NoContractsInWindow { min_dte: 21, max_dte: 60 })
        ));
    }

    #[test]
    fn test_wrong_option_kind_excluded_from_window() {
        let mut put = candidate(30, dec!(0.3));
        put.kind = OptionKind::Put;
        let decision = evaluate(
            &rule(),
            &signal(dec!(0.5)),
            &[put],
            &[],
            as_of(),
            ConfidenceGate::Enforce,
        );
        assert!(matches!(
            decision,
            Decision::Reject(RejectReason::NoContractsInWindow { .. })
        ));
    }

    #[tokio::test]
    async fn test_duplicate_open_position_rejected() {
        let store = PositionStore::new();
        let pos = store
            .open(OpenRequest {
                automation_id: Some(1),
                symbol: "SPY".to_string(),
                contract: None,
                side: PositionSide::Long,
                quantity: 1,
                entry_price: dec!(2.00),
                entry_greeks: None,
            })
            .await;

        let decision = evaluate(
            &rule(),
            &signal(dec!(0.5)),
            &[candidate(30, dec!(0.3))],
            &[pos.clone()],
            as_of(),
            ConfidenceGate::Enforce,
        );
        assert_eq!(
            match decision {
                Decision::Reject(r) => r,
                _ => panic!("expected reject"),
            },
            RejectReason::DuplicatePosition {
                position_id: pos.id
            }
        );
    }

    #[test]
    fn test_ranking_selects_35dte_032_delta() {
        // Chain: 25/35/55 DTE with deltas 0.28/0.32/0.31; preferred DTE 30,
        // target delta 0.3 -> must select the 35-DTE, 0.32-delta contract.
        let chain = vec![
            candidate(25, dec!(0.28)),
            candidate(35, dec!(0.32)),
            candidate(55, dec!(0.31)),
        ];
        let decision = evaluate(
            &rule(),
            &signal(dec!(0.5)),
            &chain,
            &[],
            as_of(),
            ConfidenceGate::Enforce,
        );

        match decision {
            Decision::Accept {
                candidate,
                quantity,
                side,
            } => {
                assert_eq!(candidate.dte(as_of()), 35);
                assert_eq!(candidate.greeks.delta, dec!(0.32));
                assert_eq!(quantity, 1);
                assert_eq!(side, PositionSide::Long);
            }
            Decision::Reject(reason) => panic!("unexpected reject: {reason:?}"),
        }
    }

    #[test]
    fn test_expiration_tie_prefers_nearer_date() {
        // 25 and 35 DTE are both 5 days from preferred 30
        let chain = vec![candidate(25, dec!(0.30)), candidate(35, dec!(0.30))];
        let decision = evaluate(
            &rule(),
            &signal(dec!(0.5)),
            &chain,
            &[],
            as_of(),
            ConfidenceGate::Enforce,
        );

        match decision {
            Decision::Accept { candidate, .. } => assert_eq!(candidate.dte(as_of()), 25),
            _ => panic!("expected accept"),
        }
    }

    #[test]
    fn test_delta_bounds_constrain_selection() {
        let mut r = rule();
        r.entry.min_delta = Some(dec!(0.25));
        r.entry.max_delta = Some(dec!(0.35));

        // 0.40 is closest to nothing usable; only 0.26 is in bounds
        let mut far = candidate(30, dec!(0.40));
        far.strike = dec!(440);
        let chain = vec![far, candidate(30, dec!(0.26))];

        let decision = evaluate(
            &r,
            &signal(dec!(0.5)),
            &chain,
            &[],
            as_of(),
            ConfidenceGate::Enforce,
        );
        match decision {
            Decision::Accept { candidate, .. } => assert_eq!(candidate.greeks.delta, dec!(0.26)),
            _ => panic!("expected accept"),
        }
    }

    #[test]
    fn test_delta_bounds_exclude_everything() {
        let mut r = rule();
        r.entry.min_delta = Some(dec!(0.25));
        r.entry.max_delta = Some(dec!(0.28));

        let chain = vec![candidate(30, dec!(0.40))];
        let decision = evaluate(
            &r,
            &signal(dec!(0.5)),
            &chain,
            &[],
            as_of(),
            ConfidenceGate::Enforce,
        );
        assert!(matches!(
            decision,
            Decision::Reject(RejectReason::NoDeltaMatch { .. })
        ));
    }

    #[test]
    fn test_no_delta_target_uses_quality_score() {
        let mut r = rule();
        r.entry.target_delta = None;
        r.entry.min_delta = None;
        r.entry.max_delta = None;

        let mut low = candidate(30, dec!(0.20));
        low.quality_score = Some(dec!(0.4));
        let mut high = candidate(30, dec!(0.45));
        high.quality_score = Some(dec!(0.9));
        high.strike = dec!(445);

        let decision = evaluate(
            &r,
            &signal(dec!(0.5)),
            &[low, high],
            &[],
            as_of(),
            ConfidenceGate::Enforce,
        );
        match decision {
            Decision::Accept { candidate, .. } => assert_eq!(candidate.strike, dec!(445)),
            _ => panic!("expected accept"),
        }
    }

    #[test]
    fn test_evaluation_is_idempotent() {
        let chain = vec![candidate(35, dec!(0.32)), candidate(25, dec!(0.28))];
        let first = evaluate(
            &rule(),
            &signal(dec!(0.5)),
            &chain,
            &[],
            as_of(),
            ConfidenceGate::Enforce,
        );
        let second = evaluate(
            &rule(),
            &signal(dec!(0.5)),
            &chain,
            &[],
            as_of(),
            ConfidenceGate::Enforce,
        );

        match (first, second) {
            (Decision::Accept { candidate: a, .. }, Decision::Accept { candidate: b, .. }) => {
                assert_eq!(a.strike, b.strike);
                assert_eq!(a.expiration, b.expiration);
            }
            _ => panic!("expected two accepts"),
        }
    }
}

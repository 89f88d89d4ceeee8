//! Cycle coordinator: one complete pass of entry scanning and exit
//! monitoring across an owner's rules and positions.
//!
//! A cycle is `Idle -> Running -> Idle`; overlapping cycles for the same
//! owner are rejected rather than queued so `cycle_count` stays meaningful.
//! Rule evaluation fans out through a bounded worker set; the ledger is the
//! only serialization point for money movement.

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use rust_decimal::Decimal;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tracing::{debug, error, info, warn};

use super::diagnostics::{CycleReport, CycleTrigger, ExitOutcome, RuleDiagnostic, RuleOutcome};
use super::evaluator::{evaluate, ConfidenceGate, Decision, RejectReason};
use super::exits::{check_exit, ExitDecision};
use super::EngineError;
use crate::config::EngineConfig;
use crate::ledger::{Ledger, LedgerError};
use crate::market::{ContractSpec, MarketDataProvider, MarketStatus, OptionCandidate};
use crate::positions::{
    OpenRequest, Position, PositionError, PositionSide, PositionStore, Trade, TradeLog, TradeSide,
    TradeSource,
    OPTION_MULTIPLIER,
};
use crate::rules::{Automation, ExitParams, RuleStore};

/// Outcome of a forced single-rule test trade.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TestTradeOutcome {
    Executed { trade: Trade, position: Position },
    Rejected { reason: RejectReason },
    DataFetchError { message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct TestTradeReport {
    pub automation_id: u64,
    pub rule_name: String,
    pub symbol: String,
    pub confidence: Option<Decimal>,
    #[serde(flatten)]
    pub outcome: TestTradeOutcome,
}

fn fetch_error(e: anyhow::Error) -> TestTradeOutcome {
    TestTradeOutcome::DataFetchError {
        message: e.to_string(),
    }
}

#[derive(Default)]
struct CycleCounters {
    cycle_count: u64,
    last_cycle_time: Option<DateTime<Utc>>,
}

enum EntryFailure {
    Insufficient {
        required: Decimal,
        available: Decimal,
    },
    Invariant(String),
}

/// Cycle executor shared by the interval scheduler and the manual trigger
/// paths.
pub struct CycleCoordinator {
    market: Arc<dyn MarketDataProvider>,
    rules: Arc<RuleStore>,
    positions: Arc<PositionStore>,
    trades: Arc<TradeLog>,
    ledger: Arc<Ledger>,
    config: EngineConfig,
    /// Overlap guard: a second cycle (or test trade) gets rejected while
    /// this is held.
    cycle_guard: Mutex<()>,
    counters: RwLock<CycleCounters>,
}

impl CycleCoordinator {
    pub fn new(
        market: Arc<dyn MarketDataProvider>,
        rules: Arc<RuleStore>,
        positions: Arc<PositionStore>,
        trades: Arc<TradeLog>,
        ledger: Arc<Ledger>,
        config: EngineConfig,
    ) -> Self {
        Self {
            market,
            rules,
            positions,
            trades,
            ledger,
            config,
            cycle_guard: Mutex::new(()),
            counters: RwLock::new(CycleCounters::default()),
        }
    }

    pub async fn cycle_count(&self) -> u64 {
        self.counters.read().await.cycle_count
    }

    pub async fn last_cycle_time(&self) -> Option<DateTime<Utc>> {
        self.counters.read().await.last_cycle_time
    }

    /// Seed counters from a persisted snapshot.
    pub async fn restore_counters(&self, cycle_count: u64) {
        self.counters.write().await.cycle_count = cycle_count;
    }

    /// Run one complete cycle. Rejects with `CycleInProgress` when another
    /// cycle (or test trade) is already running for this owner.
    pub async fn run_cycle(&self, trigger: CycleTrigger) -> Result<CycleReport, EngineError> {
        let _guard = self
            .cycle_guard
            .try_lock()
            .map_err(|_| EngineError::CycleInProgress)?;

        let started_at = Utc::now();
        let market_status = self.market.market_status().await;
        let active_rules = self.rules.active_rules().await;

        // A closed market gates the automatic scheduler's entry scanning;
        // exits are still monitored (positions keep moving against their
        // stop-loss and holding limits).
        let scan_entries =
            !(market_status == MarketStatus::Closed && trigger == CycleTrigger::Scheduled);

        info!(
            ?trigger,
            %market_status,
            rules = active_rules.len(),
            scan_entries,
            "Cycle started"
        );

        let (rule_outcomes, exit_outcomes) = tokio::join!(
            self.entry_pass(&active_rules, scan_entries),
            self.exit_pass(),
        );

        let completed_at = Utc::now();
        {
            let mut counters = self.counters.write().await;
            counters.cycle_count += 1;
            counters.last_cycle_time = Some(completed_at);
        }

        let trades_executed = rule_outcomes
            .iter()
            .filter(|d| d.outcome.is_executed())
            .count();
        let opportunities_found = rule_outcomes
            .iter()
            .filter(|d| {
                matches!(
                    d.outcome,
                    RuleOutcome::Executed { .. }
                        | RuleOutcome::Rejected {
                            reason: RejectReason::InsufficientFunds { .. },
                            ..
                        }
                )
            })
            .count();
        let positions_closed = exit_outcomes
            .iter()
            .filter(|o| o.decision.is_close())
            .count();

        info!(
            scanned = rule_outcomes.len(),
            opportunities = opportunities_found,
            executed = trades_executed,
            closed = positions_closed,
            errored = rule_outcomes.iter().filter(|d| d.outcome.is_errored()).count(),
            "Cycle complete"
        );

        Ok(CycleReport {
            trigger,
            started_at,
            completed_at,
            market_status,
            automations_scanned: rule_outcomes.len(),
            opportunities_found,
            trades_executed,
            positions_closed,
            rule_outcomes,
            exit_outcomes,
        })
    }

    /// Force one rule through entry evaluation, bypassing the confidence
    /// threshold and the market-hours gate but never the ledger. Shares the
    /// overlap guard with full cycles.
    pub async fn test_trade(&self, rule_id: u64) -> Result<TestTradeReport, EngineError> {
        let _guard = self
            .cycle_guard
            .try_lock()
            .map_err(|_| EngineError::CycleInProgress)?;

        let rule = self.rules.get(rule_id).await?;

        let signal = match self
            .fetch_with_retry("signal", &rule.symbol, || self.market.signal(&rule.symbol))
            .await
        {
            Ok(signal) => signal,
            Err(e) => return Ok(self.test_report(&rule, None, fetch_error(e))),
        };

        let chain = match self
            .fetch_with_retry("chain", &rule.symbol, || {
                self.market.option_chain(&rule.symbol)
            })
            .await
        {
            Ok(chain) => chain,
            Err(e) => {
                return Ok(self.test_report(&rule, Some(signal.confidence), fetch_error(e)))
            }
        };

        let open_for_rule = self.positions.open_for_rule(rule.id).await;
        let decision = evaluate(
            &rule,
            &signal,
            &chain,
            &open_for_rule,
            Utc::now().date_naive(),
            ConfidenceGate::Bypass,
        );

        let outcome = match decision {
            Decision::Reject(reason) => TestTradeOutcome::Rejected { reason },
            Decision::Accept {
                candidate,
                quantity,
                side,
            } => {
                // Test trades do not count toward execution_count; the
                // source tag is authoritative for reporting.
                match self
                    .execute_entry(Some(rule.id), &candidate, quantity, side, TradeSource::Test)
                    .await
                {
                    Ok((trade, position)) => TestTradeOutcome::Executed { trade, position },
                    Err(EntryFailure::Insufficient {
                        required,
                        available,
                    }) => TestTradeOutcome::Rejected {
                        reason: RejectReason::InsufficientFunds {
                            required,
                            available,
                        },
                    },
                    Err(EntryFailure::Invariant(message)) => {
                        TestTradeOutcome::DataFetchError { message }
                    }
                }
            }
        };

        Ok(self.test_report(&rule, Some(signal.confidence), outcome))
    }

    fn test_report(
        &self,
        rule: &Automation,
        confidence: Option<Decimal>,
        outcome: TestTradeOutcome,
    ) -> TestTradeReport {
        TestTradeReport {
            automation_id: rule.id,
            rule_name: rule.name.clone(),
            symbol: rule.symbol.clone(),
            confidence,
            outcome,
        }
    }

    /// Close one open position at the refreshed market price, outside the
    /// scheduled exit checks. Settles the ledger exactly like an automated
    /// exit; the trade is tagged as manually sourced. Shares the overlap
    /// guard with full cycles.
    pub async fn close_position(&self, position_id: u64) -> Result<Trade, EngineError> {
        let _guard = self
            .cycle_guard
            .try_lock()
            .map_err(|_| EngineError::CycleInProgress)?;

        let position = self.positions.get(position_id).await?;
        if !position.is_open() {
            return Err(PositionError::AlreadyClosed(position_id).into());
        }

        // Refresh the mark; a fetch failure degrades to the last known price.
        match self
            .fetch_with_retry("quote", &position.symbol, || {
                self.market.quote(&position.symbol, position.contract.as_ref())
            })
            .await
        {
            Ok(quote) => {
                if let Err(e) = self
                    .positions
                    .refresh(position_id, quote.price, quote.greeks)
                    .await
                {
                    warn!(position_id, error = %e, "Refresh failed");
                }
            }
            Err(e) => {
                warn!(
                    position_id,
                    symbol = %position.symbol,
                    error = %e,
                    "Quote fetch failed, closing at last mark"
                );
            }
        }

        let position = self.positions.get(position_id).await?;
        let closed = self
            .positions
            .close(position_id, position.current_price)
            .await?;
        let proceeds = closed.entry_value() + closed.realized_pnl.unwrap_or(Decimal::ZERO);
        self.ledger.credit(proceeds).await;
        let trade = self
            .trades
            .record(
                &closed,
                TradeSide::Sell,
                closed.exit_price.unwrap_or(closed.current_price),
                proceeds,
                TradeSource::Manual,
            )
            .await;

        info!(
            position_id,
            symbol = %closed.symbol,
            exit_price = %closed.current_price,
            proceeds = %proceeds,
            "Manual close executed"
        );
        Ok(trade)
    }

    /// Evaluate every active rule, bounded by the configured concurrency.
    async fn entry_pass(&self, rules: &[Automation], scan: bool) -> Vec<RuleDiagnostic> {
        if !scan {
            return rules
                .iter()
                .map(|rule| RuleDiagnostic {
                    automation_id: rule.id,
                    rule_name: rule.name.clone(),
                    symbol: rule.symbol.clone(),
                    outcome: RuleOutcome::SkippedMarketClosed,
                })
                .collect();
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_evaluations));
        let workers = rules.iter().map(|rule| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore never closed");
                self.evaluate_rule(rule).await
            }
        });

        join_all(workers).await
    }

    /// One rule's evaluation. Failures are caught and reported as an
    /// Errored diagnostic so they never abort the rest of the cycle.
    async fn evaluate_rule(&self, rule: &Automation) -> RuleDiagnostic {
        let outcome = self.evaluate_rule_inner(rule).await;

        if let RuleOutcome::Errored { ref message } = outcome {
            warn!(
                rule_id = rule.id,
                symbol = %rule.symbol,
                error = %message,
                "Rule evaluation failed"
            );
        }

        RuleDiagnostic {
            automation_id: rule.id,
            rule_name: rule.name.clone(),
            symbol: rule.symbol.clone(),
            outcome,
        }
    }

    async fn evaluate_rule_inner(&self, rule: &Automation) -> RuleOutcome {
        let signal = match self
            .fetch_with_retry("signal", &rule.symbol, || self.market.signal(&rule.symbol))
            .await
        {
            Ok(signal) => signal,
            Err(e) => {
                return RuleOutcome::Errored {
                    message: format!("signal fetch: {e}"),
                }
            }
        };

        let chain = match self
            .fetch_with_retry("chain", &rule.symbol, || {
                self.market.option_chain(&rule.symbol)
            })
            .await
        {
            Ok(chain) => chain,
            Err(e) => {
                return RuleOutcome::Errored {
                    message: format!("chain fetch: {e}"),
                }
            }
        };

        let open_for_rule = self.positions.open_for_rule(rule.id).await;
        let decision = evaluate(
            rule,
            &signal,
            &chain,
            &open_for_rule,
            Utc::now().date_naive(),
            ConfidenceGate::Enforce,
        );

        match decision {
            Decision::Reject(reason) => {
                debug!(rule_id = rule.id, reason = ?reason, "Entry rejected");
                RuleOutcome::Rejected {
                    reason,
                    confidence: Some(signal.confidence),
                }
            }
            Decision::Accept {
                candidate,
                quantity,
                side,
            } => {
                match self
                    .execute_entry(
                        Some(rule.id),
                        &candidate,
                        quantity,
                        side,
                        TradeSource::Automation,
                    )
                    .await
                {
                    Ok((trade, position)) => {
                        // Rule may have been deleted between evaluation and
                        // execution; the trade stands either way.
                        if let Err(e) = self.rules.record_execution(rule.id).await {
                            warn!(rule_id = rule.id, error = %e, "execution_count not updated");
                        }
                        info!(
                            rule_id = rule.id,
                            trade_id = trade.id,
                            position_id = position.id,
                            symbol = %rule.symbol,
                            price = %trade.price,
                            "Automation executed"
                        );
                        RuleOutcome::Executed {
                            trade_id: trade.id,
                            position_id: position.id,
                            confidence: signal.confidence,
                        }
                    }
                    Err(EntryFailure::Insufficient {
                        required,
                        available,
                    }) => RuleOutcome::Rejected {
                        reason: RejectReason::InsufficientFunds {
                            required,
                            available,
                        },
                        confidence: Some(signal.confidence),
                    },
                    Err(EntryFailure::Invariant(message)) => RuleOutcome::Errored { message },
                }
            }
        }
    }

    /// Serial money-affecting section: reserve, open, record.
    async fn execute_entry(
        &self,
        automation_id: Option<u64>,
        candidate: &OptionCandidate,
        quantity: u32,
        side: PositionSide,
        source: TradeSource,
    ) -> Result<(Trade, Position), EntryFailure> {
        let price = candidate.mid_price();
        let cost = price * Decimal::from(quantity) * OPTION_MULTIPLIER;

        self.ledger.reserve(cost).await.map_err(|e| match e {
            LedgerError::InsufficientFunds {
                required,
                available,
            } => EntryFailure::Insufficient {
                required,
                available,
            },
        })?;

        let position = self
            .positions
            .open(OpenRequest {
                automation_id,
                symbol: candidate.symbol.clone(),
                contract: Some(ContractSpec::of(candidate)),
                side,
                quantity,
                entry_price: price,
                entry_greeks: Some(candidate.greeks),
            })
            .await;

        // The ledger must never stay debited without a matching position.
        if position.entry_value() != cost {
            self.ledger.release(cost).await;
            error!(
                position_id = position.id,
                reserved = %cost,
                opened = %position.entry_value(),
                "Reservation/position mismatch, rolled back"
            );
            return Err(EntryFailure::Invariant(format!(
                "position value {} does not match reserved {}",
                position.entry_value(),
                cost
            )));
        }

        let trade = self
            .trades
            .record(&position, TradeSide::Buy, price, cost, source)
            .await;

        Ok((trade, position))
    }

    /// Re-evaluate every open position for exit conditions. Runs even for
    /// positions whose rule was paused or deleted after entry.
    async fn exit_pass(&self) -> Vec<ExitOutcome> {
        let open = self.positions.open_positions().await;
        let mut outcomes = Vec::with_capacity(open.len());
        for position in open {
            outcomes.push(self.monitor_position(position).await);
        }
        outcomes
    }

    async fn monitor_position(&self, position: Position) -> ExitOutcome {
        // Refresh the mark; a fetch failure degrades to the last known price.
        match self
            .fetch_with_retry("quote", &position.symbol, || {
                self.market.quote(&position.symbol, position.contract.as_ref())
            })
            .await
        {
            Ok(quote) => {
                if let Err(e) = self
                    .positions
                    .refresh(position.id, quote.price, quote.greeks)
                    .await
                {
                    warn!(position_id = position.id, error = %e, "Refresh failed");
                }
            }
            Err(e) => {
                warn!(
                    position_id = position.id,
                    symbol = %position.symbol,
                    error = %e,
                    "Quote fetch failed, using last mark"
                );
            }
        }

        let position = self
            .positions
            .get(position.id)
            .await
            .unwrap_or(position);
        let exit_params = self.exit_params_for(&position).await;
        let decision = check_exit(&position, &exit_params, Utc::now());

        if let ExitDecision::Close { reason, pnl_pct } = &decision {
            match self.positions.close(position.id, position.current_price).await {
                Ok(closed) => {
                    // Sale proceeds: the original reserve plus realized P/L,
                    // so ledger deltas agree with position P/L on both sides.
                    let proceeds =
                        closed.entry_value() + closed.realized_pnl.unwrap_or(Decimal::ZERO);
                    self.ledger.credit(proceeds).await;
                    self.trades
                        .record(
                            &closed,
                            TradeSide::Sell,
                            closed.exit_price.unwrap_or(closed.current_price),
                            proceeds,
                            TradeSource::Automation,
                        )
                        .await;
                    info!(
                        position_id = closed.id,
                        symbol = %closed.symbol,
                        reason = ?reason,
                        pnl_pct = %pnl_pct,
                        proceeds = %proceeds,
                        "Exit executed"
                    );
                }
                Err(e) => {
                    warn!(position_id = position.id, error = %e, "Close failed");
                }
            }
        }

        ExitOutcome {
            position_id: position.id,
            symbol: position.symbol.clone(),
            decision,
        }
    }

    /// Exit parameters for a position: its rule's, or the configured
    /// defaults when the rule is gone (or the trade was manual).
    async fn exit_params_for(&self, position: &Position) -> ExitParams {
        if let Some(id) = position.automation_id {
            if let Ok(rule) = self.rules.get(id).await {
                return rule.exit;
            }
        }
        ExitParams {
            profit_target_pct: self.config.orphan_profit_target_pct,
            stop_loss_pct: Some(self.config.orphan_stop_loss_pct),
            max_days_to_hold: Some(self.config.orphan_max_days_to_hold),
        }
    }

    /// Bounded fetch with one configured retry. A failure here degrades to
    /// a per-rule skip, never a cycle-level error.
    async fn fetch_with_retry<T, F, Fut>(
        &self,
        what: &str,
        symbol: &str,
        mut op: F,
    ) -> anyhow::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let timeout = Duration::from_secs(self.config.fetch_timeout_secs);
        let attempts = self.config.fetch_retries + 1;
        let mut last_err = None;

        for attempt in 1..=attempts {
            match tokio::time::timeout(timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => {
                    debug!(what, symbol, attempt, error = %e, "Fetch failed");
                    last_err = Some(e);
                }
                Err(_) => {
                    debug!(what, symbol, attempt, "Fetch timed out");
                    last_err = Some(anyhow::anyhow!(
                        "{what} fetch for {symbol} timed out after {}s",
                        self.config.fetch_timeout_secs
                    ));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{what} fetch for {symbol} failed")))
    }
}

//! Engine controller: the public control surface.
//!
//! Owns the running/stopped state and the interval scheduler. Start and
//! stop are idempotent; stop lets any in-flight cycle finish rather than
//! interrupting mid-trade.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::coordinator::{CycleCoordinator, TestTradeReport};
use super::diagnostics::{CycleReport, CycleTrigger};
use super::EngineError;
use crate::config::EngineConfig;
use crate::market::{MarketDataProvider, MarketStatus};
use crate::positions::{Trade, TradeLog};
use crate::rules::RuleStore;

/// Read-only snapshot of engine state.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub is_running: bool,
    pub cycle_count: u64,
    pub last_cycle_time: Option<DateTime<Utc>>,
    pub market_status: MarketStatus,
}

/// Per-rule execution counts for display.
#[derive(Debug, Clone, Serialize)]
pub struct RuleActivity {
    pub automation_id: u64,
    pub name: String,
    pub symbol: String,
    pub execution_count: u64,
}

/// Recent trades plus per-rule execution counts.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityReport {
    pub since: DateTime<Utc>,
    pub trades: Vec<Trade>,
    pub rules: Vec<RuleActivity>,
}

/// One scheduler run and its stop signal. The signal lives and dies with
/// the task, so a stop racing an in-flight cycle cannot leave a stale
/// permit for the next start to consume.
struct SchedulerTask {
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

/// Control surface over the cycle coordinator.
pub struct EngineController {
    coordinator: Arc<CycleCoordinator>,
    market: Arc<dyn MarketDataProvider>,
    rules: Arc<RuleStore>,
    trades: Arc<TradeLog>,
    config: EngineConfig,
    running: Arc<AtomicBool>,
    scheduler: Mutex<Option<SchedulerTask>>,
}

impl EngineController {
    pub fn new(
        coordinator: Arc<CycleCoordinator>,
        market: Arc<dyn MarketDataProvider>,
        rules: Arc<RuleStore>,
        trades: Arc<TradeLog>,
        config: EngineConfig,
    ) -> Self {
        Self {
            coordinator,
            market,
            rules,
            trades,
            config,
            running: Arc::new(AtomicBool::new(false)),
            scheduler: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the interval scheduler. No-op when already running.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("Start ignored: engine already running");
            return;
        }

        let coordinator = self.coordinator.clone();
        let running = self.running.clone();
        let shutdown = Arc::new(Notify::new());
        let signal = shutdown.clone();
        let interval_secs = self.config.cycle_interval_secs;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = shutdown.notified() => break,
                }
                if !running.load(Ordering::SeqCst) {
                    break;
                }

                match coordinator.run_cycle(CycleTrigger::Scheduled).await {
                    Ok(report) => debug!(
                        cycle = report.automations_scanned,
                        executed = report.trades_executed,
                        "Scheduled cycle finished"
                    ),
                    Err(EngineError::CycleInProgress) => {
                        debug!("Scheduled cycle skipped: another cycle in progress")
                    }
                    Err(e) => warn!(error = %e, "Scheduled cycle failed"),
                }
            }
            debug!("Scheduler loop exited");
        });

        *self.scheduler.lock().await = Some(SchedulerTask {
            shutdown: signal,
            handle,
        });
        info!(interval_secs, "Engine started");
    }

    /// Stop scheduling new cycles. Any in-flight cycle finishes; no-op when
    /// already stopped.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            debug!("Stop ignored: engine already stopped");
            return;
        }

        if let Some(task) = self.scheduler.lock().await.take() {
            task.shutdown.notify_one();
            if let Err(e) = task.handle.await {
                warn!(error = %e, "Scheduler task ended abnormally");
            }
        }
        info!("Engine stopped");
    }

    /// Trigger one cycle immediately, bypassing the interval timer but not
    /// the overlap guard.
    pub async fn run_cycle_now(&self) -> Result<CycleReport, EngineError> {
        self.coordinator.run_cycle(CycleTrigger::Manual).await
    }

    /// Force one rule through entry evaluation in test mode.
    pub async fn test_trade(&self, rule_id: u64) -> Result<TestTradeReport, EngineError> {
        self.coordinator.test_trade(rule_id).await
    }

    /// Close one open position immediately at the latest market price,
    /// settling the ledger like an automated exit.
    pub async fn close_position(&self, position_id: u64) -> Result<Trade, EngineError> {
        self.coordinator.close_position(position_id).await
    }

    /// Read-only snapshot of the engine plus derived market status.
    pub async fn status(&self) -> EngineStatus {
        EngineStatus {
            is_running: self.is_running(),
            cycle_count: self.coordinator.cycle_count().await,
            last_cycle_time: self.coordinator.last_cycle_time().await,
            market_status: self.market.market_status().await,
        }
    }

    /// Recent trades within the configured trailing window plus per-rule
    /// execution counts. Test trades are listed (tagged by source) but do
    /// not contribute to execution counts.
    pub async fn activity(&self) -> ActivityReport {
        let since = Utc::now() - ChronoDuration::hours(self.config.activity_window_hours as i64);
        let trades = self.trades.recent(since).await;
        let rules = self
            .rules
            .list()
            .await
            .into_iter()
            .map(|r| RuleActivity {
                automation_id: r.id,
                name: r.name,
                symbol: r.symbol,
                execution_count: r.execution_count,
            })
            .collect();

        ActivityReport {
            since,
            trades,
            rules,
        }
    }
}

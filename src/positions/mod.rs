//! Position lifecycle and the immutable trade log.
//!
//! Positions are created exclusively by a successful buy execution, mutated
//! by price refreshes, and closed exactly once by a sell execution. Realized
//! P/L freezes at close; refreshes on a closed position are no-ops.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::market::{ContractSpec, Greeks};

/// Options carry the standard 100-share multiplier; bare equity does not.
pub const OPTION_MULTIPLIER: Decimal = dec!(100);

/// Long = premium buyer, Short = premium seller. Determines the P/L sign
/// convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closed,
}

/// Buy or sell leg of a trade record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

/// What initiated a trade. Test trades share the ledger and position store
/// with production trades; this tag is the only thing that disambiguates
/// them in reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSource {
    Manual,
    Automation,
    Test,
}

/// One executed (paper) trade, linking the position it created or closed to
/// the automation that caused it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: u64,
    pub position_id: u64,
    pub automation_id: Option<u64>,
    pub symbol: String,
    pub contract: Option<ContractSpec>,
    pub side: TradeSide,
    pub quantity: u32,
    pub price: Decimal,
    /// Cash moved through the ledger by this execution.
    pub amount: Decimal,
    pub source: TradeSource,
    pub executed_at: DateTime<Utc>,
}

/// State of one executed trade until closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: u64,
    pub automation_id: Option<u64>,
    pub symbol: String,
    pub contract: Option<ContractSpec>,
    pub side: PositionSide,
    pub quantity: u32,
    pub entry_price: Decimal,
    pub entry_greeks: Option<Greeks>,
    pub current_price: Decimal,
    pub current_greeks: Option<Greeks>,
    pub opened_at: DateTime<Utc>,
    pub status: PositionStatus,
    pub closed_at: Option<DateTime<Utc>>,
    pub exit_price: Option<Decimal>,
    pub realized_pnl: Option<Decimal>,
    pub realized_pnl_pct: Option<Decimal>,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Contract multiplier: 100 for options, 1 for equity.
    pub fn multiplier(&self) -> Decimal {
        if self.contract.is_some() {
            OPTION_MULTIPLIER
        } else {
            Decimal::ONE
        }
    }

    /// Cash debited at open: entry price x quantity x multiplier.
    pub fn entry_value(&self) -> Decimal {
        self.entry_price * Decimal::from(self.quantity) * self.multiplier()
    }

    fn pnl_at(&self, price: Decimal) -> Decimal {
        let per_unit = match self.side {
            PositionSide::Long => price - self.entry_price,
            PositionSide::Short => self.entry_price - price,
        };
        per_unit * Decimal::from(self.quantity) * self.multiplier()
    }

    fn pnl_pct_at(&self, price: Decimal) -> Decimal {
        if self.entry_price == Decimal::ZERO {
            return Decimal::ZERO;
        }
        let raw = (price - self.entry_price) / self.entry_price * dec!(100);
        match self.side {
            PositionSide::Long => raw,
            PositionSide::Short => -raw,
        }
    }

    /// Unrealized P/L at the last refreshed price. Zero once closed; the
    /// realized figures are authoritative from then on.
    pub fn unrealized_pnl(&self) -> Decimal {
        if !self.is_open() {
            return Decimal::ZERO;
        }
        self.pnl_at(self.current_price)
    }

    /// Unrealized P/L percent with the short-side sign flip applied.
    pub fn unrealized_pnl_pct(&self) -> Decimal {
        if !self.is_open() {
            return Decimal::ZERO;
        }
        self.pnl_pct_at(self.current_price)
    }

    pub fn days_held(&self, now: DateTime<Utc>) -> i64 {
        (now - self.opened_at).num_days()
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum PositionError {
    #[error("position {0} not found")]
    NotFound(u64),
    #[error("position {0} is already closed")]
    AlreadyClosed(u64),
}

/// Everything needed to open a position after the ledger reservation
/// succeeded.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub automation_id: Option<u64>,
    pub symbol: String,
    pub contract: Option<ContractSpec>,
    pub side: PositionSide,
    pub quantity: u32,
    pub entry_price: Decimal,
    pub entry_greeks: Option<Greeks>,
}

/// Owns the lifecycle of open and closed positions.
pub struct PositionStore {
    positions: RwLock<HashMap<u64, Position>>,
    next_id: AtomicU64,
}

impl Default for PositionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionStore {
    pub fn new() -> Self {
        Self {
            positions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Open a position. Only reachable after `Ledger::reserve` succeeded.
    pub async fn open(&self, request: OpenRequest) -> Position {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let position = Position {
            id,
            automation_id: request.automation_id,
            symbol: request.symbol,
            contract: request.contract,
            side: request.side,
            quantity: request.quantity,
            entry_price: request.entry_price,
            entry_greeks: request.entry_greeks,
            current_price: request.entry_price,
            current_greeks: request.entry_greeks,
            opened_at: Utc::now(),
            status: PositionStatus::Open,
            closed_at: None,
            exit_price: None,
            realized_pnl: None,
            realized_pnl_pct: None,
        };

        info!(
            position_id = id,
            symbol = %position.symbol,
            side = ?position.side,
            entry_price = %position.entry_price,
            quantity = position.quantity,
            "Opened position"
        );

        self.positions.write().await.insert(id, position.clone());
        position
    }

    /// Close a position, freezing realized P/L at `exit_price`. Closing an
    /// already-closed position returns the frozen record unchanged.
    pub async fn close(&self, id: u64, exit_price: Decimal) -> Result<Position, PositionError> {
        let mut positions = self.positions.write().await;
        let position = positions.get_mut(&id).ok_or(PositionError::NotFound(id))?;

        if !position.is_open() {
            return Ok(position.clone());
        }

        let realized = position.pnl_at(exit_price);
        let realized_pct = position.pnl_pct_at(exit_price);

        position.status = PositionStatus::Closed;
        position.closed_at = Some(Utc::now());
        position.exit_price = Some(exit_price);
        position.current_price = exit_price;
        position.realized_pnl = Some(realized);
        position.realized_pnl_pct = Some(realized_pct);

        info!(
            position_id = id,
            symbol = %position.symbol,
            exit_price = %exit_price,
            realized_pnl = %realized,
            realized_pnl_pct = %realized_pct,
            "Closed position"
        );

        Ok(position.clone())
    }

    /// Refresh the marked price and Greeks. No-op on closed positions.
    pub async fn refresh(
        &self,
        id: u64,
        price: Decimal,
        greeks: Option<Greeks>,
    ) -> Result<(), PositionError> {
        let mut positions = self.positions.write().await;
        let position = positions.get_mut(&id).ok_or(PositionError::NotFound(id))?;

        if !position.is_open() {
            debug!(position_id = id, "Refresh skipped: position closed");
            return Ok(());
        }

        position.current_price = price;
        if greeks.is_some() {
            position.current_greeks = greeks;
        }
        Ok(())
    }

    pub async fn get(&self, id: u64) -> Result<Position, PositionError> {
        self.positions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(PositionError::NotFound(id))
    }

    pub async fn open_positions(&self) -> Vec<Position> {
        let mut open: Vec<Position> = self
            .positions
            .read()
            .await
            .values()
            .filter(|p| p.is_open())
            .cloned()
            .collect();
        open.sort_by_key(|p| p.id);
        open
    }

    /// Open positions owned by one automation, for duplicate-entry checks.
    pub async fn open_for_rule(&self, automation_id: u64) -> Vec<Position> {
        self.positions
            .read()
            .await
            .values()
            .filter(|p| p.is_open() && p.automation_id == Some(automation_id))
            .cloned()
            .collect()
    }

    /// Replace store contents with a persisted snapshot, keeping id
    /// assignment ahead of the restored records.
    pub async fn restore(&self, restored: Vec<Position>) {
        let max_id = restored.iter().map(|p| p.id).max().unwrap_or(0);
        let mut positions = self.positions.write().await;
        positions.clear();
        for position in restored {
            positions.insert(position.id, position);
        }
        self.next_id.store(max_id + 1, Ordering::SeqCst);
    }

    pub async fn all_positions(&self) -> Vec<Position> {
        let mut all: Vec<Position> = self.positions.read().await.values().cloned().collect();
        all.sort_by_key(|p| p.id);
        all
    }
}

/// Append-only audit log of executions.
pub struct TradeLog {
    trades: RwLock<Vec<Trade>>,
    next_id: AtomicU64,
}

impl Default for TradeLog {
    fn default() -> Self {
        Self::new()
    }
}

impl TradeLog {
    pub fn new() -> Self {
        Self {
            trades: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Record an execution, assigning the trade id.
    pub async fn record(
        &self,
        position: &Position,
        side: TradeSide,
        price: Decimal,
        amount: Decimal,
        source: TradeSource,
    ) -> Trade {
        let trade = Trade {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            position_id: position.id,
            automation_id: position.automation_id,
            symbol: position.symbol.clone(),
            contract: position.contract.clone(),
            side,
            quantity: position.quantity,
            price,
            amount,
            source,
            executed_at: Utc::now(),
        };
        self.trades.write().await.push(trade.clone());
        trade
    }

    /// Trades executed at or after `since`, newest first.
    pub async fn recent(&self, since: DateTime<Utc>) -> Vec<Trade> {
        let mut recent: Vec<Trade> = self
            .trades
            .read()
            .await
            .iter()
            .filter(|t| t.executed_at >= since)
            .cloned()
            .collect();
        recent.sort_by(|a, b| b.executed_at.cmp(&a.executed_at));
        recent
    }

    pub async fn all(&self) -> Vec<Trade> {
        self.trades.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::OptionKind;
    use chrono::NaiveDate;

    fn sample_contract() -> ContractSpec {
        ContractSpec {
            kind: OptionKind::Call,
            strike: dec!(450),
            expiration: NaiveDate::from_ymd_opt(2026, 10, 16).unwrap(),
        }
    }

    fn open_request(side: PositionSide, entry_price: Decimal) -> OpenRequest {
        OpenRequest {
            automation_id: Some(7),
            symbol: "SPY".to_string(),
            contract: Some(sample_contract()),
            side,
            quantity: 1,
            entry_price,
            entry_greeks: Some(Greeks::with_delta(dec!(0.32))),
        }
    }

    #[tokio::test]
    async fn test_open_snapshots_entry_state() {
        let store = PositionStore::new();
        let pos = store.open(open_request(PositionSide::Long, dec!(2.00))).await;

        assert!(pos.is_open());
        assert_eq!(pos.current_price, dec!(2.00));
        assert_eq!(pos.entry_greeks.unwrap().delta, dec!(0.32));
        assert_eq!(pos.entry_value(), dec!(200));
    }

    #[tokio::test]
    async fn test_unrealized_pnl_long() {
        let store = PositionStore::new();
        let pos = store.open(open_request(PositionSide::Long, dec!(2.00))).await;
        store.refresh(pos.id, dec!(3.00), None).await.unwrap();

        let pos = store.get(pos.id).await.unwrap();
        assert_eq!(pos.unrealized_pnl(), dec!(100));
        assert_eq!(pos.unrealized_pnl_pct(), dec!(50));
    }

    #[tokio::test]
    async fn test_unrealized_pnl_sign_flips_for_short() {
        let store = PositionStore::new();
        let pos = store
            .open(open_request(PositionSide::Short, dec!(2.00)))
            .await;
        store.refresh(pos.id, dec!(1.00), None).await.unwrap();

        // Premium seller profits when the option cheapens
        let pos = store.get(pos.id).await.unwrap();
        assert_eq!(pos.unrealized_pnl(), dec!(100));
        assert_eq!(pos.unrealized_pnl_pct(), dec!(50));
    }

    #[tokio::test]
    async fn test_close_freezes_realized_pnl() {
        let store = PositionStore::new();
        let pos = store.open(open_request(PositionSide::Long, dec!(2.00))).await;

        let closed = store.close(pos.id, dec!(3.00)).await.unwrap();
        assert_eq!(closed.status, PositionStatus::Closed);
        assert_eq!(closed.realized_pnl, Some(dec!(100)));
        assert_eq!(closed.realized_pnl_pct, Some(dec!(50)));
    }

    #[tokio::test]
    async fn test_refresh_after_close_is_noop() {
        let store = PositionStore::new();
        let pos = store.open(open_request(PositionSide::Long, dec!(2.00))).await;
        store.close(pos.id, dec!(3.00)).await.unwrap();

        store.refresh(pos.id, dec!(9.99), None).await.unwrap();

        let pos = store.get(pos.id).await.unwrap();
        assert_eq!(pos.current_price, dec!(3.00));
        assert_eq!(pos.realized_pnl, Some(dec!(100)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let store = PositionStore::new();
        let pos = store.open(open_request(PositionSide::Long, dec!(2.00))).await;

        let first = store.close(pos.id, dec!(3.00)).await.unwrap();
        let second = store.close(pos.id, dec!(5.00)).await.unwrap();

        assert_eq!(second.realized_pnl, first.realized_pnl);
        assert_eq!(second.exit_price, Some(dec!(3.00)));
    }

    #[tokio::test]
    async fn test_open_for_rule_filters_ownership() {
        let store = PositionStore::new();
        store.open(open_request(PositionSide::Long, dec!(2.00))).await;

        let mut other = open_request(PositionSide::Long, dec!(2.00));
        other.automation_id = Some(8);
        store.open(other).await;

        let mut manual = open_request(PositionSide::Long, dec!(2.00));
        manual.automation_id = None;
        store.open(manual).await;

        assert_eq!(store.open_for_rule(7).await.len(), 1);
        assert_eq!(store.open_for_rule(8).await.len(), 1);
        assert_eq!(store.open_positions().await.len(), 3);
    }

    #[tokio::test]
    async fn test_trade_log_recent_window() {
        let log = TradeLog::new();
        let store = PositionStore::new();
        let pos = store.open(open_request(PositionSide::Long, dec!(2.00))).await;

        log.record(&pos, TradeSide::Buy, dec!(2.00), dec!(200), TradeSource::Automation)
            .await;

        let cutoff_future = Utc::now() + chrono::Duration::hours(1);
        assert!(log.recent(cutoff_future).await.is_empty());

        let cutoff_past = Utc::now() - chrono::Duration::hours(1);
        assert_eq!(log.recent(cutoff_past).await.len(), 1);
    }
}

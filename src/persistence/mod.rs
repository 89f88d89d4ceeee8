//! SQLite persistence for paper trading state.
//!
//! Persists engine state to survive restarts:
//! - Account balance and cycle counters
//! - Open and closed positions
//! - Trade execution history
//!
//! Decimals are stored as TEXT so no precision is lost through the
//! round-trip; contract identity and Greeks are stored as JSON.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::market::{ContractSpec, Greeks};
use crate::positions::{Position, PositionSide, PositionStatus, Trade, TradeSide, TradeSource};

/// Point-in-time engine state written by the snapshot loop.
#[derive(Debug, Clone)]
pub struct EngineSnapshot {
    pub balance: Decimal,
    pub cycle_count: u64,
    pub positions: Vec<Position>,
    pub last_saved: DateTime<Utc>,
}

/// SQLite-based persistence manager.
pub struct PersistenceManager {
    conn: Connection,
}

impl PersistenceManager {
    /// Create a new persistence manager, initializing the database if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        let manager = Self { conn };
        manager.init_schema()?;

        info!("Persistence manager initialized at {:?}", db_path.as_ref());
        Ok(manager)
    }

    /// Initialize database schema.
    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            -- Engine state (singleton row)
            CREATE TABLE IF NOT EXISTS engine_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                balance TEXT NOT NULL,
                cycle_count INTEGER NOT NULL,
                last_saved TEXT NOT NULL
            );

            -- Positions, open and closed
            CREATE TABLE IF NOT EXISTS positions (
                id INTEGER PRIMARY KEY,
                automation_id INTEGER,
                symbol TEXT NOT NULL,
                contract TEXT,
                side TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                entry_price TEXT NOT NULL,
                entry_greeks TEXT,
                current_price TEXT NOT NULL,
                current_greeks TEXT,
                opened_at TEXT NOT NULL,
                status TEXT NOT NULL,
                closed_at TEXT,
                exit_price TEXT,
                realized_pnl TEXT,
                realized_pnl_pct TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_positions_status ON positions(status);

            -- Trade history
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY,
                position_id INTEGER NOT NULL,
                automation_id INTEGER,
                symbol TEXT NOT NULL,
                contract TEXT,
                side TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                price TEXT NOT NULL,
                amount TEXT NOT NULL,
                source TEXT NOT NULL,
                executed_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_trades_executed_at ON trades(executed_at);
            CREATE INDEX IF NOT EXISTS idx_trades_symbol ON trades(symbol);
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    /// Save a complete snapshot. Positions are replaced wholesale; the trade
    /// history is append-only and untouched here.
    pub fn save_snapshot(&self, snapshot: &EngineSnapshot) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            r#"
            INSERT INTO engine_state (id, balance, cycle_count, last_saved)
            VALUES (1, ?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET
                balance = ?1,
                cycle_count = ?2,
                last_saved = ?3
            "#,
            params![
                snapshot.balance.to_string(),
                snapshot.cycle_count,
                snapshot.last_saved.to_rfc3339(),
            ],
        )?;

        tx.execute("DELETE FROM positions", [])?;

        for pos in &snapshot.positions {
            tx.execute(
                r#"
                INSERT INTO positions (id, automation_id, symbol, contract, side, quantity,
                                       entry_price, entry_greeks, current_price, current_greeks,
                                       opened_at, status, closed_at, exit_price,
                                       realized_pnl, realized_pnl_pct)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
                "#,
                params![
                    pos.id,
                    pos.automation_id,
                    pos.symbol,
                    contract_to_json(pos.contract.as_ref())?,
                    side_str(pos.side),
                    pos.quantity,
                    pos.entry_price.to_string(),
                    greeks_to_json(pos.entry_greeks.as_ref())?,
                    pos.current_price.to_string(),
                    greeks_to_json(pos.current_greeks.as_ref())?,
                    pos.opened_at.to_rfc3339(),
                    status_str(pos.status),
                    pos.closed_at.map(|t| t.to_rfc3339()),
                    pos.exit_price.map(|p| p.to_string()),
                    pos.realized_pnl.map(|p| p.to_string()),
                    pos.realized_pnl_pct.map(|p| p.to_string()),
                ],
            )?;
        }

        tx.commit()?;

        debug!(
            balance = %snapshot.balance,
            cycle_count = snapshot.cycle_count,
            positions = snapshot.positions.len(),
            "Snapshot saved to database"
        );
        Ok(())
    }

    /// Load the last saved snapshot, if any.
    pub fn load_snapshot(&self) -> Result<Option<EngineSnapshot>> {
        let state_row: Option<(String, u64, String)> = self
            .conn
            .query_row(
                "SELECT balance, cycle_count, last_saved FROM engine_state WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((balance, cycle_count, last_saved)) = state_row else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, automation_id, symbol, contract, side, quantity,
                   entry_price, entry_greeks, current_price, current_greeks,
                   opened_at, status, closed_at, exit_price, realized_pnl, realized_pnl_pct
            FROM positions
            ORDER BY id
            "#,
        )?;

        let positions: Vec<Position> = stmt
            .query_map([], |row| {
                Ok(Position {
                    id: row.get(0)?,
                    automation_id: row.get(1)?,
                    symbol: row.get(2)?,
                    contract: contract_from_json(row.get::<_, Option<String>>(3)?),
                    side: parse_side(&row.get::<_, String>(4)?),
                    quantity: row.get(5)?,
                    entry_price: parse_decimal(&row.get::<_, String>(6)?),
                    entry_greeks: greeks_from_json(row.get::<_, Option<String>>(7)?),
                    current_price: parse_decimal(&row.get::<_, String>(8)?),
                    current_greeks: greeks_from_json(row.get::<_, Option<String>>(9)?),
                    opened_at: parse_timestamp(&row.get::<_, String>(10)?),
                    status: parse_status(&row.get::<_, String>(11)?),
                    closed_at: row
                        .get::<_, Option<String>>(12)?
                        .map(|s| parse_timestamp(&s)),
                    exit_price: row.get::<_, Option<String>>(13)?.map(|s| parse_decimal(&s)),
                    realized_pnl: row.get::<_, Option<String>>(14)?.map(|s| parse_decimal(&s)),
                    realized_pnl_pct: row
                        .get::<_, Option<String>>(15)?
                        .map(|s| parse_decimal(&s)),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        let snapshot = EngineSnapshot {
            balance: parse_decimal(&balance),
            cycle_count,
            positions,
            last_saved: parse_timestamp(&last_saved),
        };

        info!(
            balance = %snapshot.balance,
            cycle_count = snapshot.cycle_count,
            positions = snapshot.positions.len(),
            last_saved = %snapshot.last_saved,
            "Loaded snapshot from database"
        );

        Ok(Some(snapshot))
    }

    /// Record an executed trade.
    pub fn record_trade(&self, trade: &Trade) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO trades (id, position_id, automation_id, symbol, contract,
                                           side, quantity, price, amount, source, executed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                trade.id,
                trade.position_id,
                trade.automation_id,
                trade.symbol,
                contract_to_json(trade.contract.as_ref())?,
                trade_side_str(trade.side),
                trade.quantity,
                trade.price.to_string(),
                trade.amount.to_string(),
                source_str(trade.source),
                trade.executed_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Trades executed at or after `since`, newest first.
    pub fn recent_trades(&self, since: DateTime<Utc>) -> Result<Vec<Trade>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, position_id, automation_id, symbol, contract, side,
                   quantity, price, amount, source, executed_at
            FROM trades
            WHERE executed_at >= ?1
            ORDER BY executed_at DESC
            "#,
        )?;

        let trades: Vec<Trade> = stmt
            .query_map([since.to_rfc3339()], |row| {
                Ok(Trade {
                    id: row.get(0)?,
                    position_id: row.get(1)?,
                    automation_id: row.get(2)?,
                    symbol: row.get(3)?,
                    contract: contract_from_json(row.get::<_, Option<String>>(4)?),
                    side: parse_trade_side(&row.get::<_, String>(5)?),
                    quantity: row.get(6)?,
                    price: parse_decimal(&row.get::<_, String>(7)?),
                    amount: parse_decimal(&row.get::<_, String>(8)?),
                    source: parse_source(&row.get::<_, String>(9)?),
                    executed_at: parse_timestamp(&row.get::<_, String>(10)?),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(trades)
    }

    /// Check if we have any saved state.
    pub fn has_state(&self) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM engine_state WHERE id = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Clear all data (for testing or reset).
    pub fn clear_all(&self) -> Result<()> {
        warn!("Clearing all persistence data");
        self.conn.execute_batch(
            r#"
            DELETE FROM engine_state;
            DELETE FROM positions;
            DELETE FROM trades;
            "#,
        )?;
        Ok(())
    }
}

fn parse_decimal(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap_or_default()
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn contract_to_json(contract: Option<&ContractSpec>) -> Result<Option<String>> {
    contract
        .map(|c| serde_json::to_string(c).context("Failed to serialize contract"))
        .transpose()
}

fn contract_from_json(json: Option<String>) -> Option<ContractSpec> {
    json.and_then(|s| serde_json::from_str(&s).ok())
}

fn greeks_to_json(greeks: Option<&Greeks>) -> Result<Option<String>> {
    greeks
        .map(|g| serde_json::to_string(g).context("Failed to serialize greeks"))
        .transpose()
}

fn greeks_from_json(json: Option<String>) -> Option<Greeks> {
    json.and_then(|s| serde_json::from_str(&s).ok())
}

fn side_str(side: PositionSide) -> &'static str {
    match side {
        PositionSide::Long => "long",
        PositionSide::Short => "short",
    }
}

fn parse_side(s: &str) -> PositionSide {
    match s {
        "short" => PositionSide::Short,
        _ => PositionSide::Long,
    }
}

fn status_str(status: PositionStatus) -> &'static str {
    match status {
        PositionStatus::Open => "open",
        PositionStatus::Closed => "closed",
    }
}

fn parse_status(s: &str) -> PositionStatus {
    match s {
        "closed" => PositionStatus::Closed,
        _ => PositionStatus::Open,
    }
}

fn trade_side_str(side: TradeSide) -> &'static str {
    match side {
        TradeSide::Buy => "buy",
        TradeSide::Sell => "sell",
    }
}

fn parse_trade_side(s: &str) -> TradeSide {
    match s {
        "sell" => TradeSide::Sell,
        _ => TradeSide::Buy,
    }
}

fn source_str(source: TradeSource) -> &'static str {
    match source {
        TradeSource::Manual => "manual",
        TradeSource::Automation => "automation",
        TradeSource::Test => "test",
    }
}

fn parse_source(s: &str) -> TradeSource {
    match s {
        "manual" => TradeSource::Manual,
        "test" => TradeSource::Test,
        _ => TradeSource::Automation,
    }
}

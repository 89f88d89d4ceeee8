//! Market data types consumed by the trading engine.
//!
//! All of these are ephemeral snapshots supplied by the market data
//! gateway; none are persisted by the engine itself.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Directional hint attached to a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Bullish,
    Bearish,
    Neutral,
}

/// Confidence-scored trading signal for one symbol.
///
/// Produced per evaluation by the external signal source; the engine only
/// reads `confidence` and never persists the signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    /// Strength of the opportunity, 0.0..=1.0
    pub confidence: Decimal,
    pub direction: Direction,
    pub rationale: Option<String>,
}

impl Signal {
    pub fn new(symbol: impl Into<String>, confidence: Decimal, direction: Direction) -> Self {
        Self {
            symbol: symbol.into(),
            confidence,
            direction,
            rationale: None,
        }
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }
}

/// Call or put.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionKind {
    Call,
    Put,
}

impl fmt::Display for OptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionKind::Call => write!(f, "CALL"),
            OptionKind::Put => write!(f, "PUT"),
        }
    }
}

/// Option Greeks snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Greeks {
    pub delta: Decimal,
    pub gamma: Decimal,
    pub theta: Decimal,
    pub vega: Decimal,
}

impl Greeks {
    pub fn with_delta(delta: Decimal) -> Self {
        Self {
            delta,
            gamma: Decimal::ZERO,
            theta: Decimal::ZERO,
            vega: Decimal::ZERO,
        }
    }
}

/// One entry of an option chain snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionCandidate {
    pub symbol: String,
    pub kind: OptionKind,
    pub strike: Decimal,
    pub expiration: NaiveDate,
    pub greeks: Greeks,
    pub implied_volatility: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
    pub last: Decimal,
    pub open_interest: u64,
    /// Chain-provided ranking hint, used when a rule sets no delta target.
    pub quality_score: Option<Decimal>,
}

impl OptionCandidate {
    /// Days to expiration relative to `as_of`. Negative when expired.
    pub fn dte(&self, as_of: NaiveDate) -> i64 {
        (self.expiration - as_of).num_days()
    }

    /// Midpoint of bid/ask, falling back to last when the book is empty.
    pub fn mid_price(&self) -> Decimal {
        if self.bid > Decimal::ZERO && self.ask > Decimal::ZERO {
            (self.bid + self.ask) / dec!(2)
        } else {
            self.last
        }
    }
}

/// Contract identity carried on positions and trades.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractSpec {
    pub kind: OptionKind,
    pub strike: Decimal,
    pub expiration: NaiveDate,
}

impl ContractSpec {
    pub fn of(candidate: &OptionCandidate) -> Self {
        Self {
            kind: candidate.kind,
            strike: candidate.strike,
            expiration: candidate.expiration,
        }
    }
}

impl fmt::Display for ContractSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.expiration, self.strike, self.kind)
    }
}

/// Current price (and optionally Greeks) for a held contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractQuote {
    pub price: Decimal,
    pub greeks: Option<Greeks>,
    pub as_of: DateTime<Utc>,
}

/// Market/calendar session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketStatus {
    Open,
    PreMarket,
    AfterHours,
    Closed,
}

impl MarketStatus {
    /// Whether regular-session trading is available.
    pub fn is_open(&self) -> bool {
        matches!(self, MarketStatus::Open)
    }
}

impl fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketStatus::Open => write!(f, "open"),
            MarketStatus::PreMarket => write!(f, "pre-market"),
            MarketStatus::AfterHours => write!(f, "after-hours"),
            MarketStatus::Closed => write!(f, "closed"),
        }
    }
}

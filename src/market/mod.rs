//! Market data gateway abstraction.
//!
//! The engine consumes signals, option chains, and quotes as opaque inputs
//! from an external collaborator. This module defines the trait that
//! collaborator must satisfy plus a deterministic mock used for paper
//! trading and tests.

pub mod calendar;
pub mod mock;
pub mod types;

pub use calendar::MarketCalendar;
pub use mock::MockMarketData;
pub use types::{
    ContractQuote, ContractSpec, Direction, Greeks, MarketStatus, OptionCandidate, OptionKind,
    Signal,
};

use async_trait::async_trait;

/// Source of signals, option chains, and pricing for the engine.
///
/// Implementations must be safe to call concurrently; the cycle coordinator
/// fans evaluation out across rules.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Fetch the current signal score for a symbol.
    async fn signal(&self, symbol: &str) -> anyhow::Result<Signal>;

    /// Fetch the current option chain snapshot for a symbol.
    async fn option_chain(&self, symbol: &str) -> anyhow::Result<Vec<OptionCandidate>>;

    /// Fetch a fresh price (and Greeks where available) for a held contract,
    /// or the underlying itself when `contract` is `None`.
    async fn quote(
        &self,
        symbol: &str,
        contract: Option<&ContractSpec>,
    ) -> anyhow::Result<ContractQuote>;

    /// Current market/calendar status.
    async fn market_status(&self) -> MarketStatus;
}

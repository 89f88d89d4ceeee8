//! Deterministic mock market data provider.
//!
//! Backs paper-trading mode and the test suite: signals, chains, and quotes
//! are scripted per symbol, failures can be injected per symbol, and the
//! session status is settable.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::RwLock;

use super::calendar::MarketCalendar;
use super::types::{ContractQuote, ContractSpec, MarketStatus, OptionCandidate, Signal};
use super::MarketDataProvider;

#[derive(Default)]
struct MockState {
    signals: HashMap<String, Signal>,
    chains: HashMap<String, Vec<OptionCandidate>>,
    quotes: HashMap<String, Decimal>,
    failing: HashSet<String>,
    status: Option<MarketStatus>,
    fetch_delay: Option<Duration>,
}

/// Scripted market data source.
pub struct MockMarketData {
    state: RwLock<MockState>,
}

impl Default for MockMarketData {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMarketData {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MockState {
                status: Some(MarketStatus::Open),
                ..Default::default()
            }),
        }
    }

    /// Script the signal returned for a symbol.
    pub async fn set_signal(&self, signal: Signal) {
        let mut state = self.state.write().await;
        state.signals.insert(signal.symbol.clone(), signal);
    }

    /// Script the option chain returned for a symbol.
    pub async fn set_chain(&self, symbol: &str, chain: Vec<OptionCandidate>) {
        let mut state = self.state.write().await;
        state.chains.insert(symbol.to_string(), chain);
    }

    /// Script the quoted price for a symbol's contracts.
    pub async fn set_quote(&self, symbol: &str, price: Decimal) {
        let mut state = self.state.write().await;
        state.quotes.insert(symbol.to_string(), price);
    }

    /// Make every fetch for `symbol` fail until cleared.
    pub async fn fail_symbol(&self, symbol: &str) {
        let mut state = self.state.write().await;
        state.failing.insert(symbol.to_string());
    }

    pub async fn clear_failure(&self, symbol: &str) {
        let mut state = self.state.write().await;
        state.failing.remove(symbol);
    }

    /// Pin the reported market status.
    pub async fn set_status(&self, status: MarketStatus) {
        let mut state = self.state.write().await;
        state.status = Some(status);
    }

    /// Unpin the status so the session calendar drives it.
    pub async fn use_calendar(&self) {
        let mut state = self.state.write().await;
        state.status = None;
    }

    /// Add artificial latency to every fetch, for timeout tests.
    pub async fn set_fetch_delay(&self, delay: Duration) {
        let mut state = self.state.write().await;
        state.fetch_delay = Some(delay);
    }

    async fn check_symbol(&self, symbol: &str) -> anyhow::Result<()> {
        let delay = {
            let state = self.state.read().await;
            if state.failing.contains(symbol) {
                anyhow::bail!("mock data fetch failure for {symbol}");
            }
            state.fetch_delay
        };
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        Ok(())
    }
}

#[async_trait]
impl MarketDataProvider for MockMarketData {
    async fn signal(&self, symbol: &str) -> anyhow::Result<Signal> {
        self.check_symbol(symbol).await?;
        let state = self.state.read().await;
        state
            .signals
            .get(symbol)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no scripted signal for {symbol}"))
    }

    async fn option_chain(&self, symbol: &str) -> anyhow::Result<Vec<OptionCandidate>> {
        self.check_symbol(symbol).await?;
        let state = self.state.read().await;
        Ok(state.chains.get(symbol).cloned().unwrap_or_default())
    }

    async fn quote(
        &self,
        symbol: &str,
        _contract: Option<&ContractSpec>,
    ) -> anyhow::Result<ContractQuote> {
        self.check_symbol(symbol).await?;
        let state = self.state.read().await;
        let price = state
            .quotes
            .get(symbol)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no scripted quote for {symbol}"))?;
        Ok(ContractQuote {
            price,
            greeks: None,
            as_of: Utc::now(),
        })
    }

    async fn market_status(&self) -> MarketStatus {
        let state = self.state.read().await;
        state
            .status
            .unwrap_or_else(|| MarketCalendar::new().status())
    }
}

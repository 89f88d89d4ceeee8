//! Automation rules: user-authored trading policies and their store.
//!
//! A rule describes when to enter a position on a symbol (confidence gate,
//! DTE window, delta target) and when to exit it (profit target, stop loss,
//! max hold). The store is the CRUD pass-through surface exposed to the
//! out-of-scope API layer.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

use crate::market::OptionKind;
use crate::positions::PositionSide;

/// Strategy the rule trades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    CoveredCall,
    CashSecuredPut,
    LongCall,
    LongPut,
}

impl StrategyKind {
    /// Option kind this strategy trades.
    pub fn option_kind(&self) -> OptionKind {
        match self {
            StrategyKind::CoveredCall | StrategyKind::LongCall => OptionKind::Call,
            StrategyKind::CashSecuredPut | StrategyKind::LongPut => OptionKind::Put,
        }
    }

    /// Position side: premium sellers are short, premium buyers are long.
    pub fn side(&self) -> PositionSide {
        match self {
            StrategyKind::CoveredCall | StrategyKind::CashSecuredPut => PositionSide::Short,
            StrategyKind::LongCall | StrategyKind::LongPut => PositionSide::Long,
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::CoveredCall => write!(f, "covered-call"),
            StrategyKind::CashSecuredPut => write!(f, "cash-secured-put"),
            StrategyKind::LongCall => write!(f, "long-call"),
            StrategyKind::LongPut => write!(f, "long-put"),
        }
    }
}

/// Entry gate and contract-selection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryParams {
    /// Minimum signal confidence, 0.0..=1.0
    pub min_confidence: Decimal,
    pub preferred_dte: u32,
    pub min_dte: u32,
    pub max_dte: u32,
    pub target_delta: Option<Decimal>,
    pub min_delta: Option<Decimal>,
    pub max_delta: Option<Decimal>,
}

/// Exit thresholds, checked in fixed order by the exit evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitParams {
    /// Close for profit at this unrealized P/L percent (e.g. 50 = +50%).
    pub profit_target_pct: Decimal,
    /// Close for loss at minus this percent, when set.
    pub stop_loss_pct: Option<Decimal>,
    /// Close after holding this many days, when set.
    pub max_days_to_hold: Option<u32>,
}

/// A user-authored trading policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Automation {
    pub id: u64,
    pub owner: String,
    pub name: String,
    pub symbol: String,
    pub strategy: StrategyKind,
    pub entry: EntryParams,
    pub exit: ExitParams,
    pub active: bool,
    pub paused: bool,
    /// Incremented only on successful trade creation.
    pub execution_count: u64,
    pub created_at: DateTime<Utc>,
}

impl Automation {
    /// A rule takes part in entry scanning only when active and unpaused.
    pub fn is_dormant(&self) -> bool {
        !self.active || self.paused
    }
}

/// Rule definition supplied by the caller; the store assigns identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAutomation {
    pub owner: String,
    pub name: String,
    pub symbol: String,
    pub strategy: StrategyKind,
    pub entry: EntryParams,
    pub exit: ExitParams,
}

#[derive(Debug, Error, PartialEq)]
pub enum RuleError {
    #[error("automation {0} not found")]
    NotFound(u64),
    #[error("invalid automation: {0}")]
    Invalid(String),
}

fn validate(entry: &EntryParams, exit: &ExitParams) -> Result<(), RuleError> {
    let unit = Decimal::ZERO..=Decimal::ONE;
    if !unit.contains(&entry.min_confidence) {
        return Err(RuleError::Invalid(
            "min_confidence must be within [0, 1]".to_string(),
        ));
    }
    if !(entry.min_dte <= entry.preferred_dte && entry.preferred_dte <= entry.max_dte) {
        return Err(RuleError::Invalid(
            "DTE window must satisfy min <= preferred <= max".to_string(),
        ));
    }
    for (label, delta) in [
        ("target_delta", entry.target_delta),
        ("min_delta", entry.min_delta),
        ("max_delta", entry.max_delta),
    ] {
        if let Some(d) = delta {
            if !unit.contains(&d) {
                return Err(RuleError::Invalid(format!("{label} must be within [0, 1]")));
            }
        }
    }
    if let (Some(min), Some(target), Some(max)) =
        (entry.min_delta, entry.target_delta, entry.max_delta)
    {
        if !(min <= target && target <= max) {
            return Err(RuleError::Invalid(
                "delta bounds must satisfy min <= target <= max".to_string(),
            ));
        }
    }
    if exit.profit_target_pct <= Decimal::ZERO {
        return Err(RuleError::Invalid(
            "profit_target_pct must be positive".to_string(),
        ));
    }
    if matches!(exit.stop_loss_pct, Some(s) if s <= Decimal::ZERO) {
        return Err(RuleError::Invalid(
            "stop_loss_pct must be positive when set".to_string(),
        ));
    }
    if matches!(exit.max_days_to_hold, Some(d) if d == 0) {
        return Err(RuleError::Invalid(
            "max_days_to_hold must be positive when set".to_string(),
        ));
    }
    Ok(())
}

/// In-memory automation store shared between the API surface and the engine.
pub struct RuleStore {
    rules: RwLock<HashMap<u64, Automation>>,
    next_id: AtomicU64,
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleStore {
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Validate and create a rule. New rules start active and unpaused.
    pub async fn create(&self, new: NewAutomation) -> Result<Automation, RuleError> {
        validate(&new.entry, &new.exit)?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let rule = Automation {
            id,
            owner: new.owner,
            name: new.name,
            symbol: new.symbol,
            strategy: new.strategy,
            entry: new.entry,
            exit: new.exit,
            active: true,
            paused: false,
            execution_count: 0,
            created_at: Utc::now(),
        };

        info!(
            rule_id = id,
            name = %rule.name,
            symbol = %rule.symbol,
            strategy = %rule.strategy,
            "Created automation"
        );

        self.rules.write().await.insert(id, rule.clone());
        Ok(rule)
    }

    pub async fn get(&self, id: u64) -> Result<Automation, RuleError> {
        self.rules
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(RuleError::NotFound(id))
    }

    pub async fn list(&self) -> Vec<Automation> {
        let mut rules: Vec<Automation> = self.rules.read().await.values().cloned().collect();
        rules.sort_by_key(|r| r.id);
        rules
    }

    /// Rules eligible for the entry pass.
    pub async fn active_rules(&self) -> Vec<Automation> {
        let mut rules: Vec<Automation> = self
            .rules
            .read()
            .await
            .values()
            .filter(|r| !r.is_dormant())
            .cloned()
            .collect();
        rules.sort_by_key(|r| r.id);
        rules
    }

    /// Replace a rule's parameters, keeping identity and counters.
    pub async fn update(&self, id: u64, new: NewAutomation) -> Result<Automation, RuleError> {
        validate(&new.entry, &new.exit)?;

        let mut rules = self.rules.write().await;
        let rule = rules.get_mut(&id).ok_or(RuleError::NotFound(id))?;
        rule.name = new.name;
        rule.symbol = new.symbol;
        rule.strategy = new.strategy;
        rule.entry = new.entry;
        rule.exit = new.exit;
        Ok(rule.clone())
    }

    pub async fn pause(&self, id: u64) -> Result<(), RuleError> {
        self.set_paused(id, true).await
    }

    pub async fn resume(&self, id: u64) -> Result<(), RuleError> {
        self.set_paused(id, false).await
    }

    async fn set_paused(&self, id: u64, paused: bool) -> Result<(), RuleError> {
        let mut rules = self.rules.write().await;
        let rule = rules.get_mut(&id).ok_or(RuleError::NotFound(id))?;
        rule.paused = paused;
        info!(rule_id = id, paused, "Automation pause state changed");
        Ok(())
    }

    /// Delete removes the rule from future cycles; already-open positions
    /// remain owned by the position store.
    pub async fn delete(&self, id: u64) -> Result<(), RuleError> {
        self.rules
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(RuleError::NotFound(id))
    }

    /// Bump execution_count after a successful trade creation.
    pub async fn record_execution(&self, id: u64) -> Result<u64, RuleError> {
        let mut rules = self.rules.write().await;
        let rule = rules.get_mut(&id).ok_or(RuleError::NotFound(id))?;
        rule.execution_count += 1;
        Ok(rule.execution_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_entry() -> EntryParams {
        EntryParams {
            min_confidence: dec!(0.3),
            preferred_dte: 30,
            min_dte: 21,
            max_dte: 60,
            target_delta: Some(dec!(0.3)),
            min_delta: Some(dec!(0.2)),
            max_delta: Some(dec!(0.4)),
        }
    }

    fn sample_exit() -> ExitParams {
        ExitParams {
            profit_target_pct: dec!(50),
            stop_loss_pct: Some(dec!(100)),
            max_days_to_hold: Some(30),
        }
    }

    fn sample_new(symbol: &str) -> NewAutomation {
        NewAutomation {
            owner: "advisor-1".to_string(),
            name: format!("{symbol} weekly premium"),
            symbol: symbol.to_string(),
            strategy: StrategyKind::CoveredCall,
            entry: sample_entry(),
            exit: sample_exit(),
        }
    }

    #[tokio::test]
    async fn test_create_assigns_ids_and_defaults() {
        let store = RuleStore::new();
        let a = store.create(sample_new("SPY")).await.unwrap();
        let b = store.create(sample_new("QQQ")).await.unwrap();

        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert!(a.active);
        assert!(!a.paused);
        assert_eq!(a.execution_count, 0);
    }

    #[tokio::test]
    async fn test_invalid_dte_window_rejected() {
        let store = RuleStore::new();
        let mut new = sample_new("SPY");
        new.entry.min_dte = 45;
        new.entry.preferred_dte = 30;

        assert!(matches!(
            store.create(new).await,
            Err(RuleError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_confidence_rejected() {
        let store = RuleStore::new();
        let mut new = sample_new("SPY");
        new.entry.min_confidence = dec!(1.5);

        assert!(store.create(new).await.is_err());
    }

    #[tokio::test]
    async fn test_delta_ordering_rejected() {
        let store = RuleStore::new();
        let mut new = sample_new("SPY");
        new.entry.min_delta = Some(dec!(0.4));
        new.entry.max_delta = Some(dec!(0.2));

        assert!(store.create(new).await.is_err());
    }

    #[tokio::test]
    async fn test_pause_hides_rule_from_active_set() {
        let store = RuleStore::new();
        let rule = store.create(sample_new("SPY")).await.unwrap();
        assert_eq!(store.active_rules().await.len(), 1);

        store.pause(rule.id).await.unwrap();
        assert!(store.active_rules().await.is_empty());
        assert!(store.get(rule.id).await.unwrap().is_dormant());

        store.resume(rule.id).await.unwrap();
        assert_eq!(store.active_rules().await.len(), 1);
    }

    #[tokio::test]
    async fn test_record_execution_is_monotonic() {
        let store = RuleStore::new();
        let rule = store.create(sample_new("SPY")).await.unwrap();

        assert_eq!(store.record_execution(rule.id).await.unwrap(), 1);
        assert_eq!(store.record_execution(rule.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_delete_removes_rule() {
        let store = RuleStore::new();
        let rule = store.create(sample_new("SPY")).await.unwrap();

        store.delete(rule.id).await.unwrap();
        assert!(matches!(
            store.get(rule.id).await,
            Err(RuleError::NotFound(_))
        ));
        assert!(matches!(
            store.delete(rule.id).await,
            Err(RuleError::NotFound(_))
        ));
    }

    #[test]
    fn test_strategy_kind_mapping() {
        assert_eq!(StrategyKind::CoveredCall.option_kind(), OptionKind::Call);
        assert_eq!(StrategyKind::LongPut.option_kind(), OptionKind::Put);
        assert_eq!(StrategyKind::CashSecuredPut.side(), PositionSide::Short);
        assert_eq!(StrategyKind::LongCall.side(), PositionSide::Long);
    }
}

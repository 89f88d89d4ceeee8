//! Account ledger: the single source of truth for money movement.
//!
//! One balance per owner, mutated only inside the ledger's critical
//! section. Every buy reserves funds atomically with respect to all other
//! concurrent trade attempts; insufficient funds is an ordinary rejection,
//! not an engine fault.

use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Error, PartialEq)]
pub enum LedgerError {
    #[error("insufficient funds: need {required}, have {available}")]
    InsufficientFunds {
        required: Decimal,
        available: Decimal,
    },
}

/// Serializes all balance mutations for one account.
pub struct Ledger {
    balance: Mutex<Decimal>,
}

impl Ledger {
    pub fn new(initial_balance: Decimal) -> Self {
        Self {
            balance: Mutex::new(initial_balance),
        }
    }

    pub async fn balance(&self) -> Decimal {
        *self.balance.lock().await
    }

    /// Atomically debit `cost` if affordable. The check and the debit happen
    /// under one lock so concurrent rule workers cannot both spend the same
    /// dollars.
    pub async fn reserve(&self, cost: Decimal) -> Result<(), LedgerError> {
        let mut balance = self.balance.lock().await;
        if *balance < cost {
            warn!(
                required = %cost,
                available = %balance,
                "Reservation rejected: insufficient funds"
            );
            return Err(LedgerError::InsufficientFunds {
                required: cost,
                available: *balance,
            });
        }
        *balance -= cost;
        debug!(cost = %cost, balance = %balance, "Reserved funds");
        Ok(())
    }

    /// Compensating credit for a reservation whose position open failed.
    pub async fn release(&self, cost: Decimal) {
        let mut balance = self.balance.lock().await;
        *balance += cost;
        warn!(amount = %cost, balance = %balance, "Released reservation");
    }

    /// Credit sale proceeds.
    pub async fn credit(&self, proceeds: Decimal) {
        let mut balance = self.balance.lock().await;
        *balance += proceeds;
        debug!(proceeds = %proceeds, balance = %balance, "Credited proceeds");
    }

    /// Overwrite the balance, used when restoring a persisted snapshot.
    pub async fn restore(&self, balance: Decimal) {
        *self.balance.lock().await = balance;
    }
}

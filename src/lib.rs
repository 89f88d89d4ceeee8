//! # Option Autotrader
//!
//! A confidence-gated, risk-bounded paper trading engine for options
//! automations.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `rules`: Automation rules (entry/exit parameters) and their store
//! - `market`: Market data types, provider trait, calendar, and mock source
//! - `ledger`: Cash ledger with atomic reservations
//! - `positions`: Position lifecycle and the immutable trade log
//! - `engine`: Entry/exit evaluation, cycle coordination, and the controller
//! - `persistence`: SQLite-based state persistence for paper trading

pub mod config;
pub mod engine;
pub mod ledger;
pub mod market;
pub mod persistence;
pub mod positions;
pub mod rules;

pub use config::Config;

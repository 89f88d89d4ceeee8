//! Option Autotrader - Main Entry Point
//!
//! Paper trading engine driven by mock market data: automations are
//! evaluated on a fixed cycle, gated by signal confidence and account
//! funds, with positions monitored for exit conditions.

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand};
use option_autotrader::config::Config;
use option_autotrader::engine::{CycleCoordinator, EngineController};
use option_autotrader::ledger::Ledger;
use option_autotrader::market::{
    Direction, Greeks, MockMarketData, OptionCandidate, OptionKind, Signal,
};
use option_autotrader::persistence::{EngineSnapshot, PersistenceManager};
use option_autotrader::positions::{PositionStore, TradeLog};
use option_autotrader::rules::{EntryParams, ExitParams, NewAutomation, RuleStore, StrategyKind};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

/// Option Autotrader CLI
#[derive(Parser)]
#[command(name = "option-autotrader")]
#[command(version, about = "Confidence-gated options paper trading engine")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one evaluation cycle immediately and print the report
    Cycle,

    /// Force one rule through entry evaluation in test mode
    TestTrade {
        /// Automation rule id
        #[arg(short, long)]
        rule: u64,
    },

    /// Close one open position at the current market price
    Close {
        /// Position id
        #[arg(short, long)]
        position: u64,
    },

    /// Show engine status from persisted state
    Status {
        /// Path to SQLite database
        #[arg(short, long, default_value = "data/paper_state.db")]
        db: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    if let Some(Commands::Status { db }) = &cli.command {
        return show_status(db);
    }

    let config = Config::load()?;
    config.validate()?;

    let app = App::build(&config).await?;

    match cli.command {
        Some(Commands::Cycle) => {
            let report = app.controller.run_cycle_now().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            app.save_state().await?;
            Ok(())
        }
        Some(Commands::TestTrade { rule }) => {
            let report = app.controller.test_trade(rule).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            app.save_state().await?;
            Ok(())
        }
        Some(Commands::Close { position }) => {
            let trade = app.controller.close_position(position).await?;
            println!("{}", serde_json::to_string_pretty(&trade)?);
            app.save_state().await?;
            Ok(())
        }
        Some(Commands::Status { .. }) => unreachable!("handled before config load"),
        None => run_engine(app, &config).await,
    }
}

/// Fully wired engine stack over the mock market data provider.
struct App {
    rules: Arc<RuleStore>,
    positions: Arc<PositionStore>,
    trades: Arc<TradeLog>,
    ledger: Arc<Ledger>,
    coordinator: Arc<CycleCoordinator>,
    controller: EngineController,
    persistence: PersistenceManager,
}

impl App {
    async fn build(config: &Config) -> Result<Self> {
        if let Some(parent) = Path::new(&config.account.db_path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let persistence = PersistenceManager::new(&config.account.db_path)?;

        let market = Arc::new(MockMarketData::new());
        let rules = Arc::new(RuleStore::new());
        let positions = Arc::new(PositionStore::new());
        let trades = Arc::new(TradeLog::new());
        let ledger = Arc::new(Ledger::new(config.account.initial_balance));

        let coordinator = Arc::new(CycleCoordinator::new(
            market.clone(),
            rules.clone(),
            positions.clone(),
            trades.clone(),
            ledger.clone(),
            config.engine.clone(),
        ));
        let controller = EngineController::new(
            coordinator.clone(),
            market.clone(),
            rules.clone(),
            trades.clone(),
            config.engine.clone(),
        );

        // Restore persisted balance, counters, and positions
        if let Some(snapshot) = persistence.load_snapshot()? {
            info!(
                balance = %snapshot.balance,
                cycle_count = snapshot.cycle_count,
                positions = snapshot.positions.len(),
                "Restoring state from database"
            );
            ledger.restore(snapshot.balance).await;
            coordinator.restore_counters(snapshot.cycle_count).await;
            positions.restore(snapshot.positions).await;
        } else {
            info!(
                balance = %config.account.initial_balance,
                "No previous state found, starting fresh"
            );
        }

        seed_demo_rules(&rules).await?;
        script_demo_market(&market).await;

        Ok(Self {
            rules,
            positions,
            trades,
            ledger,
            coordinator,
            controller,
            persistence,
        })
    }

    /// Persist balance, counters, positions, and the trade history.
    async fn save_state(&self) -> Result<()> {
        let snapshot = EngineSnapshot {
            balance: self.ledger.balance().await,
            cycle_count: self.coordinator.cycle_count().await,
            positions: self.positions.all_positions().await,
            last_saved: Utc::now(),
        };
        self.persistence.save_snapshot(&snapshot)?;

        for trade in self.trades.all().await {
            self.persistence.record_trade(&trade)?;
        }
        Ok(())
    }
}

async fn run_engine(app: App, config: &Config) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════╗");
    info!(
        "║   Option Autotrader v{} - Paper Trading             ║",
        env!("CARGO_PKG_VERSION")
    );
    info!("╚════════════════════════════════════════════════════════╝");
    info!(
        cycle_interval_secs = config.engine.cycle_interval_secs,
        balance = %app.ledger.balance().await,
        rules = app.rules.list().await.len(),
        "Starting engine"
    );

    app.controller.start().await;

    let mut snapshot_timer =
        tokio::time::interval(Duration::from_secs(config.account.snapshot_interval_secs));
    snapshot_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    snapshot_timer.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            _ = snapshot_timer.tick() => {
                if let Err(e) = app.save_state().await {
                    warn!(error = %e, "Periodic state save failed");
                }
            }
        }
    }

    app.controller.stop().await;
    app.save_state().await?;

    let status = app.controller.status().await;
    info!(
        cycles = status.cycle_count,
        balance = %app.ledger.balance().await,
        open_positions = app.positions.open_positions().await.len(),
        "Engine stopped, state saved"
    );
    Ok(())
}

/// A pair of automations so `run` exercises both premium-buying and
/// premium-selling paths out of the box.
async fn seed_demo_rules(rules: &RuleStore) -> Result<()> {
    rules
        .create(NewAutomation {
            owner: "demo".to_string(),
            name: "SPY momentum calls".to_string(),
            symbol: "SPY".to_string(),
            strategy: StrategyKind::LongCall,
            entry: EntryParams {
                min_confidence: dec!(0.45),
                preferred_dte: 30,
                min_dte: 21,
                max_dte: 60,
                target_delta: Some(dec!(0.30)),
                min_delta: Some(dec!(0.20)),
                max_delta: Some(dec!(0.45)),
            },
            exit: ExitParams {
                profit_target_pct: dec!(50),
                stop_loss_pct: Some(dec!(35)),
                max_days_to_hold: Some(21),
            },
        })
        .await?;

    rules
        .create(NewAutomation {
            owner: "demo".to_string(),
            name: "QQQ premium puts".to_string(),
            symbol: "QQQ".to_string(),
            strategy: StrategyKind::CashSecuredPut,
            entry: EntryParams {
                min_confidence: dec!(0.55),
                preferred_dte: 35,
                min_dte: 25,
                max_dte: 50,
                target_delta: Some(dec!(0.25)),
                min_delta: Some(dec!(0.15)),
                max_delta: Some(dec!(0.35)),
            },
            exit: ExitParams {
                profit_target_pct: dec!(60),
                stop_loss_pct: Some(dec!(100)),
                max_days_to_hold: Some(30),
            },
        })
        .await?;

    info!("Seeded demo automations");
    Ok(())
}

/// Scripted signals, chains, and quotes for the demo symbols.
async fn script_demo_market(market: &MockMarketData) {
    market
        .set_signal(
            Signal::new("SPY", dec!(0.62), Direction::Bullish)
                .with_rationale("breadth expansion above the 20-day range"),
        )
        .await;
    market
        .set_signal(
            Signal::new("QQQ", dec!(0.58), Direction::Neutral)
                .with_rationale("elevated implied volatility into earnings week"),
        )
        .await;

    market
        .set_chain(
            "SPY",
            vec![
                demo_candidate("SPY", OptionKind::Call, dec!(580), 25, dec!(0.28), dec!(3.10)),
                demo_candidate("SPY", OptionKind::Call, dec!(585), 32, dec!(0.31), dec!(3.45)),
                demo_candidate("SPY", OptionKind::Call, dec!(590), 53, dec!(0.27), dec!(4.20)),
            ],
        )
        .await;
    market
        .set_chain(
            "QQQ",
            vec![
                demo_candidate("QQQ", OptionKind::Put, dec!(495), 28, dec!(-0.24), dec!(4.10)),
                demo_candidate("QQQ", OptionKind::Put, dec!(490), 35, dec!(-0.26), dec!(3.80)),
                demo_candidate("QQQ", OptionKind::Put, dec!(485), 49, dec!(-0.22), dec!(3.55)),
            ],
        )
        .await;

    market.set_quote("SPY", dec!(3.45)).await;
    market.set_quote("QQQ", dec!(3.80)).await;
}

fn demo_candidate(
    symbol: &str,
    kind: OptionKind,
    strike: Decimal,
    dte: i64,
    delta: Decimal,
    mid: Decimal,
) -> OptionCandidate {
    let half_spread = dec!(0.05);
    OptionCandidate {
        symbol: symbol.to_string(),
        kind,
        strike,
        expiration: Utc::now().date_naive() + ChronoDuration::days(dte),
        greeks: Greeks::with_delta(delta),
        implied_volatility: dec!(0.21),
        bid: mid - half_spread,
        ask: mid + half_spread,
        last: mid,
        open_interest: 2500,
        quality_score: None,
    }
}

fn init_logging() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("option_autotrader=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(true)
        .init();
    Ok(())
}

fn show_status(db_path: &str) -> Result<()> {
    println!("╔════════════════════════════════════════════════════════╗");
    println!("║              OPTION AUTOTRADER STATUS                  ║");
    println!("╚════════════════════════════════════════════════════════╝");

    if !Path::new(db_path).exists() {
        println!("\nDatabase not found: {db_path}");
        println!("The engine has not been started yet, or the database path is incorrect.");
        return Ok(());
    }

    let persistence = PersistenceManager::new(db_path)?;

    let Some(snapshot) = persistence.load_snapshot()? else {
        println!("\nNo saved state found in database.");
        return Ok(());
    };

    let open: Vec<_> = snapshot
        .positions
        .iter()
        .filter(|p| p.is_open())
        .collect();
    let closed = snapshot.positions.len() - open.len();
    let realized: Decimal = snapshot
        .positions
        .iter()
        .filter_map(|p| p.realized_pnl)
        .sum();

    println!("\nAccount Summary");
    println!("   Balance:          ${:.2}", snapshot.balance);
    println!("   Cycles Run:       {}", snapshot.cycle_count);
    println!("   Realized P/L:     ${realized:.2}");
    println!(
        "   Last Updated:     {}",
        snapshot.last_saved.format("%Y-%m-%d %H:%M:%S UTC")
    );

    println!("\nPositions ({} open, {closed} closed)", open.len());
    for pos in &open {
        let contract = pos
            .contract
            .as_ref()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "equity".to_string());
        println!(
            "   {} {} | qty {} | entry ${:.2} | mark ${:.2} | P/L {:+.1}%",
            pos.symbol,
            contract,
            pos.quantity,
            pos.entry_price,
            pos.current_price,
            pos.unrealized_pnl_pct()
        );
    }

    let since = Utc::now() - ChronoDuration::hours(24);
    let recent = persistence.recent_trades(since)?;
    println!("\nTrades (last 24h): {}", recent.len());
    for trade in recent.iter().take(10) {
        println!(
            "   {} {:?} {} x{} @ ${:.2} (${:.2}) [{:?}]",
            trade.executed_at.format("%H:%M:%S"),
            trade.side,
            trade.symbol,
            trade.quantity,
            trade.price,
            trade.amount,
            trade.source
        );
    }

    Ok(())
}

//! BreakoutBot CLI
//!
//! Commands:
//! - `replay` - stream one recorded session through the engine (paper fills)
//! - `backtest` - replay every session file in a directory with capital carry-over

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use breakout_bot::backtesting::Backtester;
use breakout_bot::broker::PaperBroker;
use breakout_bot::config::AppConfig;
use breakout_bot::persistence::{load_warm_start_csv, JournalRecord, TradeJournal};
use breakout_bot::router::{events::feed_replay_file, run_event_loop, TickRouter};

#[derive(Parser)]
#[command(name = "breakout-bot", about = "Fractal breakout engine for index options", version)]
struct Cli {
    /// Extra config file layered over config/default and config/local
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay one JSONL session file (ticks and order envelopes)
    Replay {
        /// Session file
        ticks: PathBuf,

        /// Base-timeframe CSV of the tracked index for warm start
        #[arg(long)]
        warm_start: Option<PathBuf>,

        /// Session capital; defaults to risk.initial_capital
        #[arg(long, env = "BREAKOUT_CAPITAL")]
        capital: Option<f64>,

        /// Channel capacity between reader and engine
        #[arg(long, default_value_t = 4096)]
        buffer: usize,
    },
    /// Replay every *.txt / *.jsonl file in a directory
    Backtest {
        /// Directory with one file per session
        dir: PathBuf,

        /// Starting capital; defaults to risk.initial_capital
        #[arg(long)]
        capital: Option<f64>,

        /// Base-timeframe CSV of the tracked index for warm start
        #[arg(long)]
        warm_start: Option<PathBuf>,

        /// Journal output; defaults to persistence.data_dir/journal_file
        #[arg(long)]
        journal: Option<PathBuf>,
    },
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json);

    let config = AppConfig::load_from(cli.config.as_deref())?;
    info!(config = %config.digest(), "Configuration loaded");

    match cli.command {
        Commands::Replay {
            ticks,
            warm_start,
            capital,
            buffer,
        } => replay(&config, ticks, warm_start.as_deref(), capital, buffer).await,
        Commands::Backtest {
            dir,
            capital,
            warm_start,
            journal,
        } => backtest(&config, &dir, capital, warm_start.as_deref(), journal),
    }
}

async fn replay(
    config: &AppConfig,
    ticks: PathBuf,
    warm_start: Option<&Path>,
    capital: Option<f64>,
    buffer: usize,
) -> Result<()> {
    if config.trading.real_trade {
        bail!("trading.real_trade is set but no live broker transport is built into this binary");
    }

    let mut router = TickRouter::from_config(config, Box::new(PaperBroker::new()))?;
    if let Some(path) = warm_start {
        match load_warm_start_csv(path, &config.signal.tracked_symbol) {
            Ok(candles) => router.warm_start(&candles),
            Err(e) => warn!(error = %e, "Warm start unavailable, accumulating on the fly"),
        }
    }
    router.set_capital(capital.unwrap_or(config.risk.initial_capital));

    // Single ordering point for every inbound stream
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let reader = tokio::spawn(feed_replay_file(ticks, tx));

    tokio::select! {
        stats = run_event_loop(&mut router, rx) => {
            info!(ticks = stats.ticks, orders = stats.order_updates, "Replay finished");
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, finishing session");
        }
    }

    match reader.await {
        Ok(Ok(sent)) => info!(sent, "Reader finished"),
        Ok(Err(e)) => error!(error = %e, "Reader failed"),
        Err(e) => error!(error = %e, "Reader task aborted"),
    }

    router.finish();
    let completed = router.trades().completed_trades();
    if !completed.is_empty() {
        let mut journal = TradeJournal::open(&config.journal_path())?;
        for done in completed {
            journal.append(&JournalRecord::from_trade(done, None))?;
        }
        info!(path = %journal.path().display(), trades = completed.len(), "Journal updated");
    }
    Ok(())
}

fn backtest(
    config: &AppConfig,
    dir: &Path,
    capital: Option<f64>,
    warm_start: Option<&Path>,
    journal: Option<PathBuf>,
) -> Result<()> {
    let mut backtester = Backtester::new(config.clone(), capital.unwrap_or(config.risk.initial_capital));
    if let Some(path) = warm_start {
        let candles = load_warm_start_csv(path, &config.signal.tracked_symbol)
            .context("Failed to load warm-start candles")?;
        backtester = backtester.with_warm_start(candles);
    }

    let report = backtester.run_directory(dir)?;
    let journal_path = journal.unwrap_or_else(|| config.journal_path());
    if !report.journal.is_empty() {
        report.write_journal(&journal_path)?;
    }

    let m = &report.metrics;
    info!(
        sessions = report.sessions.len(),
        trades = m.total_trades,
        wins = m.wins,
        losses = m.losses,
        scratches = m.scratches,
        win_rate = %format!("{:.1}%", m.win_rate * 100.0),
        total_pnl = %format!("{:.2}", m.total_pnl),
        final_capital = %format!("{:.2}", m.final_capital),
        max_drawdown = %format!("{:.2}%", m.max_drawdown * 100.0),
        "Backtest summary"
    );
    Ok(())
}

//! Backtesting Module
//!
//! Replays a directory of recorded session files through fresh routers:
//! - Capital carried from one session to the next
//! - Tracked index history carried forward as warm-start data
//! - Consolidated journal with running capital
//! - Win rate, profit factor, max drawdown analysis

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::broker::PaperBroker;
use crate::config::AppConfig;
use crate::persistence::{read_events, replay_files, JournalRecord, TradeJournal};
use crate::router::TickRouter;
use crate::trading::CompletedTrade;
use crate::types::{Candle, EngineEvent, Timeframe};

/// Backtest performance metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    /// Break-even trades; counted in `total_trades` but neither won nor lost
    pub scratches: usize,
    /// Win rate (0.0 to 1.0)
    pub win_rate: f64,
    pub total_pnl: f64,
    pub final_capital: f64,
    /// Gross profit / gross loss
    pub profit_factor: f64,
    /// Average P&L per trade
    pub expectancy: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    /// Largest peak-to-trough fall of capital, as a fraction of the peak
    pub max_drawdown: f64,
}

impl BacktestMetrics {
    pub fn from_trades(trades: &[CompletedTrade], initial_capital: f64) -> Self {
        if trades.is_empty() {
            return Self {
                final_capital: initial_capital,
                ..Self::default()
            };
        }

        let total_trades = trades.len();
        let wins = trades.iter().filter(|t| t.pnl > 0.0).count();
        let losses = trades.iter().filter(|t| t.pnl < 0.0).count();
        let scratches = total_trades - wins - losses;
        let gross_profit: f64 = trades.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl).sum();
        let gross_loss: f64 = trades.iter().filter(|t| t.pnl < 0.0).map(|t| t.pnl.abs()).sum();
        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else if gross_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };
        let total_pnl: f64 = trades.iter().map(|t| t.pnl).sum();

        let mut capital = initial_capital;
        let mut peak = initial_capital;
        let mut max_drawdown: f64 = 0.0;
        for t in trades {
            capital += t.pnl;
            peak = peak.max(capital);
            if peak > 0.0 {
                max_drawdown = max_drawdown.max((peak - capital) / peak);
            }
        }

        Self {
            total_trades,
            wins,
            losses,
            scratches,
            win_rate: wins as f64 / total_trades as f64,
            total_pnl,
            final_capital: initial_capital + total_pnl,
            profit_factor,
            expectancy: total_pnl / total_trades as f64,
            largest_win: trades.iter().map(|t| t.pnl).fold(0.0, f64::max),
            largest_loss: trades.iter().map(|t| t.pnl).fold(0.0, f64::min),
            max_drawdown,
        }
    }
}

/// Outcome of one replayed session file
#[derive(Debug, Clone)]
pub struct SessionResult {
    pub file: PathBuf,
    pub starting_capital: f64,
    pub trades: Vec<CompletedTrade>,
    pub pnl: f64,
    /// Completed base candles of the tracked index
    pub index_history: Vec<Candle>,
}

#[derive(Debug, Clone)]
pub struct BacktestReport {
    pub sessions: Vec<SessionResult>,
    pub journal: Vec<JournalRecord>,
    pub metrics: BacktestMetrics,
}

impl BacktestReport {
    pub fn trades(&self) -> impl Iterator<Item = &CompletedTrade> {
        self.sessions.iter().flat_map(|s| s.trades.iter())
    }

    /// Write the consolidated journal
    pub fn write_journal(&self, path: &Path) -> Result<()> {
        let mut journal = TradeJournal::open(path)?;
        for record in &self.journal {
            journal.append(record)?;
        }
        info!(path = %path.display(), rows = self.journal.len(), "Journal written");
        Ok(())
    }
}

/// Backtester
pub struct Backtester {
    config: AppConfig,
    initial_capital: f64,
    warm_start: Vec<Candle>,
}

impl Backtester {
    pub fn new(config: AppConfig, initial_capital: f64) -> Self {
        Self {
            config,
            initial_capital,
            warm_start: Vec::new(),
        }
    }

    /// Base candles of the tracked index used before the first session
    pub fn with_warm_start(mut self, candles: Vec<Candle>) -> Self {
        self.warm_start = candles;
        self
    }

    /// Replay one session file on a fresh router
    pub fn run_session(&self, path: &Path, capital: f64, warm: &[Candle]) -> Result<SessionResult> {
        let mut router = TickRouter::from_config(&self.config, Box::new(PaperBroker::new()))
            .context("Failed to build router")?;
        if !warm.is_empty() {
            router.warm_start(warm);
        }
        router.set_capital(capital);

        for event in read_events(path)? {
            match event {
                EngineEvent::Tick(raw) => {
                    router.process_raw_tick(raw);
                }
                EngineEvent::Order(raw) => router.process_raw_order_update(raw),
            }
        }
        router.finish();

        let trades = router.trades().completed_trades().to_vec();
        let pnl = trades.iter().map(|t| t.pnl).sum();
        let index_history = router
            .aggregator()
            .history(&self.config.signal.tracked_symbol, Timeframe::BASE);

        Ok(SessionResult {
            file: path.to_path_buf(),
            starting_capital: capital,
            trades,
            pnl,
            index_history,
        })
    }

    /// Replay every session file in `dir`, carrying capital forward
    pub fn run_directory(&self, dir: &Path) -> Result<BacktestReport> {
        let files = replay_files(dir)?;
        info!(dir = %dir.display(), files = files.len(), capital = self.initial_capital, "Starting backtest");

        let keep = self.config.candles.max_history.max(1) * self.config.signal.trading_timeframe.max(1) as usize;
        let mut warm = self.warm_start.clone();
        let mut capital = self.initial_capital;
        let mut sessions = Vec::new();
        let mut journal = Vec::new();

        for file in files {
            let session = self.run_session(&file, capital, &warm)?;
            for done in &session.trades {
                capital += done.pnl;
                journal.push(JournalRecord::from_trade(done, Some(capital)));
            }
            info!(
                file = %file.display(),
                trades = session.trades.len(),
                pnl = session.pnl,
                capital,
                "Session replayed"
            );

            warm.extend(session.index_history.iter().cloned());
            if warm.len() > keep {
                warm.drain(..warm.len() - keep);
            }
            sessions.push(session);
        }

        let all: Vec<CompletedTrade> = sessions.iter().flat_map(|s| s.trades.iter().cloned()).collect();
        let metrics = BacktestMetrics::from_trades(&all, self.initial_capital);
        info!(
            trades = metrics.total_trades,
            win_rate = metrics.win_rate,
            pnl = metrics.total_pnl,
            final_capital = metrics.final_capital,
            "Backtest complete"
        );

        Ok(BacktestReport {
            sessions,
            journal,
            metrics,
        })
    }
}

//! Tick Router - Orchestrates aggregator, detector and trade manager
//!
//! Per tick, in order:
//! 1. exit checks for the open trade
//! 2. breakout confirmation (tracked index only)
//! 3. base candle ingestion, cascade into higher timeframes, detector update
//! 4. intrabar touch of live candles

pub mod events;
pub use events::{run_event_loop, EventLoopStats};

use anyhow::Result;
use chrono::NaiveTime;
use tracing::{debug, info};

use crate::broker::Broker;
use crate::candles::CandleAggregator;
use crate::config::AppConfig;
use crate::signal::{ArmOutcome, SignalDetector, TickOutcome};
use crate::trading::{EntryOutcome, ExitReason, TradeManager};
use crate::types::{Candle, OrderUpdate, RawOrderUpdate, RawTick, Tick, Timeframe};

/// What one tick caused; used for reporting and tests
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    /// Completed candles in dependency order (base first, then ascending timeframe)
    pub completed: Vec<(Timeframe, Candle)>,
    pub arm: Option<ArmOutcome>,
    pub breakout: TickOutcome,
    pub entry: Option<EntryOutcome>,
    pub exit: Option<ExitReason>,
}

impl Default for TickReport {
    fn default() -> Self {
        Self {
            completed: Vec::new(),
            arm: None,
            breakout: TickOutcome::NoOp,
            entry: None,
            exit: None,
        }
    }
}

pub struct TickRouter {
    aggregator: CandleAggregator,
    detector: SignalDetector,
    trades: TradeManager,
    tracked_symbol: String,
    market_open: NaiveTime,
}

impl TickRouter {
    pub fn new(aggregator: CandleAggregator, detector: SignalDetector, trades: TradeManager) -> Self {
        let tracked_symbol = detector.config().tracked_symbol.clone();
        let market_open = aggregator.clock().market_open();
        Self {
            aggregator,
            detector,
            trades,
            tracked_symbol,
            market_open,
        }
    }

    /// Wire every component from configuration around the given broker
    pub fn from_config(config: &AppConfig, broker: Box<dyn Broker>) -> Result<Self> {
        config.validate()?;
        let clock = config.session_clock()?;
        let aggregator = CandleAggregator::new(&config.timeframes(), clock, config.candles.max_history);
        let detector = SignalDetector::new(config.detector_config(), Box::new(config.indicators()));
        let trades = TradeManager::new(
            config.trade_config()?,
            config.risk_policy(),
            broker,
            clock.utc_offset(),
        );
        Ok(Self::new(aggregator, detector, trades))
    }

    pub fn aggregator(&self) -> &CandleAggregator {
        &self.aggregator
    }

    pub fn detector(&self) -> &SignalDetector {
        &self.detector
    }

    pub fn trades(&self) -> &TradeManager {
        &self.trades
    }

    /// Seed the detector from pre-fetched base candles of the tracked index
    pub fn warm_start(&mut self, base_candles: &[Candle]) {
        self.detector.warm_start(base_candles, self.market_open);
    }

    pub fn set_capital(&mut self, capital: f64) {
        self.trades.set_capital(capital);
    }

    /// Validate and route a raw feed message; incomplete ticks are dropped
    pub fn process_raw_tick(&mut self, raw: RawTick) -> Option<TickReport> {
        let tick = Tick::from_raw(raw)?;
        Some(self.process_tick(&tick))
    }

    pub fn process_tick(&mut self, tick: &Tick) -> TickReport {
        let mut report = TickReport::default();
        let clock = *self.aggregator.clock();
        let Some(at) = clock.local_time(tick.feed_time) else {
            debug!(symbol = %tick.symbol, feed_time = tick.feed_time, "Tick time out of range");
            return report;
        };

        if self.trades.is_active() {
            report.exit = self.trades.check_exit(tick, at);
        }

        if tick.symbol == self.tracked_symbol {
            let outcome = self.detector.on_tick(tick.ltp, at, self.trades.has_open_position());
            if let TickOutcome::Fired(trigger) = &outcome {
                let quotes = self.aggregator.latest_prices();
                report.entry = Some(self.trades.on_trigger(trigger, &quotes));
            }
            report.breakout = outcome;
        }

        let bucket = clock.bucket_start(at, Timeframe::BASE);
        if let Some(base) = self.aggregator.ingest_tick(&tick.symbol, tick.ltp, tick.volume, bucket) {
            let higher = self.aggregator.cascade_completed_base_candle(&base);
            report.completed.push((Timeframe::BASE, base));
            report.completed.extend(higher);

            if tick.symbol == self.tracked_symbol {
                for (tf, candle) in &report.completed {
                    let open = self.trades.has_open_position();
                    if let Some(arm) = self.detector.ingest_candle(*tf, candle, open) {
                        report.arm = Some(arm);
                    }
                }
            }
        }

        self.aggregator.update_live_from_tick(&tick.symbol, tick.ltp, at);
        report
    }

    /// Route a raw broker update; updates without an id are dropped
    pub fn process_raw_order_update(&mut self, raw: RawOrderUpdate) {
        if let Some(update) = OrderUpdate::from_raw(raw) {
            self.process_order_update(&update);
        }
    }

    pub fn process_order_update(&mut self, update: &OrderUpdate) {
        self.trades.on_order_update(update);
    }

    /// Flush live candles at end of session
    pub fn finish(&mut self) -> Vec<Candle> {
        let flushed = self.aggregator.finalize_all();
        let snapshot = self.detector.snapshot();
        debug!(
            state = ?snapshot.state,
            bars = snapshot.bars,
            oscillator = ?snapshot.latest.and_then(|r| r.oscillator),
            up_fractal = ?snapshot.last_up_fractal.map(|f| f.price),
            down_fractal = ?snapshot.last_down_fractal.map(|f| f.price),
            "Detector at session end"
        );
        let stats = self.trades.statistics();
        info!(
            flushed = flushed.len(),
            trades = stats.trades,
            wins = stats.wins,
            losses = stats.losses,
            scratches = stats.scratches,
            pnl = stats.total_pnl,
            "Session finished"
        );
        flushed
    }
}

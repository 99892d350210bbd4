//! Signal Detector - Fractal breakout arming and tick confirmation
//!
//! Completed trading-timeframe candles of the tracked index drive a two-state
//! machine:
//! - `Inactive`: waiting for a Williams %R rejection in the SMA trend direction
//! - `AwaitingBreakout`: armed with a breakout level (latest opposite fractal)
//!   and a stop level; every index tick either cancels, fires or does nothing

pub mod fractals;
pub use fractals::{classify, Fractal, FractalHistory, FractalKind};

use chrono::{NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

use crate::candles::resample;
use crate::indicators::{IndicatorRow, Indicators};
use crate::types::{Candle, Direction, Timeframe};

/// Detector parameters
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Index symbol whose candles drive signals
    pub tracked_symbol: String,
    /// Timeframe the strategy trades on
    pub trading_timeframe: Timeframe,
    pub fractal_length: usize,
    pub fractal_capacity: usize,
    /// Minimum bars before arming is considered (SMA lookback)
    pub min_bars: usize,
    /// Oscillator level crossed upward for a long rejection
    pub up_rejection_level: f64,
    /// Oscillator level crossed downward for a short rejection
    pub down_rejection_level: f64,
    /// Oscillator level that cancels an armed signal
    pub midline: f64,
    /// Largest accepted distance between breakout and stop levels
    pub max_stop_points: f64,
    /// Retained trading-timeframe candles
    pub max_series: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            tracked_symbol: "NSE:NIFTY50-INDEX".to_string(),
            trading_timeframe: Timeframe(3),
            fractal_length: 5,
            fractal_capacity: 20,
            min_bars: 50,
            up_rejection_level: -30.0,
            down_rejection_level: -70.0,
            midline: -50.0,
            max_stop_points: 50.0,
            max_series: 1000,
        }
    }
}

/// An armed breakout waiting for price confirmation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalIntent {
    pub direction: Direction,
    pub breakout_level: f64,
    pub stop_loss_level: f64,
    /// Close time of the candle that armed the signal
    pub armed_at: NaiveDateTime,
}

impl SignalIntent {
    /// Distance between breakout and stop, in index points
    pub fn risk_points(&self) -> f64 {
        (self.breakout_level - self.stop_loss_level).abs()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BreakoutState {
    Inactive,
    AwaitingBreakout(SignalIntent),
}

/// Result of evaluating a completed trading candle
#[derive(Debug, Clone, PartialEq)]
pub enum ArmOutcome {
    Armed(SignalIntent),
    /// Stop distance exceeded the configured cap
    Rejected { direction: Direction, risk_points: f64 },
    /// No fractal available on one side
    MissingFractals(Direction),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// Oscillator crossed back through the midline
    OscillatorReversal,
    /// Price went through the stop level before the breakout
    StopLevelReached,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::OscillatorReversal => write!(f, "oscillator reversal"),
            CancelReason::StopLevelReached => write!(f, "stop level reached"),
        }
    }
}

/// Confirmed breakout handed to the trade manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryTrigger {
    pub direction: Direction,
    pub trigger_time: NaiveDateTime,
    pub breakout_level: f64,
    pub stop_loss_level: f64,
    pub index_price: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    NoOp,
    Cancelled(CancelReason),
    Fired(EntryTrigger),
}

/// Read-only view for logging and tests
#[derive(Debug, Clone)]
pub struct DetectorSnapshot {
    pub state: BreakoutState,
    pub bars: usize,
    pub latest: Option<IndicatorRow>,
    pub last_up_fractal: Option<Fractal>,
    pub last_down_fractal: Option<Fractal>,
}

pub struct SignalDetector {
    config: DetectorConfig,
    indicators: Box<dyn Indicators>,
    series: Vec<Candle>,
    rows: Vec<IndicatorRow>,
    fractals: FractalHistory,
    state: BreakoutState,
}

impl SignalDetector {
    pub fn new(config: DetectorConfig, indicators: Box<dyn Indicators>) -> Self {
        let fractals = FractalHistory::new(config.fractal_length, config.fractal_capacity);
        Self {
            config,
            indicators,
            series: Vec::new(),
            rows: Vec::new(),
            fractals,
            state: BreakoutState::Inactive,
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn state(&self) -> BreakoutState {
        self.state
    }

    pub fn series(&self) -> &[Candle] {
        &self.series
    }

    pub fn fractals(&self) -> &FractalHistory {
        &self.fractals
    }

    pub fn latest_row(&self) -> Option<&IndicatorRow> {
        self.rows.last()
    }

    /// Seed the trading series from historical base candles of the tracked index.
    ///
    /// Fractals are rebuilt in batch and the state machine starts inactive.
    pub fn warm_start(&mut self, base_candles: &[Candle], market_open: NaiveTime) {
        let tracked: Vec<Candle> = base_candles
            .iter()
            .filter(|c| c.symbol == self.config.tracked_symbol)
            .cloned()
            .collect();
        let series = if self.config.trading_timeframe.is_base() {
            tracked
        } else {
            resample(&tracked, self.config.trading_timeframe, market_open)
        };

        self.rows = (1..=series.len())
            .map(|end| self.indicators.evaluate(&series[..end]))
            .collect();
        self.fractals.rebuild(&series);
        self.series = series;
        self.state = BreakoutState::Inactive;
        self.trim();

        info!(
            symbol = %self.config.tracked_symbol,
            timeframe = %self.config.trading_timeframe,
            bars = self.series.len(),
            "Signal detector warm-started"
        );
    }

    /// Append a completed candle and evaluate arming.
    ///
    /// Candles of other symbols or timeframes, and candles not newer than the
    /// last one, are ignored.
    pub fn ingest_candle(
        &mut self,
        timeframe: Timeframe,
        candle: &Candle,
        position_open: bool,
    ) -> Option<ArmOutcome> {
        if timeframe != self.config.trading_timeframe || candle.symbol != self.config.tracked_symbol {
            return None;
        }
        if let Some(last) = self.series.last() {
            if candle.timestamp <= last.timestamp {
                debug!(ts = %candle.timestamp, "Ignoring stale trading candle");
                return None;
            }
        }

        self.series.push(candle.clone());
        let row = self.indicators.evaluate(&self.series);
        self.rows.push(row);
        if let Some(fractal) = self.fractals.observe_latest(&self.series) {
            debug!(kind = ?fractal.kind, price = fractal.price, ts = %fractal.timestamp, "Fractal confirmed");
        }
        self.trim();

        if position_open || matches!(self.state, BreakoutState::AwaitingBreakout(_)) {
            return None;
        }
        let direction = self.rejection(candle.close)?;
        let outcome = self.prepare(direction, candle.timestamp + timeframe.duration());
        match &outcome {
            ArmOutcome::Armed(intent) => {
                self.state = BreakoutState::AwaitingBreakout(*intent);
                info!(
                    direction = %intent.direction,
                    breakout = intent.breakout_level,
                    stop = intent.stop_loss_level,
                    "Breakout armed"
                );
            }
            ArmOutcome::Rejected { direction, risk_points } => {
                info!(%direction, risk_points, cap = self.config.max_stop_points, "Signal rejected: stop too wide");
            }
            ArmOutcome::MissingFractals(direction) => {
                debug!(%direction, "Signal skipped: no fractal levels");
            }
        }
        Some(outcome)
    }

    /// Direction of an oscillator rejection aligned with the SMA trend
    fn rejection(&self, close: f64) -> Option<Direction> {
        if self.series.len() < self.config.min_bars || self.rows.len() < 2 {
            return None;
        }
        let last = self.rows[self.rows.len() - 1];
        let prev = self.rows[self.rows.len() - 2];
        let (osc, prev_osc, ma) = (last.oscillator?, prev.oscillator?, last.moving_average?);

        if close > ma && prev_osc <= self.config.up_rejection_level && osc > self.config.up_rejection_level {
            Some(Direction::Long)
        } else if close < ma && prev_osc >= self.config.down_rejection_level && osc < self.config.down_rejection_level {
            Some(Direction::Short)
        } else {
            None
        }
    }

    fn prepare(&self, direction: Direction, armed_at: NaiveDateTime) -> ArmOutcome {
        let (up, down) = match (
            self.fractals.latest(FractalKind::Up),
            self.fractals.latest(FractalKind::Down),
        ) {
            (Some(up), Some(down)) => (up.price, down.price),
            _ => return ArmOutcome::MissingFractals(direction),
        };
        let (breakout_level, stop_loss_level) = match direction {
            Direction::Long => (up, down),
            Direction::Short => (down, up),
        };
        let intent = SignalIntent {
            direction,
            breakout_level,
            stop_loss_level,
            armed_at,
        };
        if intent.risk_points() > self.config.max_stop_points {
            return ArmOutcome::Rejected {
                direction,
                risk_points: intent.risk_points(),
            };
        }
        ArmOutcome::Armed(intent)
    }

    /// Evaluate an index tick against the armed signal.
    ///
    /// Checks run in order: oscillator midline, stop level, breakout level.
    pub fn on_tick(&mut self, price: f64, at: NaiveDateTime, position_open: bool) -> TickOutcome {
        if position_open {
            return TickOutcome::NoOp;
        }
        let BreakoutState::AwaitingBreakout(intent) = self.state else {
            return TickOutcome::NoOp;
        };

        let oscillator = self.rows.last().and_then(|r| r.oscillator);
        let reversed = match (intent.direction, oscillator) {
            (Direction::Long, Some(osc)) => osc < self.config.midline,
            (Direction::Short, Some(osc)) => osc > self.config.midline,
            _ => false,
        };
        if reversed {
            return self.cancel(CancelReason::OscillatorReversal);
        }

        let (stopped, broke_out) = match intent.direction {
            Direction::Long => (price < intent.stop_loss_level, price > intent.breakout_level),
            Direction::Short => (price > intent.stop_loss_level, price < intent.breakout_level),
        };
        if stopped {
            return self.cancel(CancelReason::StopLevelReached);
        }
        if !broke_out {
            return TickOutcome::NoOp;
        }

        self.state = BreakoutState::Inactive;
        info!(direction = %intent.direction, price, level = intent.breakout_level, "Breakout confirmed");
        TickOutcome::Fired(EntryTrigger {
            direction: intent.direction,
            trigger_time: at,
            breakout_level: intent.breakout_level,
            stop_loss_level: intent.stop_loss_level,
            index_price: price,
        })
    }

    fn cancel(&mut self, reason: CancelReason) -> TickOutcome {
        self.state = BreakoutState::Inactive;
        info!(%reason, "Armed signal cancelled");
        TickOutcome::Cancelled(reason)
    }

    pub fn snapshot(&self) -> DetectorSnapshot {
        DetectorSnapshot {
            state: self.state,
            bars: self.series.len(),
            latest: self.latest_row().copied(),
            last_up_fractal: self.fractals.latest(FractalKind::Up).copied(),
            last_down_fractal: self.fractals.latest(FractalKind::Down).copied(),
        }
    }

    /// Bound memory; indicators only look back a fixed window
    fn trim(&mut self) {
        let cap = self.config.max_series.max(self.config.min_bars + 1);
        if self.series.len() > cap * 2 {
            let excess = self.series.len() - cap;
            self.series.drain(..excess);
            self.rows.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    /// Indicator stub replaying scripted rows by series length
    struct Scripted(Vec<IndicatorRow>);

    impl Indicators for Scripted {
        fn evaluate(&self, series: &[Candle]) -> IndicatorRow {
            self.0.get(series.len() - 1).copied().unwrap_or_default()
        }
    }

    fn ts(i: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 12, 3).unwrap().and_hms_opt(9, 15, 0).unwrap()
            + chrono::Duration::minutes(3 * i)
    }

    fn candle(i: i64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            symbol: "IDX".into(),
            timestamp: ts(i),
            open: close,
            high,
            low,
            close,
            volume: 0.0,
        }
    }

    fn row(osc: f64, ma: f64) -> IndicatorRow {
        IndicatorRow {
            oscillator: Some(osc),
            moving_average: Some(ma),
            trend_overlay: None,
        }
    }

    fn config() -> DetectorConfig {
        DetectorConfig {
            tracked_symbol: "IDX".into(),
            min_bars: 5,
            ..DetectorConfig::default()
        }
    }

    /// Up fractal at 100 (bar 2), down fractal at 60 (bar 4), long rejection on bar 7
    fn long_setup(max_stop: f64) -> (SignalDetector, Option<ArmOutcome>) {
        let bars = vec![
            candle(0, 90.0, 80.0, 85.0),
            candle(1, 92.0, 82.0, 90.0),
            candle(2, 100.0, 85.0, 95.0),
            candle(3, 95.0, 75.0, 80.0),
            candle(4, 88.0, 60.0, 70.0),
            candle(5, 89.0, 66.0, 80.0),
            candle(6, 91.0, 68.0, 85.0),
            candle(7, 93.0, 70.0, 90.0),
        ];
        let mut rows = vec![row(-60.0, 50.0); 7];
        rows.push(row(-20.0, 50.0));
        let mut detector = SignalDetector::new(
            DetectorConfig { max_stop_points: max_stop, ..config() },
            Box::new(Scripted(rows)),
        );
        let mut last = None;
        for c in &bars {
            last = detector.ingest_candle(Timeframe(3), c, false);
        }
        (detector, last)
    }

    #[test]
    fn test_arms_long_on_rejection() {
        let (detector, outcome) = long_setup(50.0);
        let intent = match outcome {
            Some(ArmOutcome::Armed(intent)) => intent,
            other => panic!("expected armed, got {:?}", other),
        };
        assert_eq!(intent.direction, Direction::Long);
        assert_eq!(intent.breakout_level, 100.0);
        assert_eq!(intent.stop_loss_level, 60.0);
        assert_eq!(intent.armed_at, ts(8));
        assert!(matches!(detector.state(), BreakoutState::AwaitingBreakout(_)));
    }

    #[test]
    fn test_rejects_wide_stop() {
        let (detector, outcome) = long_setup(30.0);
        assert!(matches!(outcome, Some(ArmOutcome::Rejected { direction: Direction::Long, .. })));
        assert_eq!(detector.state(), BreakoutState::Inactive);
    }

    #[test]
    fn test_fires_on_breakout() {
        let (mut detector, _) = long_setup(50.0);
        assert_eq!(detector.on_tick(99.0, ts(8), false), TickOutcome::NoOp);
        assert_eq!(detector.on_tick(100.0, ts(8), false), TickOutcome::NoOp);
        match detector.on_tick(100.5, ts(8), false) {
            TickOutcome::Fired(trigger) => {
                assert_eq!(trigger.direction, Direction::Long);
                assert_eq!(trigger.index_price, 100.5);
                assert_eq!(trigger.stop_loss_level, 60.0);
            }
            other => panic!("expected fire, got {:?}", other),
        }
        assert_eq!(detector.state(), BreakoutState::Inactive);
    }

    #[test]
    fn test_cancels_on_stop_level() {
        let (mut detector, _) = long_setup(50.0);
        // Touching the level is not a breach
        assert_eq!(detector.on_tick(60.0, ts(8), false), TickOutcome::NoOp);
        assert!(matches!(detector.state(), BreakoutState::AwaitingBreakout(_)));
        assert_eq!(
            detector.on_tick(59.9, ts(8), false),
            TickOutcome::Cancelled(CancelReason::StopLevelReached)
        );
        assert_eq!(detector.on_tick(200.0, ts(8), false), TickOutcome::NoOp);
    }

    #[test]
    fn test_cancels_on_midline_reversal() {
        let bars: Vec<Candle> = (0..9).map(|i| candle(i, 90.0, 80.0, 85.0)).collect();
        let mut rows = vec![row(-60.0, 50.0); 7];
        rows.push(row(-20.0, 50.0));
        rows.push(row(-55.0, 50.0));
        let mut detector = SignalDetector::new(config(), Box::new(Scripted(rows)));
        // Flat bars give no fractals; arm directly
        for c in &bars[..8] {
            detector.ingest_candle(Timeframe(3), c, false);
        }
        detector.state = BreakoutState::AwaitingBreakout(SignalIntent {
            direction: Direction::Long,
            breakout_level: 100.0,
            stop_loss_level: 60.0,
            armed_at: ts(8),
        });
        detector.ingest_candle(Timeframe(3), &bars[8], false);
        assert_eq!(
            detector.on_tick(150.0, ts(9), false),
            TickOutcome::Cancelled(CancelReason::OscillatorReversal)
        );
    }

    /// Mirror image of `long_setup`: up fractal at 100 (bar 4), down fractal at
    /// 60 (bar 2), short rejection on bar 7 below the average
    fn short_setup(extra_rows: &[IndicatorRow]) -> SignalDetector {
        let mirror = |i: i64, high: f64, low: f64, close: f64| candle(i, 160.0 - low, 160.0 - high, 160.0 - close);
        let bars = vec![
            mirror(0, 90.0, 80.0, 85.0),
            mirror(1, 92.0, 82.0, 90.0),
            mirror(2, 100.0, 85.0, 95.0),
            mirror(3, 95.0, 75.0, 80.0),
            mirror(4, 88.0, 60.0, 70.0),
            mirror(5, 89.0, 66.0, 80.0),
            mirror(6, 91.0, 68.0, 85.0),
            mirror(7, 93.0, 70.0, 90.0),
        ];
        let mut rows = vec![row(-60.0, 100.0); 7];
        rows.push(row(-80.0, 100.0));
        rows.extend_from_slice(extra_rows);
        let mut detector = SignalDetector::new(config(), Box::new(Scripted(rows)));
        let mut last = None;
        for c in &bars {
            last = detector.ingest_candle(Timeframe(3), c, false);
        }
        assert!(matches!(last, Some(ArmOutcome::Armed(_))), "got {:?}", last);
        detector
    }

    #[test]
    fn test_arms_short_on_rejection() {
        let detector = short_setup(&[]);
        let BreakoutState::AwaitingBreakout(intent) = detector.state() else {
            panic!("expected armed short");
        };
        assert_eq!(intent.direction, Direction::Short);
        assert_eq!(intent.breakout_level, 60.0);
        assert_eq!(intent.stop_loss_level, 100.0);
        assert_eq!(intent.risk_points(), 40.0);
    }

    #[test]
    fn test_fires_short_below_breakout() {
        let mut detector = short_setup(&[]);
        assert_eq!(detector.on_tick(61.0, ts(8), false), TickOutcome::NoOp);
        assert_eq!(detector.on_tick(60.0, ts(8), false), TickOutcome::NoOp);
        match detector.on_tick(59.5, ts(8), false) {
            TickOutcome::Fired(trigger) => {
                assert_eq!(trigger.direction, Direction::Short);
                assert_eq!(trigger.breakout_level, 60.0);
                assert_eq!(trigger.stop_loss_level, 100.0);
            }
            other => panic!("expected fire, got {:?}", other),
        }
        assert_eq!(detector.state(), BreakoutState::Inactive);
    }

    #[test]
    fn test_cancels_short_on_stop_level() {
        let mut detector = short_setup(&[]);
        assert_eq!(detector.on_tick(100.0, ts(8), false), TickOutcome::NoOp);
        assert_eq!(
            detector.on_tick(100.1, ts(8), false),
            TickOutcome::Cancelled(CancelReason::StopLevelReached)
        );
        assert_eq!(detector.on_tick(50.0, ts(8), false), TickOutcome::NoOp);
    }

    #[test]
    fn test_cancels_short_on_midline_reversal() {
        let mut detector = short_setup(&[row(-45.0, 100.0)]);
        detector.ingest_candle(Timeframe(3), &candle(8, 90.0, 80.0, 85.0), false);
        assert_eq!(detector.latest_row().and_then(|r| r.oscillator), Some(-45.0));
        // Oscillator check runs before the price checks
        assert_eq!(
            detector.on_tick(50.0, ts(9), false),
            TickOutcome::Cancelled(CancelReason::OscillatorReversal)
        );
    }

    #[test]
    fn test_snapshot_reports_state_and_fractals() {
        let (detector, _) = long_setup(50.0);
        let snap = detector.snapshot();
        assert!(matches!(snap.state, BreakoutState::AwaitingBreakout(_)));
        assert_eq!(snap.bars, 8);
        assert_eq!(snap.latest.and_then(|r| r.oscillator), Some(-20.0));
        assert_eq!(snap.last_up_fractal.map(|f| f.price), Some(100.0));
        assert_eq!(snap.last_down_fractal.map(|f| f.price), Some(60.0));
    }

    #[test]
    fn test_open_position_blocks_arming_and_firing() {
        let (mut detector, _) = long_setup(50.0);
        assert_eq!(detector.on_tick(150.0, ts(8), true), TickOutcome::NoOp);
        assert!(matches!(detector.state(), BreakoutState::AwaitingBreakout(_)));
    }

    #[test]
    fn test_ignores_other_timeframes_and_stale_candles() {
        let mut detector = SignalDetector::new(config(), Box::new(Scripted(vec![])));
        assert!(detector.ingest_candle(Timeframe(1), &candle(0, 1.0, 0.5, 0.8), false).is_none());
        assert!(detector.series().is_empty());
        detector.ingest_candle(Timeframe(3), &candle(1, 1.0, 0.5, 0.8), false);
        detector.ingest_candle(Timeframe(3), &candle(1, 1.0, 0.5, 0.8), false);
        detector.ingest_candle(Timeframe(3), &candle(0, 1.0, 0.5, 0.8), false);
        assert_eq!(detector.series().len(), 1);
    }

    #[test]
    fn test_missing_fractals() {
        let bars: Vec<Candle> = (0..8).map(|i| candle(i, 90.0, 80.0, 85.0)).collect();
        let mut rows = vec![row(-60.0, 50.0); 7];
        rows.push(row(-20.0, 50.0));
        let mut detector = SignalDetector::new(config(), Box::new(Scripted(rows)));
        let mut last = None;
        for c in &bars {
            last = detector.ingest_candle(Timeframe(3), c, false);
        }
        assert_eq!(last, Some(ArmOutcome::MissingFractals(Direction::Long)));
    }
}

//! Candle Aggregator - Builds OHLCV candles from the tick stream
//!
//! Ticks build one-minute base candles per symbol. Completed base candles
//! cascade into every configured higher timeframe, so a higher bar is always
//! the fold of its constituent base bars. All buckets are anchored at the
//! daily market open.

use chrono::{FixedOffset, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::debug;

use crate::types::{Candle, Timeframe};

/// Converts feed timestamps to exchange-local time and aligns buckets
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    market_open: NaiveTime,
    utc_offset: FixedOffset,
}

impl SessionClock {
    pub fn new(market_open: NaiveTime, utc_offset: FixedOffset) -> Self {
        Self {
            market_open,
            utc_offset,
        }
    }

    pub fn market_open(&self) -> NaiveTime {
        self.market_open
    }

    pub fn utc_offset(&self) -> FixedOffset {
        self.utc_offset
    }

    /// Exchange-local wall time for an epoch-seconds feed timestamp
    pub fn local_time(&self, epoch_secs: i64) -> Option<NaiveDateTime> {
        self.utc_offset
            .timestamp_opt(epoch_secs, 0)
            .single()
            .map(|dt| dt.naive_local())
    }

    pub fn bucket_start(&self, ts: NaiveDateTime, timeframe: Timeframe) -> NaiveDateTime {
        bucket_start(ts, timeframe, self.market_open)
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self {
            market_open: NaiveTime::from_hms_opt(9, 15, 0).unwrap_or_default(),
            // IST
            utc_offset: FixedOffset::east_opt(330 * 60).unwrap_or_else(|| Utc.fix()),
        }
    }
}

/// Start of the bucket containing `ts`, anchored at the day's market open.
/// Pre-open timestamps snap to the open.
pub fn bucket_start(ts: NaiveDateTime, timeframe: Timeframe, market_open: NaiveTime) -> NaiveDateTime {
    let open = ts.date().and_time(market_open);
    if ts < open {
        return open;
    }
    let width = i64::from(timeframe.minutes().max(1)) * 60;
    let elapsed = (ts - open).num_seconds();
    open + chrono::Duration::seconds((elapsed / width) * width)
}

/// In-progress base candle for one symbol
#[derive(Debug, Clone, PartialEq)]
pub struct PartialCandle {
    pub bucket_start: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Cumulative day volume when the bucket opened
    pub volume_at_bucket_start: f64,
    /// Latest cumulative day volume
    pub volume_now: f64,
}

impl PartialCandle {
    fn new(bucket_start: NaiveDateTime, price: f64, volume: f64) -> Self {
        Self {
            bucket_start,
            open: price,
            high: price,
            low: price,
            close: price,
            volume_at_bucket_start: volume,
            volume_now: volume,
        }
    }

    fn update(&mut self, price: f64, volume: f64) {
        self.touch(price);
        self.volume_now = volume;
    }

    fn touch(&mut self, price: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
    }

    /// Volume is the delta since the bucket opened, never cumulative
    pub fn finalize(&self, symbol: &str) -> Candle {
        Candle {
            symbol: symbol.to_string(),
            timestamp: self.bucket_start,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: (self.volume_now - self.volume_at_bucket_start).max(0.0),
        }
    }
}

/// Multi-timeframe aggregator keyed by (symbol, timeframe)
pub struct CandleAggregator {
    clock: SessionClock,
    /// Higher timeframes, ascending
    higher: Vec<Timeframe>,
    /// In-progress base candle per symbol
    base: HashMap<String, PartialCandle>,
    /// In-progress resampled candle per (symbol, higher timeframe)
    live: HashMap<(String, Timeframe), Candle>,
    /// Completed candles per (symbol, timeframe)
    history: HashMap<(String, Timeframe), VecDeque<Candle>>,
    /// Maximum candles to keep in history
    max_history: usize,
}

impl CandleAggregator {
    pub fn new(timeframes: &[Timeframe], clock: SessionClock, max_history: usize) -> Self {
        let mut higher: Vec<Timeframe> = timeframes
            .iter()
            .copied()
            .filter(|tf| tf.minutes() > 1)
            .collect();
        higher.sort();
        higher.dedup();
        Self {
            clock,
            higher,
            base: HashMap::new(),
            live: HashMap::new(),
            history: HashMap::new(),
            max_history,
        }
    }

    pub fn clock(&self) -> &SessionClock {
        &self.clock
    }

    /// Feed one tick into the symbol's base candle.
    ///
    /// Returns the finished base candle when the tick opens a later bucket.
    pub fn ingest_tick(
        &mut self,
        symbol: &str,
        price: f64,
        volume: f64,
        bucket_start: NaiveDateTime,
    ) -> Option<Candle> {
        match self.base.get_mut(symbol) {
            None => {
                self.base.insert(
                    symbol.to_string(),
                    PartialCandle::new(bucket_start, price, volume),
                );
                None
            }
            Some(partial) if bucket_start > partial.bucket_start => {
                let completed = partial.finalize(symbol);
                *partial = PartialCandle::new(bucket_start, price, volume);
                self.add_to_history((symbol.to_string(), Timeframe::BASE), completed.clone());
                debug!(symbol, ts = %completed.timestamp, close = completed.close, "1m candle closed");
                Some(completed)
            }
            Some(partial) => {
                partial.update(price, volume);
                None
            }
        }
    }

    /// Extend in-progress candles with an intrabar price without closing them.
    ///
    /// Only candles whose bucket contains `at` are touched.
    pub fn update_live_from_tick(&mut self, symbol: &str, price: f64, at: NaiveDateTime) {
        if let Some(partial) = self.base.get_mut(symbol) {
            if self.clock.bucket_start(at, Timeframe::BASE) == partial.bucket_start {
                partial.touch(price);
            }
        }

        for tf in &self.higher {
            if let Some(live) = self.live.get_mut(&(symbol.to_string(), *tf)) {
                if self.clock.bucket_start(at, *tf) == live.timestamp {
                    live.touch(price);
                }
            }
        }
    }

    /// Fold a completed base candle into every higher timeframe.
    ///
    /// Returns each higher timeframe candle that closed because of it, in
    /// ascending timeframe order.
    pub fn cascade_completed_base_candle(&mut self, candle: &Candle) -> BTreeMap<Timeframe, Candle> {
        let mut completed = BTreeMap::new();
        let base_end = candle.timestamp + Timeframe::BASE.duration();

        for tf in self.higher.clone() {
            let key = (candle.symbol.clone(), tf);
            let bucket = self.clock.bucket_start(candle.timestamp, tf);

            match self.live.remove(&key) {
                None => {
                    self.live.insert(key.clone(), seed(candle, bucket));
                }
                Some(previous) if bucket > previous.timestamp => {
                    self.add_to_history(key.clone(), previous.clone());
                    completed.insert(tf, previous);
                    self.live.insert(key.clone(), seed(candle, bucket));
                }
                Some(mut current) => {
                    current.merge(candle);
                    self.live.insert(key.clone(), current);
                }
            }

            // Last base bucket of the higher bucket closes it in the same pass
            if base_end >= bucket + tf.duration() {
                if let Some(finished) = self.live.remove(&key) {
                    self.add_to_history(key, finished.clone());
                    completed.insert(tf, finished);
                }
            }
        }

        for (tf, c) in &completed {
            debug!(symbol = %c.symbol, timeframe = %tf, ts = %c.timestamp, close = c.close, "Higher timeframe candle closed");
        }
        completed
    }

    /// Current in-progress candle for a symbol/timeframe
    pub fn partial(&self, symbol: &str, timeframe: Timeframe) -> Option<Candle> {
        if timeframe.is_base() {
            self.base.get(symbol).map(|p| p.finalize(symbol))
        } else {
            self.live.get(&(symbol.to_string(), timeframe)).cloned()
        }
    }

    /// Raw base partial candle (volume snapshots included)
    pub fn base_partial(&self, symbol: &str) -> Option<&PartialCandle> {
        self.base.get(symbol)
    }

    /// Completed candles for a symbol/timeframe, oldest first
    pub fn history(&self, symbol: &str, timeframe: Timeframe) -> Vec<Candle> {
        self.history
            .get(&(symbol.to_string(), timeframe))
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Last price of every symbol with a live base candle, sorted by symbol
    pub fn latest_prices(&self) -> Vec<(String, f64)> {
        let mut prices: Vec<(String, f64)> = self
            .base
            .iter()
            .map(|(symbol, p)| (symbol.clone(), p.close))
            .collect();
        prices.sort_by(|a, b| a.0.cmp(&b.0));
        prices
    }

    /// Force finalize every in-progress candle (end of replay).
    ///
    /// Open base candles are cascaded first so flushed higher timeframe
    /// candles include them.
    pub fn finalize_all(&mut self) -> Vec<Candle> {
        let mut completed = Vec::new();

        let mut base: Vec<(String, PartialCandle)> = self.base.drain().collect();
        base.sort_by(|a, b| a.0.cmp(&b.0));
        for (symbol, partial) in base {
            let candle = partial.finalize(&symbol);
            self.add_to_history((symbol, Timeframe::BASE), candle.clone());
            let higher = self.cascade_completed_base_candle(&candle);
            completed.push(candle);
            completed.extend(higher.into_values());
        }

        let live: Vec<((String, Timeframe), Candle)> = self.live.drain().collect();
        for (key, candle) in live {
            self.add_to_history(key, candle.clone());
            completed.push(candle);
        }

        completed.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.symbol.cmp(&b.symbol)));
        completed
    }

    fn add_to_history(&mut self, key: (String, Timeframe), candle: Candle) {
        let history = self.history.entry(key).or_default();
        history.push_back(candle);
        while history.len() > self.max_history {
            history.pop_front();
        }
    }
}

fn seed(candle: &Candle, bucket: NaiveDateTime) -> Candle {
    Candle {
        timestamp: bucket,
        ..candle.clone()
    }
}

/// Fold a base series into a higher timeframe using the same bucket alignment
pub fn resample(candles: &[Candle], timeframe: Timeframe, market_open: NaiveTime) -> Vec<Candle> {
    let mut out: Vec<Candle> = Vec::new();
    for candle in candles {
        let bucket = bucket_start(candle.timestamp, timeframe, market_open);
        match out.last_mut() {
            Some(last) if last.timestamp == bucket => last.merge(candle),
            _ => out.push(seed(candle, bucket)),
        }
    }
    out
}

//! Fractal detection over a centered candle window
//!
//! A fractal is confirmed only once `half_width` later candles exist, so the
//! incremental pass re-examines the window ending at the latest bar while the
//! batch pass scans every full window of a historical series. Both push the
//! same fractals in the same order.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::types::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FractalKind {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fractal {
    pub timestamp: NaiveDateTime,
    pub price: f64,
    pub kind: FractalKind,
}

/// Classify the center candle of an odd-length window.
///
/// Up requires a strict maximum high, down a strict minimum low. A bar that
/// is both (an outside bar) is ambiguous and yields nothing.
pub fn classify(window: &[Candle]) -> Option<Fractal> {
    if window.is_empty() || window.len() % 2 == 0 {
        return None;
    }
    let mid = window.len() / 2;
    let center = &window[mid];
    let others = window
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != mid)
        .map(|(_, c)| c);

    let mut is_up = true;
    let mut is_down = true;
    for c in others {
        is_up &= c.high < center.high;
        is_down &= c.low > center.low;
    }

    match (is_up, is_down) {
        (true, false) => Some(Fractal {
            timestamp: center.timestamp,
            price: center.high,
            kind: FractalKind::Up,
        }),
        (false, true) => Some(Fractal {
            timestamp: center.timestamp,
            price: center.low,
            kind: FractalKind::Down,
        }),
        _ => None,
    }
}

/// Bounded per-direction fractal history for one timeframe
#[derive(Debug, Clone)]
pub struct FractalHistory {
    up: VecDeque<Fractal>,
    down: VecDeque<Fractal>,
    capacity: usize,
    half_width: usize,
}

impl FractalHistory {
    /// `fractal_length` is the full window (2m+1); even lengths round up
    pub fn new(fractal_length: usize, capacity: usize) -> Self {
        Self {
            up: VecDeque::with_capacity(capacity),
            down: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            half_width: fractal_length / 2,
        }
    }

    pub fn window_len(&self) -> usize {
        self.half_width * 2 + 1
    }

    /// Batch pass over a fully available series. Clears previous state.
    pub fn rebuild(&mut self, series: &[Candle]) {
        self.up.clear();
        self.down.clear();
        let n = self.window_len();
        if series.len() < n {
            return;
        }
        for start in 0..=(series.len() - n) {
            self.evaluate(&series[start..start + n]);
        }
    }

    /// Incremental pass after one candle was appended to `series`
    pub fn observe_latest(&mut self, series: &[Candle]) -> Option<Fractal> {
        let n = self.window_len();
        if series.len() < n {
            return None;
        }
        self.evaluate(&series[series.len() - n..])
    }

    fn evaluate(&mut self, window: &[Candle]) -> Option<Fractal> {
        let center_ts = window[window.len() / 2].timestamp;
        if self.contains(center_ts) {
            return None;
        }
        let fractal = classify(window)?;
        let queue = match fractal.kind {
            FractalKind::Up => &mut self.up,
            FractalKind::Down => &mut self.down,
        };
        queue.push_back(fractal);
        while queue.len() > self.capacity {
            queue.pop_front();
        }
        Some(fractal)
    }

    pub fn contains(&self, timestamp: NaiveDateTime) -> bool {
        self.up.iter().chain(self.down.iter()).any(|f| f.timestamp == timestamp)
    }

    /// Most recent fractal of a direction
    pub fn latest(&self, kind: FractalKind) -> Option<&Fractal> {
        match kind {
            FractalKind::Up => self.up.back(),
            FractalKind::Down => self.down.back(),
        }
    }

    pub fn up(&self) -> impl Iterator<Item = &Fractal> {
        self.up.iter()
    }

    pub fn down(&self) -> impl Iterator<Item = &Fractal> {
        self.down.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bar(i: i64, high: f64, low: f64) -> Candle {
        Candle {
            symbol: "IDX".into(),
            timestamp: NaiveDate::from_ymd_opt(2024, 12, 3)
                .unwrap()
                .and_hms_opt(9, 15, 0)
                .unwrap()
                + chrono::Duration::minutes(3 * i),
            open: (high + low) / 2.0,
            high,
            low,
            close: (high + low) / 2.0,
            volume: 0.0,
        }
    }

    #[test]
    fn test_classify_up_and_down() {
        let up = [bar(0, 10.0, 5.0), bar(1, 11.0, 6.0), bar(2, 15.0, 7.0), bar(3, 12.0, 6.5), bar(4, 11.0, 6.0)];
        let f = classify(&up).unwrap();
        assert_eq!(f.kind, FractalKind::Up);
        assert_eq!(f.price, 15.0);

        let down = [bar(0, 10.0, 5.0), bar(1, 9.0, 4.0), bar(2, 8.0, 2.0), bar(3, 9.0, 3.0), bar(4, 10.0, 4.5)];
        let f = classify(&down).unwrap();
        assert_eq!(f.kind, FractalKind::Down);
        assert_eq!(f.price, 2.0);
    }

    #[test]
    fn test_classify_requires_strict_extreme() {
        // Tied high is not a fractal
        let tied = [bar(0, 10.0, 5.0), bar(1, 15.0, 6.0), bar(2, 15.0, 7.0), bar(3, 12.0, 6.5), bar(4, 11.0, 6.0)];
        assert!(classify(&tied).is_none());

        // Outside bar is both extremes and therefore ambiguous
        let outside = [bar(0, 10.0, 5.0), bar(1, 11.0, 6.0), bar(2, 20.0, 1.0), bar(3, 12.0, 6.5), bar(4, 11.0, 6.0)];
        assert!(classify(&outside).is_none());
    }

    #[test]
    fn test_incremental_waits_for_confirmation() {
        let mut history = FractalHistory::new(5, 20);
        let bars = vec![bar(0, 10.0, 5.0), bar(1, 11.0, 6.0), bar(2, 15.0, 7.0), bar(3, 12.0, 6.5)];
        for i in 1..=bars.len() {
            assert!(history.observe_latest(&bars[..i]).is_none());
        }
        let mut bars = bars;
        bars.push(bar(4, 11.0, 6.0));
        let f = history.observe_latest(&bars).unwrap();
        assert_eq!(f.timestamp, bars[2].timestamp);
        assert!(history.contains(bars[2].timestamp));
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut history = FractalHistory::new(3, 2);
        // Zig-zag produces an up fractal at every odd index
        let series: Vec<Candle> = (0..11)
            .map(|i| if i % 2 == 1 { bar(i, 20.0 + i as f64, 10.0) } else { bar(i, 15.0, 12.0 + i as f64 * 0.01) })
            .collect();
        history.rebuild(&series);
        let ups: Vec<&Fractal> = history.up().collect();
        assert_eq!(ups.len(), 2);
        assert_eq!(ups[1].timestamp, series[9].timestamp);
        assert_eq!(history.latest(FractalKind::Up).unwrap().price, 29.0);
    }

    #[test]
    fn test_batch_equals_incremental() {
        let highs = [5.0, 7.0, 6.0, 9.0, 4.0, 3.0, 8.0, 8.5, 2.0, 6.0, 7.0, 1.0, 5.0];
        let lows = [2.0, 3.0, 1.0, 4.0, 0.5, 1.5, 3.0, 2.0, 0.2, 1.0, 4.0, 0.1, 2.0];
        let series: Vec<Candle> = highs
            .iter()
            .zip(lows.iter())
            .enumerate()
            .map(|(i, (h, l))| bar(i as i64, *h, *l))
            .collect();

        let mut batch = FractalHistory::new(5, 20);
        batch.rebuild(&series);

        let mut incremental = FractalHistory::new(5, 20);
        for i in 1..=series.len() {
            incremental.observe_latest(&series[..i]);
        }

        assert_eq!(batch.up().collect::<Vec<_>>(), incremental.up().collect::<Vec<_>>());
        assert_eq!(batch.down().collect::<Vec<_>>(), incremental.down().collect::<Vec<_>>());
    }
}

//! Indicator Engine - Technical indicators over a candle window
//!
//! The signal detector treats indicators as a pure function of the series:
//! - Williams %R (oscillator)
//! - SMA of closes (trend filter)
//! - Supertrend with Wilder ATR (trend overlay, reporting only)

use crate::types::Candle;

/// Indicator values attached to one candle of the trading series
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IndicatorRow {
    pub oscillator: Option<f64>,
    pub moving_average: Option<f64>,
    pub trend_overlay: Option<f64>,
}

/// Pure indicator contract: values for the last candle of `series`
pub trait Indicators: Send {
    fn evaluate(&self, series: &[Candle]) -> IndicatorRow;
}

/// Williams %R / SMA / Supertrend set used by the breakout strategy
#[derive(Debug, Clone)]
pub struct StandardIndicators {
    /// Williams %R lookback
    pub willr_length: usize,
    /// SMA lookback
    pub sma_length: usize,
    /// Supertrend ATR period
    pub supertrend_length: usize,
    /// Supertrend band multiplier
    pub supertrend_multiplier: f64,
}

impl Default for StandardIndicators {
    fn default() -> Self {
        Self {
            willr_length: 20,
            sma_length: 50,
            supertrend_length: 10,
            supertrend_multiplier: 3.0,
        }
    }
}

impl Indicators for StandardIndicators {
    fn evaluate(&self, series: &[Candle]) -> IndicatorRow {
        IndicatorRow {
            oscillator: williams_r(series, self.willr_length),
            moving_average: sma(series, self.sma_length),
            trend_overlay: supertrend(series, self.supertrend_length, self.supertrend_multiplier),
        }
    }
}

/// Williams %R in [-100, 0]; `None` until `period` candles exist or on a flat range
pub fn williams_r(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period {
        return None;
    }
    let window = &candles[candles.len() - period..];
    let highest = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let lowest = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    let range = highest - lowest;
    if range <= 0.0 {
        return None;
    }
    let close = window[window.len() - 1].close;
    Some((highest - close) / range * -100.0)
}

/// Simple moving average of closes
pub fn sma(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period {
        return None;
    }
    let sum: f64 = candles[candles.len() - period..].iter().map(|c| c.close).sum();
    Some(sum / period as f64)
}

/// Supertrend line for the last candle.
///
/// ATR uses Wilder smoothing seeded by the first `period` true ranges.
pub fn supertrend(candles: &[Candle], period: usize, multiplier: f64) -> Option<f64> {
    if period == 0 || candles.len() <= period {
        return None;
    }

    let true_ranges: Vec<f64> = candles
        .iter()
        .enumerate()
        .map(|(i, c)| {
            if i == 0 {
                c.high - c.low
            } else {
                let prev_close = candles[i - 1].close;
                (c.high - c.low)
                    .max((c.high - prev_close).abs())
                    .max((c.low - prev_close).abs())
            }
        })
        .collect();

    let mut atr = true_ranges[..period].iter().sum::<f64>() / period as f64;
    let mut final_upper = f64::NAN;
    let mut final_lower = f64::NAN;
    let mut uptrend = true;
    let mut line = None;

    for i in period..candles.len() {
        atr = (atr * (period as f64 - 1.0) + true_ranges[i]) / period as f64;
        let c = &candles[i];
        let prev_close = candles[i - 1].close;
        let hl2 = (c.high + c.low) / 2.0;
        let basic_upper = hl2 + multiplier * atr;
        let basic_lower = hl2 - multiplier * atr;

        final_upper = if final_upper.is_nan() || basic_upper < final_upper || prev_close > final_upper {
            basic_upper
        } else {
            final_upper
        };
        final_lower = if final_lower.is_nan() || basic_lower > final_lower || prev_close < final_lower {
            basic_lower
        } else {
            final_lower
        };

        if c.close > final_upper {
            uptrend = true;
        } else if c.close < final_lower {
            uptrend = false;
        }

        line = Some(if uptrend { final_lower } else { final_upper });
    }

    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};

    fn ts(i: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 12, 3)
            .unwrap()
            .and_hms_opt(9, 15, 0)
            .unwrap()
            + chrono::Duration::minutes(3 * i)
    }

    fn make_candle(i: i64, close: f64) -> Candle {
        Candle {
            symbol: "IDX".into(),
            timestamp: ts(i),
            open: close - 1.0,
            high: close + 2.0,
            low: close - 2.0,
            close,
            volume: 100.0,
        }
    }

    #[test]
    fn test_williams_r_bounds() {
        let rising: Vec<Candle> = (0..20).map(|i| make_candle(i, 100.0 + i as f64)).collect();
        let w = williams_r(&rising, 20).unwrap();
        // Close near the top of the range
        assert!(w > -10.0 && w <= 0.0, "got {}", w);

        let falling: Vec<Candle> = (0..20).map(|i| make_candle(i, 200.0 - i as f64)).collect();
        let w = williams_r(&falling, 20).unwrap();
        assert!(w < -90.0 && w >= -100.0, "got {}", w);

        assert!(williams_r(&rising[..19], 20).is_none());
    }

    #[test]
    fn test_sma() {
        let candles: Vec<Candle> = (0..5).map(|i| make_candle(i, 10.0 * (i + 1) as f64)).collect();
        assert_eq!(sma(&candles, 5), Some(30.0));
        assert_eq!(sma(&candles, 2), Some(45.0));
        assert_eq!(sma(&candles, 6), None);
    }

    #[test]
    fn test_supertrend_follows_trend() {
        let rising: Vec<Candle> = (0..40).map(|i| make_candle(i, 100.0 + 3.0 * i as f64)).collect();
        let line = supertrend(&rising, 10, 3.0).unwrap();
        // In an uptrend the line trails below price
        assert!(line < rising.last().unwrap().close);

        let falling: Vec<Candle> = (0..40).map(|i| make_candle(i, 300.0 - 3.0 * i as f64)).collect();
        let line = supertrend(&falling, 10, 3.0).unwrap();
        assert!(line > falling.last().unwrap().close);
    }

    #[test]
    fn test_standard_set_is_partial_during_warmup() {
        let set = StandardIndicators::default();
        let candles: Vec<Candle> = (0..25).map(|i| make_candle(i, 100.0 + i as f64)).collect();
        let row = set.evaluate(&candles);
        assert!(row.oscillator.is_some());
        assert!(row.moving_average.is_none());
        assert!(row.trend_overlay.is_some());
    }
}

//! BreakoutBot Library
//!
//! Multi-timeframe candle aggregation, fractal breakout signals and the
//! option trade lifecycle for index options

pub mod backtesting;
pub mod broker;
pub mod candles;
pub mod config;
pub mod indicators;
pub mod persistence;
pub mod risk;
pub mod router;
pub mod signal;
pub mod trading;
pub mod types;

//! Configuration management for BreakoutBot
//!
//! Compiled defaults, then optional `config/default.*` and `config/local.*`
//! files, then `BREAKOUT__*` environment variables (and `.env`).

use anyhow::{Context, Result};
use chrono::{FixedOffset, NaiveTime};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::candles::SessionClock;
use crate::indicators::StandardIndicators;
use crate::risk::RiskPolicy;
use crate::signal::DetectorConfig;
use crate::trading::TradeConfig;
use crate::types::Timeframe;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid clock time {0:?}, expected HH:MM")]
    InvalidClock(String),
    #[error("invalid UTC offset of {0} minutes")]
    InvalidOffset(i32),
    #[error("no candle timeframes configured")]
    NoTimeframes,
    #[error("timeframe widths must be positive")]
    ZeroTimeframe,
    #[error("trading timeframe {0}m is not among the configured timeframes")]
    TradingTimeframeMissing(u32),
    #[error("lot size must be positive")]
    ZeroLotSize,
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub session: SessionConfig,
    pub candles: CandlesConfig,
    pub signal: SignalConfig,
    pub trading: TradingConfig,
    pub risk: RiskConfig,
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Exchange-local open, "HH:MM"
    pub market_open: String,
    /// No entries at or after this time, "HH:MM"
    pub entry_cutoff: String,
    /// Exchange offset from UTC in minutes (IST = 330)
    pub utc_offset_minutes: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandlesConfig {
    /// Candle widths in minutes; the base timeframe is always built
    pub timeframes: Vec<u32>,
    /// Completed candles kept per symbol and timeframe
    pub max_history: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    pub tracked_symbol: String,
    pub trading_timeframe: u32,
    pub fractal_length: usize,
    pub fractal_capacity: usize,
    pub willr_length: usize,
    pub sma_length: usize,
    pub supertrend_length: usize,
    pub supertrend_multiplier: f64,
    pub up_rejection_level: f64,
    pub down_rejection_level: f64,
    pub midline: f64,
    /// Largest breakout-to-stop distance in index points
    pub max_stop_points: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    pub lot_size: u32,
    pub brokerage_per_lot: f64,
    pub reference_premium: f64,
    pub stop_loss_pct: f64,
    pub entry_limit_offset: f64,
    pub stop_limit_factor: f64,
    /// Route orders to a live broker transport instead of paper fills
    pub real_trade: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    pub initial_capital: f64,
    pub daily_loss_pct: f64,
    pub tier_one_capital: f64,
    pub tier_two_capital: f64,
    pub capital_per_extra_lot: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    pub data_dir: String,
    pub journal_file: String,
}

impl AppConfig {
    /// Load files and environment, with an optional explicit file layered
    /// over `config/default` and `config/local`
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = Self::builder_with_defaults()?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false));
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let config = builder
            // Override with environment variables (BREAKOUT__*)
            .add_source(Environment::with_prefix("BREAKOUT").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        app_config.validate()?;
        Ok(app_config)
    }

    /// Compiled defaults only, ignoring files and environment
    pub fn defaults() -> Result<Self> {
        let config = Self::builder_with_defaults()?
            .build()
            .context("Failed to build default configuration")?;
        config
            .try_deserialize()
            .context("Failed to deserialize default configuration")
    }

    fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>> {
        let builder = Config::builder()
            // Session defaults
            .set_default("session.market_open", "09:15")?
            .set_default("session.entry_cutoff", "15:15")?
            .set_default("session.utc_offset_minutes", 330)?
            // Candle defaults
            .set_default("candles.timeframes", vec![1i64, 3i64])?
            .set_default("candles.max_history", 1000)?
            // Signal defaults
            .set_default("signal.tracked_symbol", "NSE:NIFTY50-INDEX")?
            .set_default("signal.trading_timeframe", 3)?
            .set_default("signal.fractal_length", 5)?
            .set_default("signal.fractal_capacity", 20)?
            .set_default("signal.willr_length", 20)?
            .set_default("signal.sma_length", 50)?
            .set_default("signal.supertrend_length", 10)?
            .set_default("signal.supertrend_multiplier", 3.0)?
            .set_default("signal.up_rejection_level", -30.0)?
            .set_default("signal.down_rejection_level", -70.0)?
            .set_default("signal.midline", -50.0)?
            .set_default("signal.max_stop_points", 50.0)?
            // Trading defaults
            .set_default("trading.lot_size", 75)?
            .set_default("trading.brokerage_per_lot", 50.0)?
            .set_default("trading.reference_premium", 120.0)?
            .set_default("trading.stop_loss_pct", 0.10)?
            .set_default("trading.entry_limit_offset", 1.0)?
            .set_default("trading.stop_limit_factor", 0.99)?
            .set_default("trading.real_trade", false)?
            // Risk defaults
            .set_default("risk.initial_capital", 30_000.0)?
            .set_default("risk.daily_loss_pct", 0.05)?
            .set_default("risk.tier_one_capital", 50_000.0)?
            .set_default("risk.tier_two_capital", 80_000.0)?
            .set_default("risk.capital_per_extra_lot", 30_000.0)?
            // Persistence defaults
            .set_default("persistence.data_dir", "./data")?
            .set_default("persistence.journal_file", "trade_journal.csv")?;
        Ok(builder)
    }

    /// Check values the type system cannot
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.session_clock()?;
        self.entry_cutoff()?;
        if self.candles.timeframes.is_empty() {
            return Err(ConfigError::NoTimeframes);
        }
        if self.candles.timeframes.contains(&0) || self.signal.trading_timeframe == 0 {
            return Err(ConfigError::ZeroTimeframe);
        }
        let trading = self.signal.trading_timeframe;
        if trading != Timeframe::BASE.minutes() && !self.candles.timeframes.contains(&trading) {
            return Err(ConfigError::TradingTimeframeMissing(trading));
        }
        if self.trading.lot_size == 0 {
            return Err(ConfigError::ZeroLotSize);
        }
        Ok(())
    }

    pub fn session_clock(&self) -> Result<SessionClock, ConfigError> {
        let open = parse_clock(&self.session.market_open)?;
        let offset = FixedOffset::east_opt(self.session.utc_offset_minutes * 60)
            .ok_or(ConfigError::InvalidOffset(self.session.utc_offset_minutes))?;
        Ok(SessionClock::new(open, offset))
    }

    pub fn entry_cutoff(&self) -> Result<NaiveTime, ConfigError> {
        parse_clock(&self.session.entry_cutoff)
    }

    pub fn timeframes(&self) -> Vec<Timeframe> {
        self.candles.timeframes.iter().copied().map(Timeframe).collect()
    }

    pub fn detector_config(&self) -> DetectorConfig {
        let s = &self.signal;
        DetectorConfig {
            tracked_symbol: s.tracked_symbol.clone(),
            trading_timeframe: Timeframe(s.trading_timeframe),
            fractal_length: s.fractal_length,
            fractal_capacity: s.fractal_capacity,
            min_bars: s.sma_length,
            up_rejection_level: s.up_rejection_level,
            down_rejection_level: s.down_rejection_level,
            midline: s.midline,
            max_stop_points: s.max_stop_points,
            max_series: self.candles.max_history,
        }
    }

    pub fn indicators(&self) -> StandardIndicators {
        StandardIndicators {
            willr_length: self.signal.willr_length,
            sma_length: self.signal.sma_length,
            supertrend_length: self.signal.supertrend_length,
            supertrend_multiplier: self.signal.supertrend_multiplier,
        }
    }

    pub fn trade_config(&self) -> Result<TradeConfig, ConfigError> {
        let t = &self.trading;
        Ok(TradeConfig {
            lot_size: t.lot_size,
            brokerage_per_lot: t.brokerage_per_lot,
            reference_premium: t.reference_premium,
            stop_loss_pct: t.stop_loss_pct,
            entry_limit_offset: t.entry_limit_offset,
            stop_limit_factor: t.stop_limit_factor,
            entry_cutoff: self.entry_cutoff()?,
        })
    }

    pub fn risk_policy(&self) -> RiskPolicy {
        RiskPolicy {
            daily_loss_pct: self.risk.daily_loss_pct,
            tier_one_capital: self.risk.tier_one_capital,
            tier_two_capital: self.risk.tier_two_capital,
            capital_per_extra_lot: self.risk.capital_per_extra_lot,
        }
    }

    pub fn journal_path(&self) -> PathBuf {
        Path::new(&self.persistence.data_dir).join(&self.persistence.journal_file)
    }

    /// Generate a digest of the config for logging
    pub fn digest(&self) -> String {
        format!(
            "symbol={} tf={}m timeframes={:?} open={} cutoff={} lot={} capital={:.0} real_trade={}",
            self.signal.tracked_symbol,
            self.signal.trading_timeframe,
            self.candles.timeframes,
            self.session.market_open,
            self.session.entry_cutoff,
            self.trading.lot_size,
            self.risk.initial_capital,
            self.trading.real_trade
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

/// Parse "HH:MM" or "HH:MM:SS"
pub fn parse_clock(value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|_| ConfigError::InvalidClock(value.to_string()))
}

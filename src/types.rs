//! Core types used throughout BreakoutBot
//!
//! Defines ticks, candles, timeframes, directions and the order vocabulary
//! shared between the aggregator, the signal detector and the trade manager.

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Candle width in minutes. The base timeframe is one minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timeframe(pub u32);

impl Timeframe {
    /// Base timeframe every higher timeframe is built from
    pub const BASE: Timeframe = Timeframe(1);

    pub fn minutes(&self) -> u32 {
        self.0
    }

    pub fn duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.0))
    }

    pub fn is_base(&self) -> bool {
        *self == Self::BASE
    }
}

impl Default for Timeframe {
    fn default() -> Self {
        Timeframe::BASE
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}m", self.0)
    }
}

/// Trading direction of a signal or trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// Option class bought to express this direction
    pub fn option_kind(&self) -> OptionKind {
        match self {
            Direction::Long => OptionKind::Call,
            Direction::Short => OptionKind::Put,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "long"),
            Direction::Short => write!(f, "short"),
        }
    }
}

/// Option contract class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionKind {
    Call,
    Put,
}

impl OptionKind {
    /// Classify an exchange symbol such as `NSE:NIFTY25D0226000CE`
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        if symbol.ends_with("CE") {
            Some(OptionKind::Call)
        } else if symbol.ends_with("PE") {
            Some(OptionKind::Put)
        } else {
            None
        }
    }
}

impl fmt::Display for OptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionKind::Call => write!(f, "CE"),
            OptionKind::Put => write!(f, "PE"),
        }
    }
}

/// Tick message as delivered by the market data feed
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTick {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub ltp: Option<f64>,
    #[serde(default)]
    pub vol_traded_today: Option<f64>,
    #[serde(default)]
    pub exch_feed_time: Option<i64>,
}

/// Validated price tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    /// Last traded price
    pub ltp: f64,
    /// Cumulative volume traded today
    pub volume: f64,
    /// Exchange feed time, epoch seconds
    pub feed_time: i64,
}

impl Tick {
    pub fn new(symbol: impl Into<String>, ltp: f64, volume: f64, feed_time: i64) -> Self {
        Self {
            symbol: symbol.into(),
            ltp,
            volume,
            feed_time,
        }
    }

    /// Incomplete messages are dropped, not reported
    pub fn from_raw(raw: RawTick) -> Option<Self> {
        let symbol = raw.symbol.filter(|s| !s.is_empty())?;
        let ltp = raw.ltp.filter(|p| *p > 0.0)?;
        let feed_time = raw.exch_feed_time?;
        Some(Self {
            symbol,
            ltp,
            volume: raw.vol_traded_today.unwrap_or(0.0),
            feed_time,
        })
    }
}

/// Completed OHLCV candle. Volume is the traded volume inside the bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    /// Bucket start in exchange-local time
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Fold a later candle of the same bucket into this one
    pub fn merge(&mut self, later: &Candle) {
        self.high = self.high.max(later.high);
        self.low = self.low.min(later.low);
        self.close = later.close;
        self.volume += later.volume;
    }

    /// Extend high/low/close with an intrabar price
    pub fn touch(&mut self, price: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
    }
}

/// Broker order status with an explicit code table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Canceled,
    Filled,
    Pending,
    Rejected,
    Transit,
    Unknown(i64),
}

impl OrderStatus {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => OrderStatus::Canceled,
            2 => OrderStatus::Filled,
            4 | 6 => OrderStatus::Pending,
            5 => OrderStatus::Rejected,
            8 => OrderStatus::Transit,
            other => OrderStatus::Unknown(other),
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            OrderStatus::Canceled => 1,
            OrderStatus::Filled => 2,
            OrderStatus::Pending => 4,
            OrderStatus::Rejected => 5,
            OrderStatus::Transit => 8,
            OrderStatus::Unknown(code) => *code,
        }
    }

    /// Order is dead without a fill
    pub fn is_failed(&self) -> bool {
        matches!(self, OrderStatus::Canceled | OrderStatus::Rejected)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStatus::Canceled => write!(f, "CANCELED"),
            OrderStatus::Filled => write!(f, "FILLED"),
            OrderStatus::Pending => write!(f, "PENDING"),
            OrderStatus::Rejected => write!(f, "REJECTED"),
            OrderStatus::Transit => write!(f, "TRANSIT"),
            OrderStatus::Unknown(code) => write!(f, "UNKNOWN({})", code),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn code(&self) -> i8 {
        match self {
            OrderSide::Buy => 1,
            OrderSide::Sell => -1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
    Stop,
    StopLimit,
}

impl OrderType {
    pub fn code(&self) -> u8 {
        match self {
            OrderType::Limit => 1,
            OrderType::Market => 2,
            OrderType::Stop => 3,
            OrderType::StopLimit => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Validity {
    Day,
}

/// Outbound order request handed to the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    /// Quantity in units (lots × lot size)
    pub qty: u32,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub limit_price: f64,
    pub stop_price: f64,
    pub validity: Validity,
}

impl OrderRequest {
    /// Broker wire form: numeric side and type codes, intraday margin product
    pub fn payload(&self) -> serde_json::Value {
        let validity = match self.validity {
            Validity::Day => "DAY",
        };
        serde_json::json!({
            "symbol": self.symbol,
            "qty": self.qty,
            "type": self.order_type.code(),
            "side": self.side.code(),
            "productType": "MARGIN",
            "limitPrice": self.limit_price,
            "stopPrice": self.stop_price,
            "validity": validity,
        })
    }
}

/// Order update message as delivered by the broker's order stream
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawOrderUpdate {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<i64>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default, rename = "tradedPrice")]
    pub traded_price: Option<f64>,
    #[serde(default, rename = "orderDateTime")]
    pub order_date_time: Option<String>,
}

/// Broker envelope wrapping order updates
#[derive(Debug, Clone, Deserialize)]
pub struct OrderEnvelope {
    pub orders: RawOrderUpdate,
}

/// Validated order update
#[derive(Debug, Clone, PartialEq)]
pub struct OrderUpdate {
    pub id: String,
    pub status: OrderStatus,
    pub symbol: Option<String>,
    pub traded_price: Option<f64>,
    /// Broker timestamp in exchange-local time
    pub timestamp: Option<NaiveDateTime>,
}

impl OrderUpdate {
    pub const TIMESTAMP_FORMAT: &'static str = "%d-%b-%Y %H:%M:%S";

    pub fn filled(id: impl Into<String>, price: f64, at: NaiveDateTime) -> Self {
        Self {
            id: id.into(),
            status: OrderStatus::Filled,
            symbol: None,
            traded_price: Some(price),
            timestamp: Some(at),
        }
    }

    /// Updates without an id are meaningless and dropped
    pub fn from_raw(raw: RawOrderUpdate) -> Option<Self> {
        let id = raw.id.filter(|s| !s.is_empty())?;
        let status = OrderStatus::from_code(raw.status.unwrap_or(0));
        let timestamp = raw
            .order_date_time
            .as_deref()
            .and_then(|s| NaiveDateTime::parse_from_str(s, Self::TIMESTAMP_FORMAT).ok());
        Some(Self {
            id,
            status,
            symbol: raw.symbol,
            traded_price: raw.traded_price,
            timestamp,
        })
    }

    /// Broker time if present, else processing time shifted into exchange-local time
    pub fn effective_time(&self, utc_offset: chrono::FixedOffset) -> NaiveDateTime {
        self.timestamp
            .unwrap_or_else(|| Utc::now().with_timezone(&utc_offset).naive_local())
    }
}

/// One inbound message on the serialized event stream
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Tick(RawTick),
    Order(RawOrderUpdate),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_from_raw_drops_incomplete() {
        let missing_symbol = RawTick {
            symbol: None,
            ltp: Some(100.0),
            vol_traded_today: None,
            exch_feed_time: Some(1_700_000_000),
        };
        assert!(Tick::from_raw(missing_symbol).is_none());

        let missing_time = RawTick {
            symbol: Some("NSE:NIFTY50-INDEX".into()),
            ltp: Some(100.0),
            vol_traded_today: None,
            exch_feed_time: None,
        };
        assert!(Tick::from_raw(missing_time).is_none());

        let ok = RawTick {
            symbol: Some("NSE:NIFTY50-INDEX".into()),
            ltp: Some(100.0),
            vol_traded_today: None,
            exch_feed_time: Some(1_700_000_000),
        };
        let tick = Tick::from_raw(ok).unwrap();
        assert_eq!(tick.volume, 0.0);
    }

    #[test]
    fn test_raw_tick_parses_feed_json() {
        let json = r#"{"symbol":"NSE:NIFTY50-INDEX","ltp":24500.5,"vol_traded_today":1200,"exch_feed_time":1733110200,"type":"sf"}"#;
        let raw: RawTick = serde_json::from_str(json).unwrap();
        let tick = Tick::from_raw(raw).unwrap();
        assert_eq!(tick.ltp, 24500.5);
        assert_eq!(tick.volume, 1200.0);
    }

    #[test]
    fn test_order_status_code_table() {
        assert_eq!(OrderStatus::from_code(2), OrderStatus::Filled);
        assert_eq!(OrderStatus::from_code(1), OrderStatus::Canceled);
        assert_eq!(OrderStatus::from_code(5), OrderStatus::Rejected);
        assert_eq!(OrderStatus::from_code(6), OrderStatus::Pending);
        assert_eq!(OrderStatus::from_code(8), OrderStatus::Transit);
        assert_eq!(OrderStatus::from_code(42), OrderStatus::Unknown(42));
        assert!(!OrderStatus::Transit.is_failed());
        assert!(OrderStatus::Rejected.is_failed());

        for code in [1, 2, 4, 5, 8, 42] {
            assert_eq!(OrderStatus::from_code(code).code(), code);
        }
        // 6 is an alias of pending
        assert_eq!(OrderStatus::from_code(6).code(), 4);
    }

    #[test]
    fn test_order_payload_uses_broker_codes() {
        let stop = OrderRequest {
            symbol: "NSE:NIFTY24D0524000PE".into(),
            qty: 150,
            side: OrderSide::Sell,
            order_type: OrderType::StopLimit,
            limit_price: 107.5,
            stop_price: 108.0,
            validity: Validity::Day,
        };
        let payload = stop.payload();
        assert_eq!(payload["symbol"], "NSE:NIFTY24D0524000PE");
        assert_eq!(payload["qty"], 150);
        assert_eq!(payload["type"], 4);
        assert_eq!(payload["side"], -1);
        assert_eq!(payload["productType"], "MARGIN");
        assert_eq!(payload["limitPrice"], 107.5);
        assert_eq!(payload["stopPrice"], 108.0);
        assert_eq!(payload["validity"], "DAY");

        let entry = OrderRequest {
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            ..stop
        };
        assert_eq!(entry.payload()["side"], 1);
        assert_eq!(entry.payload()["type"], 1);
        assert_eq!(OrderType::Market.code(), 2);
        assert_eq!(OrderType::Stop.code(), 3);
    }

    #[test]
    fn test_order_update_parses_broker_time() {
        let json = r#"{"orders":{"id":"24120200001","status":2,"symbol":"NSE:NIFTY24D0524500CE","tradedPrice":118.5,"orderDateTime":"02-Dec-2024 10:21:05"}}"#;
        let env: OrderEnvelope = serde_json::from_str(json).unwrap();
        let update = OrderUpdate::from_raw(env.orders).unwrap();
        assert_eq!(update.status, OrderStatus::Filled);
        assert_eq!(update.traded_price, Some(118.5));
        let ts = update.timestamp.unwrap();
        assert_eq!(ts.format("%H:%M:%S").to_string(), "10:21:05");
    }

    #[test]
    fn test_option_kind_from_symbol() {
        assert_eq!(
            OptionKind::from_symbol("NSE:NIFTY24D0524500CE"),
            Some(OptionKind::Call)
        );
        assert_eq!(
            OptionKind::from_symbol("NSE:NIFTY24D0524500PE"),
            Some(OptionKind::Put)
        );
        assert_eq!(OptionKind::from_symbol("NSE:NIFTY50-INDEX"), None);
        assert_eq!(Direction::Short.option_kind(), OptionKind::Put);
    }
}

//! Persistence Module
//!
//! Handles:
//! - JSONL replay files (ticks and broker order envelopes, one object per line)
//! - Warm-start candle CSVs
//! - The append-only trade journal CSV

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::trading::CompletedTrade;
use crate::types::{Candle, EngineEvent, OrderEnvelope, RawTick};

/// Warm-start timestamp format
pub const CANDLE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parse one replay line. Envelopes with an `orders` key are order updates,
/// anything else is a tick.
pub fn parse_event_line(line: &str) -> Option<EngineEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    if value.get("orders").is_some() {
        let envelope: OrderEnvelope = serde_json::from_value(value).ok()?;
        Some(EngineEvent::Order(envelope.orders))
    } else if value.is_object() {
        let tick: RawTick = serde_json::from_value(value).ok()?;
        Some(EngineEvent::Tick(tick))
    } else {
        None
    }
}

/// Read a whole replay file; malformed lines are skipped with a warning
pub fn read_events(path: &Path) -> Result<Vec<EngineEvent>> {
    let file = fs::File::open(path)
        .with_context(|| format!("Failed to open replay file {}", path.display()))?;
    let mut events = Vec::new();
    let mut skipped = 0usize;

    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_event_line(&line) {
            Some(event) => events.push(event),
            None => {
                skipped += 1;
                warn!(file = %path.display(), line = index + 1, "Skipping malformed replay line");
            }
        }
    }

    info!(file = %path.display(), events = events.len(), skipped, "Replay file loaded");
    Ok(events)
}

/// Replay files in a directory (`*.txt`, `*.jsonl`), sorted by name
pub fn replay_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("txt") | Some("jsonl")
                )
        })
        .collect();
    files.sort();
    Ok(files)
}

#[derive(Debug, Deserialize)]
struct CandleRow {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: f64,
}

/// Load a base-timeframe candle CSV for one symbol
pub fn load_warm_start_csv(path: &Path, symbol: &str) -> Result<Vec<Candle>> {
    let file = fs::File::open(path)
        .with_context(|| format!("Failed to open warm-start file {}", path.display()))?;
    let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);
    let mut candles = Vec::new();

    for result in reader.deserialize() {
        let row: CandleRow = result.context("Failed to deserialize candle row")?;
        let timestamp = NaiveDateTime::parse_from_str(row.timestamp.trim(), CANDLE_TIME_FORMAT)
            .with_context(|| format!("Bad candle timestamp {:?}", row.timestamp))?;
        candles.push(Candle {
            symbol: symbol.to_string(),
            timestamp,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
        });
    }

    candles.sort_by_key(|c| c.timestamp);
    Ok(candles)
}

/// Journal row for a completed trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalRecord {
    pub entry_time: NaiveDateTime,
    pub exit_time: NaiveDateTime,
    pub symbol: String,
    pub direction: String,
    pub lots: u32,
    pub entry_price: f64,
    pub exit_price: f64,
    pub initial_sl: f64,
    pub partial_exits: usize,
    pub pnl: f64,
    pub exit_reason: String,
    /// Running capital after this trade (backtests)
    pub capital: Option<f64>,
}

impl JournalRecord {
    pub fn from_trade(done: &CompletedTrade, capital: Option<f64>) -> Self {
        Self {
            entry_time: done.trade.entry_time,
            exit_time: done.exit_time,
            symbol: done.trade.symbol.clone(),
            direction: done.trade.direction.to_string(),
            lots: done.trade.initial_lots,
            entry_price: done.trade.actual_entry_price,
            exit_price: done.exit_price,
            initial_sl: done.trade.initial_sl_price,
            partial_exits: done.trade.partial_exits.len(),
            pnl: done.pnl,
            exit_reason: done.exit_reason.to_string(),
            capital,
        }
    }
}

/// Append-only CSV trade journal
pub struct TradeJournal {
    path: PathBuf,
    writer: csv::Writer<fs::File>,
}

impl TradeJournal {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).context("Failed to create journal directory")?;
            }
        }
        Ok(Self {
            path: path.to_path_buf(),
            writer: Self::create_writer(path)?,
        })
    }

    fn create_writer(path: &Path) -> Result<csv::Writer<fs::File>> {
        let file_has_data =
            path.exists() && fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .context("Failed to open journal file")?;

        Ok(WriterBuilder::new()
            .has_headers(!file_has_data)
            .from_writer(file))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, record: &JournalRecord) -> Result<()> {
        self.writer
            .serialize(record)
            .context("Failed to write journal record")?;
        self.writer.flush().context("Failed to flush journal")?;
        Ok(())
    }
}

/// Read a journal back
pub fn load_journal(path: &Path) -> Result<Vec<JournalRecord>> {
    let file = fs::File::open(path).context("Failed to open journal")?;
    let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);
    reader
        .deserialize()
        .map(|r| r.context("Failed to deserialize journal record"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading::{ExitReason, Trade, TradeStatus};
    use crate::types::Direction;
    use chrono::NaiveDate;
    use std::io::Write;

    fn completed(pnl: f64) -> CompletedTrade {
        let t = NaiveDate::from_ymd_opt(2024, 12, 3).unwrap().and_hms_opt(10, 0, 0).unwrap();
        CompletedTrade {
            trade: Trade {
                symbol: "NSE:NIFTY24D0524000CE".into(),
                direction: Direction::Long,
                entry_time: t,
                requested_entry_price: 120.0,
                actual_entry_price: 120.0,
                initial_lots: 1,
                lots_outstanding: 0,
                initial_sl_price: 108.0,
                current_sl_price: 108.0,
                take_profit_levels: Default::default(),
                partial_exits: vec![],
                status: TradeStatus::Exited,
            },
            exit_price: 100.0,
            exit_time: t + chrono::Duration::minutes(5),
            pnl,
            exit_reason: ExitReason::StopLossHit,
        }
    }

    #[test]
    fn test_parse_event_line() {
        let tick = r#"{"symbol":"NSE:NIFTY50-INDEX","ltp":24100.5,"vol_traded_today":0,"exch_feed_time":1733200200}"#;
        assert!(matches!(parse_event_line(tick), Some(EngineEvent::Tick(t)) if t.ltp == Some(24100.5)));

        let order = r#"{"orders":{"id":"E1","status":2,"tradedPrice":121.0}}"#;
        assert!(matches!(parse_event_line(order), Some(EngineEvent::Order(o)) if o.id.as_deref() == Some("E1")));

        assert!(parse_event_line("not json").is_none());
        assert!(parse_event_line("[1,2]").is_none());
        assert!(parse_event_line("   ").is_none());
    }

    #[test]
    fn test_read_events_skips_malformed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"symbol":"A","ltp":1.0,"exch_feed_time":1}}"#).unwrap();
        writeln!(file, "{{broken").unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"symbol":"B","ltp":2.0,"exch_feed_time":2}}"#).unwrap();
        let events = read_events(file.path()).unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_warm_start_csv() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "timestamp,open,high,low,close,volume").unwrap();
        writeln!(file, "2024-12-02 09:16:00,2,3,1,2.5,10").unwrap();
        writeln!(file, "2024-12-02 09:15:00,1,2,0.5,1.5,20").unwrap();
        let candles = load_warm_start_csv(file.path(), "IDX").unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].close, 1.5);
        assert_eq!(candles[1].symbol, "IDX");
    }

    #[test]
    fn test_journal_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal").join("trades.csv");
        {
            let mut journal = TradeJournal::open(&path).unwrap();
            journal.append(&JournalRecord::from_trade(&completed(-1550.0), Some(28_450.0))).unwrap();
        }
        {
            let mut journal = TradeJournal::open(&path).unwrap();
            journal.append(&JournalRecord::from_trade(&completed(300.0), None)).unwrap();
        }
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.matches("entry_time").count(), 1);

        let records = load_journal(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].exit_reason, "Stop-loss hit");
        assert_eq!(records[0].capital, Some(28_450.0));
        assert_eq!(records[1].capital, None);
    }

    #[test]
    fn test_replay_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.txt", "a.jsonl", "c.csv"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        let files = replay_files(dir.path()).unwrap();
        let names: Vec<_> = files.iter().map(|p| p.file_name().unwrap().to_str().unwrap().to_string()).collect();
        assert_eq!(names, vec!["a.jsonl", "b.txt"]);
    }
}

//! Event loop: one channel serializes ticks and order updates

use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::TickRouter;
use crate::persistence::parse_event_line;
use crate::types::EngineEvent;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventLoopStats {
    pub ticks: usize,
    pub dropped_ticks: usize,
    pub order_updates: usize,
}

/// Drain the channel into the router until every sender is gone
pub async fn run_event_loop(router: &mut TickRouter, mut rx: mpsc::Receiver<EngineEvent>) -> EventLoopStats {
    let mut stats = EventLoopStats::default();
    while let Some(event) = rx.recv().await {
        match event {
            EngineEvent::Tick(raw) => match router.process_raw_tick(raw) {
                Some(_) => stats.ticks += 1,
                None => stats.dropped_ticks += 1,
            },
            EngineEvent::Order(raw) => {
                stats.order_updates += 1;
                router.process_raw_order_update(raw);
            }
        }
    }
    info!(
        ticks = stats.ticks,
        dropped = stats.dropped_ticks,
        orders = stats.order_updates,
        "Event stream closed"
    );
    stats
}

/// Stream a JSONL replay file into the channel
pub async fn feed_replay_file(path: PathBuf, tx: mpsc::Sender<EngineEvent>) -> Result<usize> {
    let file = tokio::fs::File::open(&path)
        .await
        .with_context(|| format!("Failed to open replay file {}", path.display()))?;
    let mut lines = BufReader::new(file).lines();
    let mut sent = 0usize;
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await.context("Failed to read replay line")? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let Some(event) = parse_event_line(&line) else {
            warn!(file = %path.display(), line = line_no, "Skipping malformed replay line");
            continue;
        };
        if tx.send(event).await.is_err() {
            // Receiver gone (shutdown)
            break;
        }
        sent += 1;
    }
    Ok(sent)
}

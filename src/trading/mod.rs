//! Trade Manager - Option trade lifecycle
//!
//! IDLE -> AWAITING_ENTRY -> TRADE_ACTIVE -> IDLE
//!
//! Handles:
//! - Lot sizing and instrument selection on an entry trigger
//! - Entry fill confirmation and protective stop placement
//! - Take-profit ladder with one-lot partial exits and a trailing stop
//! - Stop-loss, final take-profit and end-of-day exits
//! - Daily P&L accounting through `RiskState`

pub mod ladder;
pub use ladder::{round_price, stop_price, take_profit_ladder};

use chrono::{Datelike, FixedOffset, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use tracing::{debug, error, info, warn};

use crate::broker::Broker;
use crate::risk::{RiskPolicy, RiskState, SizingDecision};
use crate::signal::EntryTrigger;
use crate::types::{
    Direction, OptionKind, OrderRequest, OrderSide, OrderStatus, OrderType, OrderUpdate, Tick,
    Validity,
};

/// Trade parameters
#[derive(Debug, Clone)]
pub struct TradeConfig {
    /// Units per lot
    pub lot_size: u32,
    /// Brokerage per trade, apportioned across the initial lots
    pub brokerage_per_lot: f64,
    /// Premium the instrument selection aims for
    pub reference_premium: f64,
    /// Stop distance as a fraction of the premium
    pub stop_loss_pct: f64,
    /// Added to the selected premium for the entry limit price
    pub entry_limit_offset: f64,
    /// Stop-limit price as a fraction of the stop trigger price
    pub stop_limit_factor: f64,
    /// No entries at or after this time; open trades are closed
    pub entry_cutoff: NaiveTime,
}

impl Default for TradeConfig {
    fn default() -> Self {
        Self {
            lot_size: 75,
            brokerage_per_lot: 50.0,
            reference_premium: 120.0,
            stop_loss_pct: 0.10,
            entry_limit_offset: 1.0,
            stop_limit_factor: 0.99,
            entry_cutoff: NaiveTime::from_hms_opt(15, 15, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

/// Exit reason for a trade or trade leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLossHit,
    FinalTakeProfit,
    PartialTakeProfit,
    EndOfDay,
    StopOrderFailed,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::StopLossHit => write!(f, "Stop-loss hit"),
            ExitReason::FinalTakeProfit => write!(f, "Final TP hit"),
            ExitReason::PartialTakeProfit => write!(f, "Partial TP hit"),
            ExitReason::EndOfDay => write!(f, "End of day exit"),
            ExitReason::StopOrderFailed => write!(f, "SL order failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    PendingEntry,
    Active,
    Exited,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialExit {
    pub exit_price: f64,
    pub exit_time: NaiveDateTime,
    pub pnl: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub direction: Direction,
    pub entry_time: NaiveDateTime,
    pub requested_entry_price: f64,
    pub actual_entry_price: f64,
    pub initial_lots: u32,
    pub lots_outstanding: u32,
    pub initial_sl_price: f64,
    pub current_sl_price: f64,
    pub take_profit_levels: VecDeque<f64>,
    pub partial_exits: Vec<PartialExit>,
    pub status: TradeStatus,
}

impl Trade {
    pub fn partial_pnl(&self) -> f64 {
        self.partial_exits.iter().map(|p| p.pnl).sum()
    }
}

/// Finished trade for reporting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedTrade {
    pub trade: Trade,
    pub exit_price: f64,
    pub exit_time: NaiveDateTime,
    /// Partial legs plus final leg
    pub pnl: f64,
    pub exit_reason: ExitReason,
}

/// Public view of the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradePhase {
    Idle,
    AwaitingEntry,
    TradeActive,
}

/// Result of offering an entry trigger to the manager
#[derive(Debug, Clone, PartialEq)]
pub enum EntryOutcome {
    Placed { order_id: String, symbol: String, lots: u32 },
    NotIdle,
    AfterCutoff,
    NoCapital,
    Halted,
    /// Weekday rule halted the session
    SessionHalted,
    NoInstrument,
    OrderFailed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeStatistics {
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    /// Break-even trades, neither win nor loss
    pub scratches: usize,
    pub total_pnl: f64,
}

enum TradeState {
    Idle,
    AwaitingEntry { order_id: String, trade: Trade },
    Active { trade: Trade, stop_order_id: Option<String> },
}

pub struct TradeManager {
    config: TradeConfig,
    policy: RiskPolicy,
    broker: Box<dyn Broker>,
    utc_offset: FixedOffset,
    state: TradeState,
    risk: Option<RiskState>,
    completed: Vec<CompletedTrade>,
}

impl TradeManager {
    pub fn new(
        config: TradeConfig,
        policy: RiskPolicy,
        broker: Box<dyn Broker>,
        utc_offset: FixedOffset,
    ) -> Self {
        Self {
            config,
            policy,
            broker,
            utc_offset,
            state: TradeState::Idle,
            risk: None,
            completed: Vec::new(),
        }
    }

    /// (Re)establish session capital: daily P&L reset, limit recomputed, halt cleared
    pub fn set_capital(&mut self, capital: f64) {
        let risk = RiskState::new(capital, &self.policy);
        info!(capital, daily_loss_limit = risk.daily_loss_limit, "Capital set");
        self.risk = Some(risk);
    }

    pub fn phase(&self) -> TradePhase {
        match self.state {
            TradeState::Idle => TradePhase::Idle,
            TradeState::AwaitingEntry { .. } => TradePhase::AwaitingEntry,
            TradeState::Active { .. } => TradePhase::TradeActive,
        }
    }

    /// Any non-idle state counts as an open position
    pub fn has_open_position(&self) -> bool {
        !matches!(self.state, TradeState::Idle)
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, TradeState::Active { .. })
    }

    pub fn current_trade(&self) -> Option<&Trade> {
        match &self.state {
            TradeState::Idle => None,
            TradeState::AwaitingEntry { trade, .. } | TradeState::Active { trade, .. } => Some(trade),
        }
    }

    pub fn risk(&self) -> Option<&RiskState> {
        self.risk.as_ref()
    }

    pub fn completed_trades(&self) -> &[CompletedTrade] {
        &self.completed
    }

    pub fn statistics(&self) -> TradeStatistics {
        let mut stats = TradeStatistics::default();
        for t in &self.completed {
            stats.trades += 1;
            stats.total_pnl += t.pnl;
            if t.pnl > 0.0 {
                stats.wins += 1;
            } else if t.pnl < 0.0 {
                stats.losses += 1;
            } else {
                stats.scratches += 1;
            }
        }
        stats
    }

    /// Size, select and place an entry for a confirmed breakout
    pub fn on_trigger(&mut self, trigger: &EntryTrigger, quotes: &[(String, f64)]) -> EntryOutcome {
        if self.has_open_position() {
            return EntryOutcome::NotIdle;
        }
        if trigger.trigger_time.time() >= self.config.entry_cutoff {
            debug!(time = %trigger.trigger_time, "Trigger after cutoff dropped");
            return EntryOutcome::AfterCutoff;
        }
        let Some(risk) = self.risk.as_mut() else {
            warn!("Entry refused: capital not set");
            return EntryOutcome::NoCapital;
        };
        if !risk.can_trade() {
            info!("Entry refused: trading halted for the session");
            return EntryOutcome::Halted;
        }

        let weekday = trigger.trigger_time.weekday();
        let lots = match self.policy.lots_for(risk.capital, weekday) {
            SizingDecision::HaltSession => {
                risk.halt();
                info!(%weekday, "No trading on this weekday, session halted");
                return EntryOutcome::SessionHalted;
            }
            SizingDecision::Lots(lots) => lots,
        };

        let kind = trigger.direction.option_kind();
        let Some((symbol, premium)) = select_instrument(quotes, kind, self.config.reference_premium) else {
            warn!(%kind, "No option quotes available for entry");
            return EntryOutcome::NoInstrument;
        };

        let stop = stop_price(premium, self.config.stop_loss_pct);
        let trade = Trade {
            symbol: symbol.clone(),
            direction: trigger.direction,
            entry_time: trigger.trigger_time,
            requested_entry_price: premium,
            actual_entry_price: premium,
            initial_lots: lots,
            lots_outstanding: lots,
            initial_sl_price: stop,
            current_sl_price: stop,
            take_profit_levels: take_profit_ladder(premium, lots, self.config.stop_loss_pct).into(),
            partial_exits: Vec::new(),
            status: TradeStatus::PendingEntry,
        };

        let order = OrderRequest {
            symbol: symbol.clone(),
            qty: lots * self.config.lot_size,
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            limit_price: round_price(premium + self.config.entry_limit_offset),
            stop_price: 0.0,
            validity: Validity::Day,
        };

        let order_id = match self.broker.place_order(&order) {
            Ok(id) => id,
            Err(e) => {
                error!(symbol = %symbol, error = %e, "Entry order failed");
                return EntryOutcome::OrderFailed(e.to_string());
            }
        };

        info!(
            direction = %trigger.direction,
            symbol = %symbol,
            lots,
            premium,
            order_id = %order_id,
            "Entry order placed"
        );
        self.state = TradeState::AwaitingEntry {
            order_id: order_id.clone(),
            trade,
        };

        if self.broker.simulates_fills() {
            self.on_order_update(&OrderUpdate::filled(order_id.clone(), premium, trigger.trigger_time));
        }

        EntryOutcome::Placed { order_id, symbol, lots }
    }

    /// Apply a broker order update; unknown ids are ignored
    pub fn on_order_update(&mut self, update: &OrderUpdate) {
        let at = update.effective_time(self.utc_offset);
        match std::mem::replace(&mut self.state, TradeState::Idle) {
            TradeState::AwaitingEntry { order_id, trade } if order_id == update.id => match update.status {
                OrderStatus::Filled => self.confirm_entry(trade, update.traded_price, at),
                status if status.is_failed() => {
                    warn!(order_id = %order_id, %status, symbol = %trade.symbol, "Entry order not filled, back to idle");
                }
                _ => self.state = TradeState::AwaitingEntry { order_id, trade },
            },
            TradeState::Active {
                trade,
                stop_order_id: Some(stop_id),
            } if stop_id == update.id => match update.status {
                OrderStatus::Filled => {
                    let price = update.traded_price.unwrap_or(trade.current_sl_price);
                    self.state = TradeState::Active {
                        trade,
                        stop_order_id: Some(stop_id),
                    };
                    self.exit_full(ExitReason::StopLossHit, price, at);
                }
                status if status.is_failed() => {
                    warn!(order_id = %stop_id, %status, "Protective stop order gone, software stop remains");
                    self.state = TradeState::Active {
                        trade,
                        stop_order_id: None,
                    };
                }
                _ => {
                    self.state = TradeState::Active {
                        trade,
                        stop_order_id: Some(stop_id),
                    }
                }
            },
            other => {
                debug!(
                    order_id = %update.id,
                    status = %update.status,
                    code = update.status.code(),
                    "Ignoring unrelated order update"
                );
                self.state = other;
            }
        }
    }

    fn confirm_entry(&mut self, mut trade: Trade, traded_price: Option<f64>, at: NaiveDateTime) {
        let fill = traded_price.unwrap_or(trade.requested_entry_price);
        let stop = stop_price(fill, self.config.stop_loss_pct);
        trade.actual_entry_price = fill;
        trade.initial_sl_price = stop;
        trade.current_sl_price = stop;
        trade.status = TradeStatus::Active;

        info!(symbol = %trade.symbol, fill, stop, "Entry filled");

        let order = self.stop_order(&trade.symbol, trade.lots_outstanding, stop);
        match self.broker.place_order(&order) {
            Ok(id) => {
                info!(order_id = %id, stop = order.stop_price, "Protective stop placed");
                self.state = TradeState::Active {
                    trade,
                    stop_order_id: Some(id),
                };
            }
            Err(e) => {
                error!(symbol = %trade.symbol, error = %e, "Protective stop failed, exiting position");
                self.state = TradeState::Active {
                    trade,
                    stop_order_id: None,
                };
                self.exit_full(ExitReason::StopOrderFailed, fill, at);
            }
        }
    }

    fn stop_order(&self, symbol: &str, lots: u32, stop: f64) -> OrderRequest {
        OrderRequest {
            symbol: symbol.to_string(),
            qty: lots * self.config.lot_size,
            side: OrderSide::Sell,
            order_type: OrderType::StopLimit,
            limit_price: round_price(stop * self.config.stop_limit_factor),
            stop_price: round_price(stop),
            validity: Validity::Day,
        }
    }

    fn market_exit(&self, symbol: &str, lots: u32) -> OrderRequest {
        OrderRequest {
            symbol: symbol.to_string(),
            qty: lots * self.config.lot_size,
            side: OrderSide::Sell,
            order_type: OrderType::Market,
            limit_price: 0.0,
            stop_price: 0.0,
            validity: Validity::Day,
        }
    }

    /// Exit checks for a tick of the open trade's symbol.
    ///
    /// Order: stop, nearest take-profit, end of day.
    pub fn check_exit(&mut self, tick: &Tick, at: NaiveDateTime) -> Option<ExitReason> {
        let TradeState::Active { trade, .. } = &self.state else {
            return None;
        };
        if tick.symbol != trade.symbol {
            return None;
        }
        let price = tick.ltp;

        let reason = if price <= trade.current_sl_price {
            ExitReason::StopLossHit
        } else if trade.take_profit_levels.front().is_some_and(|tp| price >= *tp) {
            if trade.lots_outstanding == 1 {
                ExitReason::FinalTakeProfit
            } else {
                ExitReason::PartialTakeProfit
            }
        } else if at.time() >= self.config.entry_cutoff {
            ExitReason::EndOfDay
        } else {
            return None;
        };

        if reason == ExitReason::PartialTakeProfit {
            self.exit_partial(price, at);
        } else {
            self.exit_full(reason, price, at);
        }
        Some(reason)
    }

    fn leg_pnl(&self, trade: &Trade, exit_price: f64, lots: u32) -> f64 {
        let per_lot_brokerage = self.config.brokerage_per_lot / f64::from(trade.initial_lots.max(1));
        (exit_price - trade.actual_entry_price) * f64::from(self.config.lot_size) * f64::from(lots)
            - per_lot_brokerage * f64::from(lots)
    }

    fn exit_partial(&mut self, price: f64, at: NaiveDateTime) {
        let TradeState::Active { trade, stop_order_id } = std::mem::replace(&mut self.state, TradeState::Idle) else {
            return;
        };
        let mut trade = trade;

        let pnl = self.leg_pnl(&trade, price, 1);
        trade.partial_exits.push(PartialExit {
            exit_price: price,
            exit_time: at,
            pnl,
        });
        trade.lots_outstanding -= 1;
        trade.take_profit_levels.pop_front();
        trade.current_sl_price = stop_price(price, self.config.stop_loss_pct);

        let exit_order = self.market_exit(&trade.symbol, 1);
        if let Err(e) = self.broker.place_order(&exit_order) {
            error!(symbol = %trade.symbol, error = %e, "Partial exit order failed");
        }
        let stop_order_id = self.replace_stop(&trade, stop_order_id);

        if let Some(risk) = self.risk.as_mut() {
            risk.record_realized(pnl);
        }
        info!(
            symbol = %trade.symbol,
            price,
            pnl,
            lots_outstanding = trade.lots_outstanding,
            trailing_stop = trade.current_sl_price,
            "Partial take-profit"
        );
        self.state = TradeState::Active { trade, stop_order_id };
    }

    /// Cancel the resting stop and re-place it for the remaining lots
    fn replace_stop(&mut self, trade: &Trade, old: Option<String>) -> Option<String> {
        if let Some(id) = &old {
            if let Err(e) = self.broker.cancel_order(id) {
                error!(order_id = %id, error = %e, "Stop cancel failed");
            }
        }
        let order = self.stop_order(&trade.symbol, trade.lots_outstanding, trade.current_sl_price);
        match self.broker.place_order(&order) {
            Ok(id) => Some(id),
            Err(e) => {
                error!(symbol = %trade.symbol, error = %e, "Stop replacement failed, software stop remains");
                None
            }
        }
    }

    fn exit_full(&mut self, reason: ExitReason, price: f64, at: NaiveDateTime) {
        let TradeState::Active { trade, stop_order_id } = std::mem::replace(&mut self.state, TradeState::Idle) else {
            return;
        };
        let mut trade = trade;

        // A resting stop order executes a stop-loss at the broker
        let broker_handles_exit = reason == ExitReason::StopLossHit && stop_order_id.is_some();
        if !broker_handles_exit {
            if let Some(id) = &stop_order_id {
                if let Err(e) = self.broker.cancel_order(id) {
                    error!(order_id = %id, error = %e, "Stop cancel failed");
                }
            }
            let order = self.market_exit(&trade.symbol, trade.lots_outstanding);
            if let Err(e) = self.broker.place_order(&order) {
                error!(symbol = %trade.symbol, error = %e, "Exit order failed");
            }
        }

        let final_leg = self.leg_pnl(&trade, price, trade.lots_outstanding);
        let total = trade.partial_pnl() + final_leg;
        trade.lots_outstanding = 0;
        trade.status = TradeStatus::Exited;

        if let Some(risk) = self.risk.as_mut() {
            risk.record_realized(final_leg);
        }
        info!(
            symbol = %trade.symbol,
            reason = %reason,
            price,
            pnl = total,
            "Trade closed"
        );
        self.completed.push(CompletedTrade {
            trade,
            exit_price: price,
            exit_time: at,
            pnl: total,
            exit_reason: reason,
        });
    }
}

/// Option of the given class whose last price is closest to `reference`.
///
/// Earlier quotes win ties.
pub fn select_instrument(quotes: &[(String, f64)], kind: OptionKind, reference: f64) -> Option<(String, f64)> {
    let mut best: Option<(&String, f64)> = None;
    for (symbol, price) in quotes {
        if *price <= 0.0 || OptionKind::from_symbol(symbol) != Some(kind) {
            continue;
        }
        let closer = match best {
            None => true,
            Some((_, best_price)) => (price - reference).abs() < (best_price - reference).abs(),
        };
        if closer {
            best = Some((symbol, *price));
        }
    }
    best.map(|(s, p)| (s.clone(), p))
}

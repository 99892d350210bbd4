//! Risk Manager - Lot sizing and the daily loss limit
//!
//! Implements:
//! - Capital-tiered lot sizing with weekday rules
//! - Daily realized P&L tracking
//! - Session halt once the daily loss limit is breached

use chrono::Weekday;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Risk configuration
#[derive(Debug, Clone)]
pub struct RiskPolicy {
    /// Daily loss limit as a fraction of capital (e.g., 0.05 = 5%)
    pub daily_loss_pct: f64,
    /// Capital from which two lots are traded
    pub tier_one_capital: f64,
    /// Capital from which extra lots are added
    pub tier_two_capital: f64,
    /// Capital per extra lot above `tier_two_capital`
    pub capital_per_extra_lot: f64,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            daily_loss_pct: 0.05,
            tier_one_capital: 50_000.0,
            tier_two_capital: 80_000.0,
            capital_per_extra_lot: 30_000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizingDecision {
    /// No trading for the rest of the session
    HaltSession,
    Lots(u32),
}

impl RiskPolicy {
    /// Lots for a new entry on the given weekday.
    ///
    /// Mondays halt the session, Wednesdays trade a single lot.
    pub fn lots_for(&self, capital: f64, weekday: Weekday) -> SizingDecision {
        match weekday {
            Weekday::Mon => SizingDecision::HaltSession,
            Weekday::Wed => SizingDecision::Lots(1),
            _ => SizingDecision::Lots(self.lots_for_capital(capital)),
        }
    }

    pub fn lots_for_capital(&self, capital: f64) -> u32 {
        if capital < self.tier_one_capital {
            1
        } else if capital < self.tier_two_capital {
            2
        } else {
            let per_lot = self.capital_per_extra_lot.max(1.0);
            ((capital - self.tier_two_capital) / per_lot).floor() as u32 + 2
        }
    }
}

/// Capital and daily loss state for the current session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskState {
    pub capital: f64,
    pub daily_pnl: f64,
    /// Signed threshold, a negative share of capital
    pub daily_loss_limit: f64,
    pub trading_halted: bool,
}

impl RiskState {
    pub fn new(capital: f64, policy: &RiskPolicy) -> Self {
        Self {
            capital,
            daily_pnl: 0.0,
            daily_loss_limit: -(capital * policy.daily_loss_pct),
            trading_halted: false,
        }
    }

    /// Book realized P&L. Returns true when this booking halted trading.
    pub fn record_realized(&mut self, pnl: f64) -> bool {
        self.daily_pnl += pnl;
        if !self.trading_halted && self.daily_pnl <= self.daily_loss_limit {
            self.trading_halted = true;
            warn!(
                daily_pnl = self.daily_pnl,
                limit = self.daily_loss_limit,
                "Daily loss limit reached, trading halted"
            );
            return true;
        }
        false
    }

    pub fn halt(&mut self) {
        self.trading_halted = true;
    }

    pub fn can_trade(&self) -> bool {
        !self.trading_halted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lot_tiers() {
        let policy = RiskPolicy::default();
        assert_eq!(policy.lots_for_capital(30_000.0), 1);
        assert_eq!(policy.lots_for_capital(49_999.0), 1);
        assert_eq!(policy.lots_for_capital(50_000.0), 2);
        assert_eq!(policy.lots_for_capital(79_999.0), 2);
        assert_eq!(policy.lots_for_capital(80_000.0), 2);
        assert_eq!(policy.lots_for_capital(110_000.0), 3);
        assert_eq!(policy.lots_for_capital(139_999.0), 3);
        assert_eq!(policy.lots_for_capital(140_000.0), 4);
    }

    #[test]
    fn test_weekday_rules() {
        let policy = RiskPolicy::default();
        assert_eq!(policy.lots_for(200_000.0, Weekday::Mon), SizingDecision::HaltSession);
        assert_eq!(policy.lots_for(200_000.0, Weekday::Wed), SizingDecision::Lots(1));
        assert_eq!(policy.lots_for(110_000.0, Weekday::Tue), SizingDecision::Lots(3));
    }

    #[test]
    fn test_daily_loss_limit() {
        let mut state = RiskState::new(30_000.0, &RiskPolicy::default());
        assert_eq!(state.daily_loss_limit, -1_500.0);
        assert!(!state.record_realized(-1_000.0));
        assert!(state.can_trade());
        assert!(state.record_realized(-500.0));
        assert!(!state.can_trade());
        // Already halted, no second transition
        assert!(!state.record_realized(-10.0));
    }

    #[test]
    fn test_loss_limit_is_inclusive_and_signed() {
        let policy = RiskPolicy::default();
        let mut state = RiskState::new(60_000.0, &policy);
        assert_eq!(state.daily_loss_limit, -3_000.0);
        assert!(!state.record_realized(-2_999.5));
        assert!(state.record_realized(-0.5));
        assert_eq!(state.daily_pnl, state.daily_loss_limit);

        let zero = RiskState::new(0.0, &policy);
        assert_eq!(zero.daily_loss_limit, 0.0);
    }

    #[test]
    fn test_profit_does_not_halt() {
        let mut state = RiskState::new(30_000.0, &RiskPolicy::default());
        state.record_realized(2_000.0);
        state.record_realized(-3_000.0);
        assert!(state.can_trade());
    }
}

use serde::{Deserialize, Serialize};

use crate::domain::{PositionId, TradeId};

use super::trade::Trade;
use super::types::{ExitReason, Side};

/// The single open position an isolated-margin, one-way account may hold
/// (spec §3). Mutated in place by mark-to-market; consumed by `close` to
/// produce the terminal `Trade` record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub position_id: PositionId,
    pub side: Side,
    pub entry_price: f64,
    pub size_units: f64,
    pub notional_entry: f64,
    pub entry_fee: f64,
    pub sl: Option<f64>,
    pub tp: Option<f64>,
    pub opened_ts: i64,
    pub entry_bar_index: usize,
    pub max_price: f64,
    pub min_price: f64,
}

impl Position {
    pub fn open(
        position_id: PositionId,
        side: Side,
        entry_price: f64,
        size_units: f64,
        entry_fee: f64,
        sl: Option<f64>,
        tp: Option<f64>,
        opened_ts: i64,
        entry_bar_index: usize,
    ) -> Self {
        Self {
            position_id,
            side,
            entry_price,
            size_units,
            notional_entry: entry_price * size_units,
            entry_fee,
            sl,
            tp,
            opened_ts,
            entry_bar_index,
            max_price: entry_price,
            min_price: entry_price,
        }
    }

    /// Signed unrealized PnL in USDT at `mark_price`.
    pub fn unrealized_pnl(&self, mark_price: f64) -> f64 {
        self.side.sign() * (mark_price - self.entry_price) * self.size_units
    }

    pub fn used_margin(&self, imr: f64) -> f64 {
        self.notional_entry * imr
    }

    /// Updates the running favorable/adverse excursion bounds this bar's
    /// high/low touched, used for `Trade.mae`/`Trade.mfe` on close.
    pub fn track_excursion(&mut self, high: f64, low: f64) {
        self.max_price = self.max_price.max(high);
        self.min_price = self.min_price.min(low);
    }

    /// Consumes the position into a closed `Trade` (spec §3 lifecycle:
    /// "destroyed by a close fill").
    pub fn close(
        self,
        trade_id: TradeId,
        exit_price: f64,
        exit_ts: i64,
        exit_bar_idx: usize,
        exit_reason: ExitReason,
        exit_fee: f64,
    ) -> Trade {
        let gross_pnl = self.side.sign() * (exit_price - self.entry_price) * self.size_units;
        let fees_paid = self.entry_fee + exit_fee;
        let net_pnl = gross_pnl - fees_paid;

        let (mae, mfe) = match self.side {
            Side::Long => (
                (self.entry_price - self.min_price).max(0.0) * self.size_units,
                (self.max_price - self.entry_price).max(0.0) * self.size_units,
            ),
            Side::Short => (
                (self.max_price - self.entry_price).max(0.0) * self.size_units,
                (self.entry_price - self.min_price).max(0.0) * self.size_units,
            ),
        };

        Trade {
            trade_id,
            side: self.side,
            entry_ts: self.opened_ts,
            exit_ts,
            entry_price: self.entry_price,
            exit_price,
            size_units: self.size_units,
            gross_pnl,
            fees_paid,
            net_pnl,
            exit_reason,
            entry_bar_idx: self.entry_bar_index,
            exit_bar_idx,
            mae,
            mfe,
            sl: self.sl,
            tp: self.tp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_unrealized_pnl_is_positive_when_price_rises() {
        let pos = Position::open(PositionId(0), Side::Long, 100.0, 1.0, 0.0, None, None, 0, 0);
        assert_eq!(pos.unrealized_pnl(110.0), 10.0);
    }

    #[test]
    fn short_unrealized_pnl_is_positive_when_price_falls() {
        let pos = Position::open(PositionId(0), Side::Short, 100.0, 1.0, 0.0, None, None, 0, 0);
        assert_eq!(pos.unrealized_pnl(90.0), 10.0);
    }

    #[test]
    fn close_nets_fees_out_of_gross_pnl() {
        let pos = Position::open(PositionId(0), Side::Long, 100.0, 1.0, 0.06, None, None, 0, 0);
        let trade = pos.close(TradeId(0), 110.0, 1_000, 1, ExitReason::Tp, 0.066);
        assert_eq!(trade.gross_pnl, 10.0);
        assert!((trade.net_pnl - (10.0 - 0.126)).abs() < 1e-9);
    }
}

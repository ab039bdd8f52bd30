use serde::{Deserialize, Serialize};

use crate::domain::TradeId;

use super::types::{ExitReason, Side};

/// A closed position (spec §3 `Trade`). Append-only: once emitted by
/// `Position::close`, a `Trade` is never mutated again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: TradeId,
    pub side: Side,
    pub entry_ts: i64,
    pub exit_ts: i64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub size_units: f64,
    pub gross_pnl: f64,
    pub fees_paid: f64,
    pub net_pnl: f64,
    pub exit_reason: ExitReason,
    pub entry_bar_idx: usize,
    pub exit_bar_idx: usize,
    pub mae: f64,
    pub mfe: f64,
    pub sl: Option<f64>,
    pub tp: Option<f64>,
}

impl Trade {
    pub fn pnl_pct(&self, notional_entry: f64) -> f64 {
        if notional_entry == 0.0 {
            0.0
        } else {
            self.net_pnl / notional_entry * 100.0
        }
    }

    pub fn duration_bars(&self) -> usize {
        self.exit_bar_idx.saturating_sub(self.entry_bar_idx)
    }
}

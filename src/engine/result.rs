//! The hot loop's output types (spec §4.6 step i, §6 artifact columns).

use serde::{Deserialize, Serialize};

use crate::exchange::Trade;

/// One row of `equity.parquet` (spec §6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EquityPoint {
    pub ts: i64,
    pub equity_usdt: f64,
    pub drawdown_abs_usdt: f64,
    pub drawdown_pct: f64,
}

/// One row of `account_curve.parquet` (spec §6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AccountCurvePoint {
    pub ts: i64,
    pub equity_usdt: f64,
    pub used_margin_usdt: f64,
    pub free_margin_usdt: f64,
    pub available_balance_usdt: f64,
    pub maintenance_margin_usdt: f64,
    pub has_position: bool,
    pub entries_disabled: bool,
}

/// Why the hot loop stopped (spec §5, "Engine control"). Liquidation is
/// deliberately absent here: per the Open Question resolution in spec §9,
/// liquidation closes the position (and may latch entries off) but is not
/// itself an engine-level stop condition — the loop keeps stepping bars
/// until `end_of_data`, `equity_floor`, `starvation`, or a cancel arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EquityFloor,
    Starvation,
    EndOfData,
    Cancelled,
}

/// The complete output of one backtest run, before artifact serialization.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub account_curve: Vec<AccountCurvePoint>,
    pub stop_reason: StopReason,
    pub sim_start_idx: usize,
    pub total_bars: usize,
    pub total_funding_pnl_usdt: f64,
    pub rejection_counts: crate::exchange::RejectionCounts,
}

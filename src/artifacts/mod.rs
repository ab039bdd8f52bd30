//! Determinism & artifact emission (spec §2 C10, §4.7, §6): turns a
//! `RunResult` into the persisted run layout — three parquet files, three
//! JSON files, and the hashes that make the run reproducible. Writes
//! directly via `ParquetWriter::new(file).finish(&mut df)` rather than a
//! lazy sink (see DESIGN.md for the tradeoff).

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use polars::df;
use polars::prelude::{ParquetCompression, ParquetWriter};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::engine::{AccountCurvePoint, EquityPoint, RunResult, StopReason};
use crate::error::{ArtifactError, BacktestError};
use crate::exchange::{ExitReason, RejectionCounts, Side, Trade};
use crate::idea_card::{hash_value, IdeaCard};
use crate::preflight::PreflightReport;

const TRADES_FILE: &str = "trades.parquet";
const EQUITY_FILE: &str = "equity.parquet";
const ACCOUNT_CURVE_FILE: &str = "account_curve.parquet";
const RESULT_FILE: &str = "result.json";
const PIPELINE_SIGNATURE_FILE: &str = "pipeline_signature.json";
const PREFLIGHT_REPORT_FILE: &str = "preflight_report.json";

fn side_str(side: Side) -> &'static str {
    match side {
        Side::Long => "long",
        Side::Short => "short",
    }
}

fn exit_reason_str(reason: ExitReason) -> &'static str {
    match reason {
        ExitReason::Tp => "tp",
        ExitReason::Sl => "sl",
        ExitReason::Signal => "signal",
        ExitReason::Liquidation => "liquidation",
        ExitReason::EndOfData => "end_of_data",
        ExitReason::EquityFloor => "equity_floor",
        ExitReason::Starvation => "starvation",
    }
}

/// Where a closed trade's exit price came from (spec §6 `trades.exit_price_source`).
/// Derived from `exit_reason` rather than stored on `Trade`: it is fully
/// determined by the reason and would otherwise be redundant state.
fn exit_price_source(reason: ExitReason) -> &'static str {
    match reason {
        ExitReason::Tp => "take_profit_level",
        ExitReason::Sl => "stop_loss_level",
        ExitReason::Signal => "market_fill",
        ExitReason::Liquidation => "mark_price",
        ExitReason::EndOfData | ExitReason::EquityFloor | ExitReason::Starvation => "bar_close",
    }
}

fn stop_reason_str(reason: StopReason) -> &'static str {
    match reason {
        StopReason::EquityFloor => "equity_floor_stop",
        StopReason::Starvation => "starvation_stop",
        StopReason::EndOfData => "end_of_data",
        StopReason::Cancelled => "cancelled",
    }
}

/// Summary statistics over the closed trades and equity curve (spec §6
/// `result.json.metrics`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metrics {
    pub total_trades: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub avg_win_usdt: f64,
    pub avg_loss_usdt: f64,
    pub max_drawdown_abs_usdt: f64,
    pub max_drawdown_pct: f64,
    pub return_volatility_ratio: f64,
    pub total_funding_pnl_usdt: f64,
    pub total_fees_paid_usdt: f64,
    pub rejection_counts: RejectionCounts,
}

fn compute_metrics(result: &RunResult) -> Metrics {
    let total_trades = result.trades.len();
    let wins: Vec<&Trade> = result.trades.iter().filter(|t| t.net_pnl > 0.0).collect();
    let losses: Vec<&Trade> = result.trades.iter().filter(|t| t.net_pnl < 0.0).collect();

    let win_rate = if total_trades > 0 { wins.len() as f64 / total_trades as f64 } else { 0.0 };
    let gross_profit: f64 = wins.iter().map(|t| t.net_pnl).sum();
    let gross_loss: f64 = losses.iter().map(|t| t.net_pnl.abs()).sum();
    let profit_factor = if gross_loss > 0.0 { gross_profit / gross_loss } else { f64::INFINITY };
    let avg_win_usdt = if !wins.is_empty() { gross_profit / wins.len() as f64 } else { 0.0 };
    let avg_loss_usdt = if !losses.is_empty() { gross_loss / losses.len() as f64 } else { 0.0 };
    let total_fees_paid_usdt: f64 = result.trades.iter().map(|t| t.fees_paid).sum();

    let max_drawdown_abs_usdt = result
        .equity_curve
        .iter()
        .map(|p| p.drawdown_abs_usdt)
        .fold(0.0, f64::max);
    let max_drawdown_pct = result
        .equity_curve
        .iter()
        .map(|p| p.drawdown_pct)
        .fold(0.0, f64::max);

    let returns: Vec<f64> = result
        .equity_curve
        .windows(2)
        .map(|pair| pair[1].equity_usdt - pair[0].equity_usdt)
        .collect();
    let mean_return = if !returns.is_empty() { returns.iter().sum::<f64>() / returns.len() as f64 } else { 0.0 };
    let variance = if returns.len() > 1 {
        returns.iter().map(|r| (r - mean_return).powi(2)).sum::<f64>() / (returns.len() - 1) as f64
    } else {
        0.0
    };
    let volatility = variance.sqrt();
    let return_volatility_ratio = if volatility > 0.0 { mean_return / volatility } else { 0.0 };

    Metrics {
        total_trades,
        win_rate,
        profit_factor,
        avg_win_usdt,
        avg_loss_usdt,
        max_drawdown_abs_usdt,
        max_drawdown_pct,
        return_volatility_ratio,
        total_funding_pnl_usdt: result.total_funding_pnl_usdt,
        total_fees_paid_usdt,
        rejection_counts: result.rejection_counts,
    }
}

/// `result.json` (spec §6): the top-level, human- and machine-readable
/// summary of a run. Every hash named here is reproducible from the
/// persisted parquet files alone (spec §8, "Round-trip").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSummary {
    pub run_id: String,
    pub idea_hash: String,
    pub trades_hash: String,
    pub equity_hash: String,
    pub run_hash: String,
    pub artifact_hashes: BTreeMap<String, String>,
    pub window: Window,
    pub total_bars: usize,
    pub total_trades: usize,
    pub final_equity_usdt: f64,
    pub stop_reason: String,
    pub metrics: Metrics,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Window {
    pub start: i64,
    pub end: i64,
}

#[derive(Serialize)]
struct RunHashInput<'a> {
    idea_hash: &'a str,
    trades_hash: &'a str,
    equity_hash: &'a str,
}

fn trades_df(trades: &[Trade], symbol: &str) -> polars::prelude::PolarsResult<polars::frame::DataFrame> {
    let trade_id: Vec<i64> = trades.iter().map(|t| t.trade_id.0 as i64).collect();
    let symbol_col: Vec<&str> = trades.iter().map(|_| symbol).collect();
    let side: Vec<&str> = trades.iter().map(|t| side_str(t.side)).collect();
    let entry_time: Vec<i64> = trades.iter().map(|t| t.entry_ts).collect();
    let exit_time: Vec<i64> = trades.iter().map(|t| t.exit_ts).collect();
    let entry_price: Vec<f64> = trades.iter().map(|t| t.entry_price).collect();
    let exit_price: Vec<f64> = trades.iter().map(|t| t.exit_price).collect();
    let qty: Vec<f64> = trades.iter().map(|t| t.size_units).collect();
    let pnl: Vec<f64> = trades.iter().map(|t| t.net_pnl).collect();
    let pnl_pct: Vec<f64> = trades.iter().map(|t| t.pnl_pct(t.entry_price * t.size_units)).collect();
    let entry_bar_index: Vec<i64> = trades.iter().map(|t| t.entry_bar_idx as i64).collect();
    let exit_bar_index: Vec<i64> = trades.iter().map(|t| t.exit_bar_idx as i64).collect();
    let duration_bars: Vec<i64> = trades.iter().map(|t| t.duration_bars() as i64).collect();
    let exit_reason: Vec<&str> = trades.iter().map(|t| exit_reason_str(t.exit_reason)).collect();
    let exit_price_source_col: Vec<&str> = trades.iter().map(|t| exit_price_source(t.exit_reason)).collect();
    let stop_loss: Vec<Option<f64>> = trades.iter().map(|t| t.sl).collect();
    let take_profit: Vec<Option<f64>> = trades.iter().map(|t| t.tp).collect();

    df![
        "trade_id" => trade_id,
        "symbol" => symbol_col,
        "side" => side,
        "entry_time" => entry_time,
        "exit_time" => exit_time,
        "entry_price" => entry_price,
        "exit_price" => exit_price,
        "qty" => qty,
        "pnl" => pnl,
        "pnl_pct" => pnl_pct,
        "entry_bar_index" => entry_bar_index,
        "exit_bar_index" => exit_bar_index,
        "duration_bars" => duration_bars,
        "exit_reason" => exit_reason,
        "exit_price_source" => exit_price_source_col,
        "stop_loss" => stop_loss,
        "take_profit" => take_profit,
    ]
}

fn equity_df(points: &[EquityPoint]) -> polars::prelude::PolarsResult<polars::frame::DataFrame> {
    let ts: Vec<i64> = points.iter().map(|p| p.ts).collect();
    let equity: Vec<f64> = points.iter().map(|p| p.equity_usdt).collect();
    let drawdown_abs: Vec<f64> = points.iter().map(|p| p.drawdown_abs_usdt).collect();
    let drawdown_pct: Vec<f64> = points.iter().map(|p| p.drawdown_pct).collect();
    df![
        "ts" => ts,
        "equity" => equity,
        "drawdown_abs" => drawdown_abs,
        "drawdown_pct" => drawdown_pct,
    ]
}

fn account_curve_df(points: &[AccountCurvePoint]) -> polars::prelude::PolarsResult<polars::frame::DataFrame> {
    let ts: Vec<i64> = points.iter().map(|p| p.ts).collect();
    let equity_usdt: Vec<f64> = points.iter().map(|p| p.equity_usdt).collect();
    let used_margin_usdt: Vec<f64> = points.iter().map(|p| p.used_margin_usdt).collect();
    let free_margin_usdt: Vec<f64> = points.iter().map(|p| p.free_margin_usdt).collect();
    let available_balance_usdt: Vec<f64> = points.iter().map(|p| p.available_balance_usdt).collect();
    let maintenance_margin_usdt: Vec<f64> = points.iter().map(|p| p.maintenance_margin_usdt).collect();
    let has_position: Vec<bool> = points.iter().map(|p| p.has_position).collect();
    let entries_disabled: Vec<bool> = points.iter().map(|p| p.entries_disabled).collect();
    df![
        "ts" => ts,
        "equity_usdt" => equity_usdt,
        "used_margin_usdt" => used_margin_usdt,
        "free_margin_usdt" => free_margin_usdt,
        "available_balance_usdt" => available_balance_usdt,
        "maintenance_margin_usdt" => maintenance_margin_usdt,
        "has_position" => has_position,
        "entries_disabled" => entries_disabled,
    ]
}

/// Writes one `DataFrame` to `path` as snappy-compressed parquet (spec §6:
/// "snappy compression, no index column, lossless float64, stable column
/// ordering"). `df!` preserves insertion order and polars never emits a row
/// index column, so both of those fall out of construction rather than
/// needing an explicit setting here.
fn write_parquet(df: &mut polars::frame::DataFrame, path: &Path) -> Result<(), ArtifactError> {
    let mut file = File::create(path)?;
    ParquetWriter::new(&mut file)
        .with_compression(ParquetCompression::Snappy)
        .finish(df)?;
    Ok(())
}

fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<(), ArtifactError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

/// Full SHA-256 hex digest of a file's bytes (spec §6 `artifact_hashes`).
/// Distinct from `idea_card::short_hash`'s truncated 16-hex content hash:
/// this one hashes the literal bytes on disk, for integrity checking of
/// the artifact itself rather than the data it encodes.
fn sha256_hex_file(path: &Path) -> Result<String, ArtifactError> {
    let mut file = File::open(path)?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    let mut hasher = Sha256::new();
    hasher.update(&buf);
    let digest = hasher.finalize();
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}

/// Writes the full persisted run layout (spec §6) into `out_dir`, creating
/// it if missing, and returns the `result.json` summary that was also
/// written to disk.
pub fn write_run(
    result: &RunResult,
    idea: &IdeaCard,
    run_id: &str,
    window: Window,
    preflight: &PreflightReport,
    out_dir: &Path,
) -> Result<ResultSummary, BacktestError> {
    std::fs::create_dir_all(out_dir).map_err(ArtifactError::from)?;

    let idea_hash = idea.idea_hash();
    let trades_hash = hash_value(&result.trades).map_err(ArtifactError::from)?;
    let equity_hash = hash_value(&result.equity_curve).map_err(ArtifactError::from)?;
    let run_hash = hash_value(&RunHashInput {
        idea_hash: &idea_hash,
        trades_hash: &trades_hash,
        equity_hash: &equity_hash,
    })
    .map_err(ArtifactError::from)?;

    let trades_path = out_dir.join(TRADES_FILE);
    let equity_path = out_dir.join(EQUITY_FILE);
    let account_curve_path = out_dir.join(ACCOUNT_CURVE_FILE);

    write_parquet(&mut trades_df(&result.trades, idea.symbol.as_str()).map_err(ArtifactError::from)?, &trades_path)?;
    write_parquet(&mut equity_df(&result.equity_curve).map_err(ArtifactError::from)?, &equity_path)?;
    write_parquet(&mut account_curve_df(&result.account_curve).map_err(ArtifactError::from)?, &account_curve_path)?;

    let mut artifact_hashes = BTreeMap::new();
    for (name, path) in [
        (TRADES_FILE, &trades_path),
        (EQUITY_FILE, &equity_path),
        (ACCOUNT_CURVE_FILE, &account_curve_path),
    ] {
        artifact_hashes.insert(name.to_string(), sha256_hex_file(path)?);
    }

    let summary = ResultSummary {
        run_id: run_id.to_string(),
        idea_hash,
        trades_hash,
        equity_hash,
        run_hash,
        artifact_hashes,
        window,
        total_bars: result.total_bars,
        total_trades: result.trades.len(),
        final_equity_usdt: result.equity_curve.last().map(|p| p.equity_usdt).unwrap_or(idea.account.initial_equity_usdt),
        stop_reason: stop_reason_str(result.stop_reason).to_string(),
        metrics: compute_metrics(result),
    };

    write_json(&summary, &out_dir.join(RESULT_FILE)).map_err(BacktestError::from)?;
    write_json(&pipeline_signature(idea), &out_dir.join(PIPELINE_SIGNATURE_FILE)).map_err(BacktestError::from)?;
    write_json(preflight, &out_dir.join(PREFLIGHT_REPORT_FILE)).map_err(BacktestError::from)?;

    Ok(summary)
}

/// `pipeline_signature.json`: the frozen `IdeaCard` plus its hash, kept
/// alongside `result.json` so a run's exact configuration is recoverable
/// without re-deriving it from whatever source produced the `IdeaCard`.
#[derive(Serialize)]
struct PipelineSignature<'a> {
    idea_hash: String,
    idea: &'a IdeaCard,
}

fn pipeline_signature(idea: &IdeaCard) -> PipelineSignature<'_> {
    PipelineSignature {
        idea_hash: idea.idea_hash(),
        idea,
    }
}

/// Absolute path a caller can pass to `write_run` for a given run id under
/// a base runs directory (`<base>/<run_id>/`).
pub fn run_dir(base: &Path, run_id: &str) -> PathBuf {
    base.join(run_id)
}

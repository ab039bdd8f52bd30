//! The bar-indexed hot loop (spec §2 C9, §4.6): drives the `FeedStore`s and
//! `SimulatedExchange` forward one exec bar at a time, evaluating the
//! `IdeaCard`'s rules and sizing policy at each step. Single-threaded,
//! purely sequential, no suspension points (spec §5).

mod cancel;
mod result;
mod signal;
mod sizing;

pub use cancel::CancelToken;
pub use result::{AccountCurvePoint, EquityPoint, RunResult, StopReason};

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::domain::{Bar, FundingEvent};
use crate::error::{BacktestError, ConfigError, DataError};
use crate::exchange::{ExchangeConfig, ExitReason, OrderType, Side, SimulatedExchange};
use crate::feed_store::FeedStore;
use crate::idea_card::IdeaCard;
use crate::snapshot::{HistoryWindows, RuntimeSnapshotView};
use crate::time::TfRole;

/// Minimum number of simulation bars the run must have after `sim_start_idx`
/// (spec §4.6 step 1).
pub const MIN_SIM_BARS: usize = 10;

/// Default bound on per-role history windows when `IdeaCard` doesn't widen
/// it (spec §5, "bounded history deques ... typically ≤ 200").
pub const DEFAULT_HISTORY_WINDOW: usize = 200;

fn exchange_config_from_idea(idea: &IdeaCard) -> ExchangeConfig {
    ExchangeConfig {
        initial_margin_rate: idea.account.initial_margin_rate(),
        maintenance_margin_rate: idea.account.maintenance_margin_rate,
        taker_fee_rate: idea.account.taker_fee_rate,
        include_est_close_fee_in_entry_gate: idea.account.include_est_close_fee_in_entry_gate,
        slippage_bps: 0.0,
        order_book_capacity: 100,
        latch_entries_on_liquidation: idea.stops.latch_entries_on_liquidation,
    }
}

/// Earliest exec-bar index at which `role_store`'s own warmup/validity
/// requirement is satisfied, expressed in exec-bar units (spec §4.6 step 1,
/// "mapped through exec-TF indexing"). `configured_warmup_bars` is the
/// role's own `TfConfig::max_warmup_bars` — the registry-derived formula
/// folded together with any explicit `warmup_bars` override — not the
/// narrower `FeedStore::max_warmup_bars`, which only ever sees the
/// registry-derived half.
fn min_exec_idx_for_role_ready(role_store: &FeedStore, exec: &FeedStore, configured_warmup_bars: usize) -> usize {
    let need_idx = role_store.first_fully_valid_idx().max(configured_warmup_bars);
    match role_store.bar(need_idx) {
        Some(bar) => exec
            .bars()
            .iter()
            .position(|b| b.ts_close >= bar.ts_close)
            .unwrap_or(exec.len()),
        None => exec.len(),
    }
}

/// `sim_start_idx` must honor the same config-aware warmup value
/// `pipeline::load_role` used to size the data fetch window
/// (`TfConfig::max_warmup_bars`, which folds in an explicit `warmup_bars`
/// override); using the registry-only `FeedStore::max_warmup_bars` here
/// would let the strategy start evaluating before a configured override has
/// actually elapsed (spec §4.6 step 1). A role whose `FeedStore` is present
/// without a matching `TfConfig` is a caller bug, not a silent zero-warmup
/// default — it raises `MissingWarmupConfig` rather than guessing.
fn derive_sim_start_idx(
    idea: &IdeaCard,
    exec: &FeedStore,
    med_tf: Option<&FeedStore>,
    high_tf: Option<&FeedStore>,
) -> Result<usize, ConfigError> {
    let mut start = idea
        .tf_configs
        .exec
        .max_warmup_bars()
        .max(exec.first_fully_valid_idx())
        .max(idea.tf_configs.exec.delay_bars);

    if let Some(store) = med_tf {
        let configured = idea
            .tf_configs
            .get(TfRole::MedTf)
            .ok_or_else(|| ConfigError::MissingWarmupConfig(TfRole::MedTf.to_string()))?
            .max_warmup_bars();
        start = start.max(min_exec_idx_for_role_ready(store, exec, configured));
    }
    if let Some(store) = high_tf {
        let configured = idea
            .tf_configs
            .get(TfRole::HighTf)
            .ok_or_else(|| ConfigError::MissingWarmupConfig(TfRole::HighTf.to_string()))?
            .max_warmup_bars();
        start = start.max(min_exec_idx_for_role_ready(store, exec, configured));
    }
    Ok(start)
}

/// Every declared indicator value at `idx`, skipping still-NaN columns —
/// the same permissiveness as `FeedStore::get_indicator`.
fn features_at(store: &FeedStore, idx: usize) -> BTreeMap<String, f64> {
    store
        .indicator_keys()
        .filter_map(|key| store.get_indicator(key, idx).map(|v| (key.to_string(), v)))
        .collect()
}

/// Pushes `role`'s current bar into `history` iff its cursor actually
/// advanced this step (spec §4.6 steps 2/3.f, "update history windows").
/// A role whose higher-TF bar hasn't closed yet contributes nothing new.
fn push_history(history: &mut HistoryWindows, snapshot: &RuntimeSnapshotView, role: TfRole, store: &FeedStore) {
    if snapshot.staleness(role) {
        return;
    }
    if let Some(idx) = snapshot.current_idx(role) {
        if let Some(&bar) = store.bar(idx) {
            history.push(role, bar, &features_at(store, idx));
        }
    }
}

/// Funding events whose `ts` falls in `(prev_ts_close, bar_ts_close]`
/// (spec §4.6 step 3.b). `funding` must already be sorted ascending by `ts`.
fn funding_window(funding: &[FundingEvent], prev_ts_close: i64, bar_ts_close: i64) -> &[FundingEvent] {
    let start = funding.partition_point(|e| e.ts <= prev_ts_close);
    let end = funding.partition_point(|e| e.ts <= bar_ts_close);
    &funding[start..end]
}

/// Runs the compiled `idea` against the given feed stores to completion (or
/// until a stop condition or cancellation fires). `funding` must be sorted
/// ascending by `ts`; pass an empty slice if `idea.sim.funding_enabled` is
/// `false` or no funding data is available.
pub fn run(
    idea: &IdeaCard,
    exec: &FeedStore,
    med_tf: Option<&FeedStore>,
    high_tf: Option<&FeedStore>,
    funding: &[FundingEvent],
    cancel: &CancelToken,
) -> Result<RunResult, BacktestError> {
    let sim_start_idx = derive_sim_start_idx(idea, exec, med_tf, high_tf)?;
    if exec.len() < sim_start_idx || exec.len() - sim_start_idx < MIN_SIM_BARS {
        return Err(DataError::InsufficientSimBars {
            min_required: MIN_SIM_BARS,
            available: exec.len().saturating_sub(sim_start_idx),
        }
        .into());
    }
    info!(sim_start_idx, total_bars = exec.len(), "starting simulation");

    let mut exchange = SimulatedExchange::new(exchange_config_from_idea(idea), idea.account.initial_equity_usdt);

    let mut roles = vec![TfRole::Exec];
    if med_tf.is_some() {
        roles.push(TfRole::MedTf);
    }
    if high_tf.is_some() {
        roles.push(TfRole::HighTf);
    }
    let mut history = HistoryWindows::new(&roles, DEFAULT_HISTORY_WINDOW);

    // Warmup phase: advance indices only, no strategy evaluation, no orders
    // (spec §4.6 step 2). The snapshot view is rebuilt every bar with the
    // same discipline as the simulation phase so HTF/MTF cursors land in
    // the same place they would by step sim_start_idx regardless. History
    // windows are pushed to here too, so they're already populated by
    // `sim_start_idx` instead of starting empty at the first sim bar.
    for i in 0..sim_start_idx.min(exec.len()) {
        let bar = exec.bar(i).expect("i < exec.len()");
        let mut snapshot = RuntimeSnapshotView::new(exec, med_tf, high_tf, i, bar.close);
        if med_tf.is_some() {
            snapshot.advance_role(TfRole::MedTf, bar.ts_close);
        }
        if high_tf.is_some() {
            snapshot.advance_role(TfRole::HighTf, bar.ts_close);
        }
        push_history(&mut history, &snapshot, TfRole::Exec, exec);
        if let Some(store) = med_tf {
            push_history(&mut history, &snapshot, TfRole::MedTf, store);
        }
        if let Some(store) = high_tf {
            push_history(&mut history, &snapshot, TfRole::HighTf, store);
        }
    }

    let funding_enabled = idea.sim.funding_enabled;
    let starvation_limit = idea.stops.starvation_bars;

    let mut trades = Vec::new();
    let mut equity_curve = Vec::with_capacity(exec.len() - sim_start_idx);
    let mut account_curve = Vec::with_capacity(exec.len() - sim_start_idx);
    let mut peak_equity = idea.account.initial_equity_usdt;
    let mut bars_without_position: u32 = 0;
    let mut stop_reason = StopReason::EndOfData;
    let mut last_bar_idx = sim_start_idx;
    let mut total_funding_pnl_usdt = 0.0;

    'sim: for i in sim_start_idx..exec.len() {
        if cancel.is_cancelled() {
            warn!(bar_index = i, "cancellation observed at top of bar");
            stop_reason = StopReason::Cancelled;
            last_bar_idx = i.saturating_sub(1);
            break 'sim;
        }

        let bar = exec.bar(i).expect("i < exec.len()");
        let prev_bar = exec.bar(i.wrapping_sub(1)).filter(|_| i > 0);
        last_bar_idx = i;

        let events = if funding_enabled {
            let prev_ts_close = prev_bar.map(|b| b.ts_close).unwrap_or(i64::MIN);
            funding_window(funding, prev_ts_close, bar.ts_close)
        } else {
            &[]
        };

        let step = exchange.process_bar(bar, prev_bar, i, events);
        total_funding_pnl_usdt += step.funding_pnl_usdt;
        trades.extend(step.closed_trades);

        // Stop-condition precedence (spec §4.6 step 3.d). Liquidation is
        // handled inside `process_bar` itself (it closes the position and,
        // per config, latches `entries_disabled`) rather than ending the
        // run — see the Open Question resolution in `engine::result`.
        let equity = exchange.ledger().equity_usdt;
        if equity <= idea.stops.equity_floor_usdt {
            info!(bar_index = i, equity, "equity floor stop");
            exchange.cancel_all(bar.ts_close);
            if let Some(trade) = exchange.force_close(bar.close, bar.ts_close, i, ExitReason::EquityFloor) {
                trades.push(trade);
            }
            stop_reason = StopReason::EquityFloor;
            record_points(&exchange, bar.ts_close, &mut peak_equity, &mut equity_curve, &mut account_curve);
            break 'sim;
        }
        if exchange.position().is_none() && bars_without_position >= starvation_limit {
            info!(bar_index = i, bars_without_position, "starvation stop");
            exchange.cancel_all(bar.ts_close);
            stop_reason = StopReason::Starvation;
            record_points(&exchange, bar.ts_close, &mut peak_equity, &mut equity_curve, &mut account_curve);
            break 'sim;
        }

        // Advance HTF/MTF cursors, build the snapshot the strategy evaluates
        // against (spec §4.6 step 3.e), then update history windows (step
        // 3.f) before attaching them to the snapshot.
        let mut snapshot = RuntimeSnapshotView::new(exec, med_tf, high_tf, i, step.mark_price);
        if med_tf.is_some() {
            snapshot.advance_role(TfRole::MedTf, bar.ts_close);
        }
        if high_tf.is_some() {
            snapshot.advance_role(TfRole::HighTf, bar.ts_close);
        }
        push_history(&mut history, &snapshot, TfRole::Exec, exec);
        if let Some(store) = med_tf {
            push_history(&mut history, &snapshot, TfRole::MedTf, store);
        }
        if let Some(store) = high_tf {
            push_history(&mut history, &snapshot, TfRole::HighTf, store);
        }
        let snapshot = snapshot.with_history(&history);

        let position_side = exchange.position().map(|p| p.side);
        if let Some(side) = position_side {
            if let Some(exit_rule) = &idea.rules.exit {
                if signal::evaluate(exit_rule, &snapshot)? {
                    debug!(bar_index = i, "exit signal");
                    exchange.submit_order(OrderType::Market, side, 0.0, None, None, None, None, true, bar.ts_close);
                }
            }
        } else if !exchange.entries_disabled() {
            let long_signal = idea
                .rules
                .entry_long
                .as_ref()
                .map(|expr| signal::evaluate(expr, &snapshot))
                .transpose()?
                .unwrap_or(false);
            let short_signal = idea
                .rules
                .entry_short
                .as_ref()
                .map(|expr| signal::evaluate(expr, &snapshot))
                .transpose()?
                .unwrap_or(false);

            if long_signal {
                let sized = sizing::size_order(&idea.risk, &snapshot, equity, Side::Long)?;
                exchange.submit_order(
                    OrderType::Market,
                    Side::Long,
                    sized.size_usdt,
                    None,
                    None,
                    Some(sized.sl),
                    Some(sized.tp),
                    false,
                    bar.ts_close,
                );
            } else if short_signal {
                let sized = sizing::size_order(&idea.risk, &snapshot, equity, Side::Short)?;
                exchange.submit_order(
                    OrderType::Market,
                    Side::Short,
                    sized.size_usdt,
                    None,
                    None,
                    Some(sized.sl),
                    Some(sized.tp),
                    false,
                    bar.ts_close,
                );
            }
        }

        if exchange.position().is_some() || step.fills > 0 {
            bars_without_position = 0;
        } else {
            bars_without_position += 1;
        }

        record_points(&exchange, bar.ts_close, &mut peak_equity, &mut equity_curve, &mut account_curve);
    }

    // Post-loop (spec §4.6 step 4): if still positioned at natural end of
    // data (the loop fell through without an early break), force-close.
    if stop_reason == StopReason::EndOfData {
        if let Some(bar) = exec.bar(last_bar_idx) {
            if let Some(trade) = exchange.force_close(bar.close, bar.ts_close, last_bar_idx, ExitReason::EndOfData) {
                trades.push(trade);
                record_points(&exchange, bar.ts_close, &mut peak_equity, &mut equity_curve, &mut account_curve);
            }
        }
    }

    info!(
        trades = trades.len(),
        stop_reason = ?stop_reason,
        final_equity = exchange.ledger().equity_usdt,
        "simulation complete"
    );

    Ok(RunResult {
        trades,
        equity_curve,
        account_curve,
        stop_reason,
        sim_start_idx,
        total_bars: exec.len(),
        total_funding_pnl_usdt,
        rejection_counts: exchange.rejection_counts(),
    })
}

fn record_points(
    exchange: &SimulatedExchange,
    ts: i64,
    peak_equity: &mut f64,
    equity_curve: &mut Vec<EquityPoint>,
    account_curve: &mut Vec<AccountCurvePoint>,
) {
    let ledger = exchange.ledger();
    *peak_equity = peak_equity.max(ledger.equity_usdt);
    let drawdown_abs = *peak_equity - ledger.equity_usdt;
    let drawdown_pct = if *peak_equity > 0.0 { drawdown_abs / *peak_equity * 100.0 } else { 0.0 };

    equity_curve.push(EquityPoint {
        ts,
        equity_usdt: ledger.equity_usdt,
        drawdown_abs_usdt: drawdown_abs,
        drawdown_pct,
    });
    account_curve.push(AccountCurvePoint {
        ts,
        equity_usdt: ledger.equity_usdt,
        used_margin_usdt: ledger.used_margin_usdt,
        free_margin_usdt: ledger.free_margin_usdt,
        available_balance_usdt: ledger.available_balance_usdt,
        maintenance_margin_usdt: exchange
            .position()
            .map(|p| p.notional_entry * exchange.maintenance_margin_rate())
            .unwrap_or(0.0),
        has_position: exchange.position().is_some(),
        entries_disabled: exchange.entries_disabled(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Bar, Symbol};
    use crate::idea_card::{
        AccountConfig, FeeMode, FeesConfig, FeatureSpecSource, IdeaCard, IdeaCardSource, MarginModeConfig, MarkSource,
        RiskConfig, Rules, SimConfig, StopLossConfig, StopsConfig, TakeProfitConfig, TfConfigSource, TfConfigsSource,
    };
    use crate::registry::{InputSource, ParamValue};
    use crate::time::Timeframe;
        fn bar(i: i64, open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar::new(Timeframe::M15, i * 900_000, open, high, low, close, 10.0).unwrap()
    }

    fn atr_spec() -> FeatureSpecSource {
        let mut params = BTreeMap::new();
        params.insert("period".to_string(), ParamValue::Int(3));
        FeatureSpecSource {
            indicator_type: "atr".to_string(),
            output_key: "atr_3".to_string(),
            params,
            input_source: InputSource::Close,
            input_indicator_key: None,
        }
    }

    fn minimal_idea() -> IdeaCard {
        let source = IdeaCardSource {
            id: "test".to_string(),
            symbol: "BTCUSDT".to_string(),
            tf_configs: TfConfigsSource {
                exec: TfConfigSource {
                    tf: Timeframe::M15,
                    feature_specs: vec![atr_spec()],
                    warmup_bars: None,
                    delay_bars: 0,
                },
                med_tf: None,
                high_tf: None,
            },
            rules: Rules::default(),
            risk: RiskConfig {
                sl: StopLossConfig {
                    atr_key: "atr_3".to_string(),
                    atr_mult: 1.0,
                },
                tp: TakeProfitConfig { r_multiple: 2.0 },
                risk_per_trade_pct: 1.0,
            },
            account: AccountConfig {
                initial_equity_usdt: 10_000.0,
                max_leverage: 10.0,
                initial_margin_rate: None,
                maintenance_margin_rate: 0.005,
                taker_fee_rate: 0.0006,
                include_est_close_fee_in_entry_gate: false,
                mark_source: MarkSource::Close,
            },
            margin_mode: MarginModeConfig::default(),
            fees: FeesConfig {
                fee_mode: FeeMode::TakerOnly,
            },
            stops: StopsConfig {
                equity_floor_usdt: 100.0,
                starvation_bars: 1_000,
                latch_entries_on_liquidation: true,
            },
            sim: SimConfig { funding_enabled: false },
        };
        IdeaCard::compile(source).unwrap()
    }

    #[test]
    fn runs_to_end_of_data_with_no_rules() {
        let idea = minimal_idea();
        let bars: Vec<Bar> = (0..50).map(|i| bar(i, 100.0, 101.0, 99.0, 100.0)).collect();
        let exec = FeedStore::build(Timeframe::M15, bars, &idea.tf_configs.exec.feature_specs).unwrap();
        let cancel = CancelToken::new();
        let result = run(&idea, &exec, None, None, &[], &cancel).unwrap();
        assert_eq!(result.stop_reason, StopReason::EndOfData);
        assert!(result.equity_curve.len() > 0);
        assert_eq!(result.total_bars, 50);
    }

    #[test]
    fn cancellation_observed_before_next_bar_is_processed() {
        let idea = minimal_idea();
        let bars: Vec<Bar> = (0..50).map(|i| bar(i, 100.0, 101.0, 99.0, 100.0)).collect();
        let exec = FeedStore::build(Timeframe::M15, bars, &idea.tf_configs.exec.feature_specs).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = run(&idea, &exec, None, None, &[], &cancel).unwrap();
        assert_eq!(result.stop_reason, StopReason::Cancelled);
    }

    #[test]
    fn insufficient_sim_bars_is_rejected() {
        let idea = minimal_idea();
        let bars: Vec<Bar> = (0..5).map(|i| bar(i, 100.0, 101.0, 99.0, 100.0)).collect();
        let exec = FeedStore::build(Timeframe::M15, bars, &idea.tf_configs.exec.feature_specs).unwrap();
        let cancel = CancelToken::new();
        let err = run(&idea, &exec, None, None, &[], &cancel).unwrap_err();
        assert!(matches!(err, BacktestError::Data(DataError::InsufficientSimBars { .. })));
    }

    #[test]
    fn med_tf_store_without_a_matching_tf_config_is_rejected() {
        // `minimal_idea` never declares a `med_tf` role, so handing the
        // engine a med_tf `FeedStore` anyway must raise `MissingWarmupConfig`
        // instead of silently treating its warmup as zero.
        let idea = minimal_idea();
        let bars: Vec<Bar> = (0..50).map(|i| bar(i, 100.0, 101.0, 99.0, 100.0)).collect();
        let exec = FeedStore::build(Timeframe::M15, bars.clone(), &idea.tf_configs.exec.feature_specs).unwrap();
        let med_tf = FeedStore::build(Timeframe::H1, bars, &[]).unwrap();
        let cancel = CancelToken::new();
        let err = run(&idea, &exec, Some(&med_tf), None, &[], &cancel).unwrap_err();
        assert!(matches!(
            err,
            BacktestError::Config(ConfigError::MissingWarmupConfig(role)) if role == "med_tf"
        ));
    }
}

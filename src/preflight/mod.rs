//! Preflight & audits (spec §2 C11, §4.8): a structured, non-fatal audit
//! pass run once before the hot loop starts. Nothing here mutates a
//! `FeedStore` or `IdeaCard` — it only reads what `engine::run` is about to
//! consume and records whether the run is safe to start. A failing check
//! does not panic; the caller decides whether to abort based on
//! `PreflightReport::passed`, an audit-then-decide shape rather than
//! raising eagerly.

use serde::{Deserialize, Serialize};

use crate::domain::FundingEvent;
use crate::feed_store::FeedStore;
use crate::idea_card::IdeaCard;
use crate::time::TfRole;

/// The 8-hour funding interval tolerance named in spec §4.8.
const FUNDING_TOLERANCE_MS: i64 = 8 * 60 * 60 * 1000;

/// One named audit outcome. `detail` always carries enough context to
/// explain a failure without a debugger (spec §7, "salient context").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreflightCheck {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

impl PreflightCheck {
    fn pass(name: &str, detail: impl Into<String>) -> Self {
        PreflightCheck {
            name: name.to_string(),
            passed: true,
            detail: detail.into(),
        }
    }

    fn fail(name: &str, detail: impl Into<String>) -> Self {
        PreflightCheck {
            name: name.to_string(),
            passed: false,
            detail: detail.into(),
        }
    }
}

/// The full audit result, serialized verbatim to `preflight_report.json`
/// (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreflightReport {
    pub checks: Vec<PreflightCheck>,
}

impl PreflightReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &PreflightCheck> {
        self.checks.iter().filter(|c| !c.passed)
    }
}

/// Runs every audit in spec §4.8 against the already-built feed stores for
/// the window `[window_start, window_end]` (inclusive, `ts_close` domain).
///
/// Indicator compilability is validated twice by design: once here (so the
/// report names every offending spec) and once, unconditionally, inside
/// `IdeaCard::compile` (so a caller that skips preflight cannot run with an
/// invalid spec). The duplication is cheap; the two call sites fail for
/// different audiences (a human reading a report vs. a caller that must
/// never proceed).
pub fn run(
    idea: &IdeaCard,
    exec: &FeedStore,
    med_tf: Option<&FeedStore>,
    high_tf: Option<&FeedStore>,
    funding: &[FundingEvent],
    window_start: i64,
    window_end: i64,
) -> PreflightReport {
    let mut checks = Vec::new();

    checks.push(coverage_check(TfRole::Exec, exec, window_start, window_end));
    if let Some(store) = med_tf {
        checks.push(coverage_check(TfRole::MedTf, store, window_start, window_end));
    }
    if let Some(store) = high_tf {
        checks.push(coverage_check(TfRole::HighTf, store, window_start, window_end));
    }

    checks.push(gap_check(TfRole::Exec, exec));
    if let Some(store) = med_tf {
        checks.push(gap_check(TfRole::MedTf, store));
    }
    if let Some(store) = high_tf {
        checks.push(gap_check(TfRole::HighTf, store));
    }

    if idea.sim.funding_enabled {
        checks.push(funding_coverage_check(funding, window_start, window_end));
    }

    checks.push(indicator_compilability_check(idea));

    checks.push(warmup_feasibility_check(TfRole::Exec, exec));
    if let Some(store) = med_tf {
        checks.push(warmup_feasibility_check(TfRole::MedTf, store));
    }
    if let Some(store) = high_tf {
        checks.push(warmup_feasibility_check(TfRole::HighTf, store));
    }

    PreflightReport { checks }
}

fn coverage_check(role: TfRole, store: &FeedStore, window_start: i64, window_end: i64) -> PreflightCheck {
    let name = format!("data_coverage[{role}]");
    match (store.bars().first(), store.bars().last()) {
        (Some(first), Some(last)) if first.ts_open <= window_start && last.ts_close >= window_end => {
            PreflightCheck::pass(&name, format!("covers [{}, {}]", first.ts_open, last.ts_close))
        }
        (Some(first), Some(last)) => PreflightCheck::fail(
            &name,
            format!(
                "need [{window_start}, {window_end}], have [{}, {}]",
                first.ts_open, last.ts_close
            ),
        ),
        _ => PreflightCheck::fail(&name, "store is empty"),
    }
}

fn gap_check(role: TfRole, store: &FeedStore) -> PreflightCheck {
    let name = format!("no_unfillable_gaps[{role}]");
    let bars = store.bars();
    let expected_step = store.tf().duration_ms();
    for pair in bars.windows(2) {
        let step = pair[1].ts_open - pair[0].ts_open;
        if step != expected_step {
            return PreflightCheck::fail(
                &name,
                format!("gap between bars at {} and {}: step {step}ms, expected {expected_step}ms", pair[0].ts_open, pair[1].ts_open),
            );
        }
    }
    PreflightCheck::pass(&name, format!("{} bars, uniform {expected_step}ms step", bars.len()))
}

fn funding_coverage_check(funding: &[FundingEvent], window_start: i64, window_end: i64) -> PreflightCheck {
    let name = "funding_coverage";
    let in_window: Vec<&FundingEvent> = funding
        .iter()
        .filter(|e| e.ts >= window_start && e.ts <= window_end)
        .collect();
    if in_window.is_empty() {
        return PreflightCheck::fail(name, "funding enabled but no events in window");
    }
    for pair in in_window.windows(2) {
        let gap = pair[1].ts - pair[0].ts;
        let tolerance = (pair[0].interval_hours as i64) * 60 * 60 * 1000 + FUNDING_TOLERANCE_MS;
        if gap > tolerance {
            return PreflightCheck::fail(
                name,
                format!("funding gap {gap}ms between {} and {} exceeds tolerance {tolerance}ms", pair[0].ts, pair[1].ts),
            );
        }
    }
    PreflightCheck::pass(name, format!("{} funding events in window", in_window.len()))
}

fn indicator_compilability_check(idea: &IdeaCard) -> PreflightCheck {
    let name = "indicator_compilability";
    let mut offenders = Vec::new();
    for tf_config in [Some(&idea.tf_configs.exec), idea.tf_configs.med_tf.as_ref(), idea.tf_configs.high_tf.as_ref()]
        .into_iter()
        .flatten()
    {
        for spec in &tf_config.feature_specs {
            if let Err(err) = spec.validate() {
                offenders.push(format!("{}: {err}", spec.output_key));
            }
        }
    }
    if offenders.is_empty() {
        PreflightCheck::pass(name, "all feature specs pass registry validation")
    } else {
        PreflightCheck::fail(name, offenders.join("; "))
    }
}

fn warmup_feasibility_check(role: TfRole, store: &FeedStore) -> PreflightCheck {
    let name = format!("warmup_feasibility[{role}]");
    let first_valid = store.first_fully_valid_idx();
    if first_valid < store.len() {
        PreflightCheck::pass(&name, format!("first_valid_idx={first_valid} of {} bars", store.len()))
    } else {
        PreflightCheck::fail(&name, format!("no fully-valid bar: first_valid_idx={first_valid} >= {} bars", store.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Bar;
    use crate::idea_card::{
        AccountConfig, FeesConfig, IdeaCardSource, MarginModeConfig, RiskConfig, Rules, StopLossConfig,
        StopsConfig, TakeProfitConfig, TfConfigSource, TfConfigsSource,
    };
    use crate::registry::{InputSource, ParamValue};
    use crate::time::Timeframe;
    use std::collections::BTreeMap;

    fn bar(i: i64, close: f64) -> Bar {
        Bar::new(Timeframe::M15, i * 900_000, close + 1.0, close + 2.0, close - 1.0, close, 10.0).unwrap()
    }

    fn minimal_idea() -> IdeaCard {
        let mut params = BTreeMap::new();
        params.insert("period".to_string(), ParamValue::Int(3));
        let atr_spec = crate::idea_card::FeatureSpecSource {
            indicator_type: "atr".to_string(),
            output_key: "atr_3".to_string(),
            params,
            input_source: InputSource::Close,
            input_indicator_key: None,
        };
        IdeaCard::compile(IdeaCardSource {
            id: "preflight-demo".to_string(),
            symbol: "BTCUSDT".to_string(),
            tf_configs: TfConfigsSource {
                exec: TfConfigSource {
                    tf: Timeframe::M15,
                    feature_specs: vec![atr_spec],
                    warmup_bars: None,
                    delay_bars: 0,
                },
                med_tf: None,
                high_tf: None,
            },
            rules: Rules::default(),
            risk: RiskConfig {
                sl: StopLossConfig { atr_key: "atr_3".to_string(), atr_mult: 1.5 },
                tp: TakeProfitConfig { r_multiple: 2.0 },
                risk_per_trade_pct: 1.0,
            },
            account: AccountConfig {
                initial_equity_usdt: 10_000.0,
                max_leverage: 5.0,
                initial_margin_rate: None,
                maintenance_margin_rate: 0.005,
                taker_fee_rate: 0.0006,
                include_est_close_fee_in_entry_gate: true,
                mark_source: crate::idea_card::MarkSource::Close,
            },
            margin_mode: MarginModeConfig::default(),
            fees: FeesConfig::default(),
            stops: StopsConfig {
                equity_floor_usdt: 100.0,
                starvation_bars: 500,
                latch_entries_on_liquidation: true,
            },
            sim: crate::idea_card::SimConfig { funding_enabled: false },
        })
        .unwrap()
    }

    #[test]
    fn full_coverage_passes_every_check() {
        let idea = minimal_idea();
        let bars: Vec<Bar> = (0..20).map(|i| bar(i, 100.0 + i as f64)).collect();
        let store = FeedStore::build(Timeframe::M15, bars, &idea.tf_configs.exec.feature_specs).unwrap();
        let start = store.bar(0).unwrap().ts_open;
        let end = store.bar(store.len() - 1).unwrap().ts_close;
        let report = run(&idea, &store, None, None, &[], start, end);
        assert!(report.passed(), "{report:?}");
    }

    #[test]
    fn coverage_fails_when_window_extends_past_available_data() {
        let idea = minimal_idea();
        let bars: Vec<Bar> = (0..20).map(|i| bar(i, 100.0 + i as f64)).collect();
        let store = FeedStore::build(Timeframe::M15, bars, &idea.tf_configs.exec.feature_specs).unwrap();
        let start = store.bar(0).unwrap().ts_open;
        let report = run(&idea, &store, None, None, &[], start, i64::MAX);
        assert!(!report.passed());
        assert!(report.failures().any(|c| c.name == "data_coverage[exec]"));
    }
}

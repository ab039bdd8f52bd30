//! Top-level orchestration: `IdeaCard + store → Preflight →
//! FeatureFrameBuilder → FeedStore(s) → Engine.loop → SimulatedExchange +
//! Snapshot → Artifacts`. Everything this module does is already
//! implemented by a leaf component; it only wires fetch/audit/simulate/sink
//! stages together in that order without doing any of the work itself.

use std::path::Path;

use tracing::{error, info, instrument};

use crate::artifacts::{self, ResultSummary, Window};
use crate::domain::Symbol;
use crate::engine::{self, CancelToken};
use crate::error::{BacktestError, DataError};
use crate::feed_store::FeedStore;
use crate::idea_card::IdeaCard;
use crate::preflight::{self, PreflightReport};
use crate::store::OhlcvStore;
use crate::time::TfRole;

fn load_role(
    store: &dyn OhlcvStore,
    idea: &IdeaCard,
    role: TfRole,
    symbol: &Symbol,
    window_start: i64,
    window_end: i64,
) -> Option<Result<FeedStore, BacktestError>> {
    let tf_config = idea.tf_configs.get(role)?;
    let warmup_duration = tf_config.tf.duration_ms() * tf_config.max_warmup_bars() as i64;
    let fetch_start = window_start - warmup_duration;
    let bars = store.get_ohlcv(symbol, tf_config.tf, Some(fetch_start), Some(window_end));
    Some(FeedStore::build(tf_config.tf, bars, &tf_config.feature_specs))
}

/// Runs one full backtest: loads the window for every configured TF role,
/// audits it, steps the hot loop, and persists the run (spec §6, the
/// "Persisted run layout"). Returns the written `result.json` summary.
#[instrument(skip(store, cancel), fields(idea_id = %idea.id))]
pub fn run_backtest(
    idea: &IdeaCard,
    store: &dyn OhlcvStore,
    window_start: i64,
    window_end: i64,
    run_id: &str,
    out_dir: &Path,
    cancel: &CancelToken,
) -> Result<ResultSummary, BacktestError> {
    let exec = load_role(store, idea, TfRole::Exec, &idea.symbol, window_start, window_end)
        .expect("exec TfConfig is always present")?;
    let med_tf = load_role(store, idea, TfRole::MedTf, &idea.symbol, window_start, window_end).transpose()?;
    let high_tf = load_role(store, idea, TfRole::HighTf, &idea.symbol, window_start, window_end).transpose()?;

    let funding = if idea.sim.funding_enabled {
        store.get_funding(&idea.symbol, window_start, window_end)
    } else {
        Vec::new()
    };

    let report = preflight::run(idea, &exec, med_tf.as_ref(), high_tf.as_ref(), &funding, window_start, window_end);
    if !report.passed() {
        for failure in report.failures() {
            error!(check = %failure.name, detail = %failure.detail, "preflight check failed");
        }
        return Err(abort_from_preflight(&report, &exec, window_start, window_end));
    }
    info!(checks = report.checks.len(), "preflight passed");

    let result = engine::run(idea, &exec, med_tf.as_ref(), high_tf.as_ref(), &funding, cancel)?;

    artifacts::write_run(
        &result,
        idea,
        run_id,
        Window { start: window_start, end: window_end },
        &report,
        out_dir,
    )
}

/// Preflight has no dedicated error kind of its own (spec §7 lists only
/// `DATA_NOT_FOUND`/`DATA_GAP`/`INSUFFICIENT_COVERAGE`/`INSUFFICIENT_SIM_BARS`
/// under "Data"); a failing audit is surfaced as `INSUFFICIENT_COVERAGE`
/// against the exec store's actual bounds, with the individual check
/// failures already logged above.
fn abort_from_preflight(_report: &PreflightReport, exec: &FeedStore, window_start: i64, window_end: i64) -> BacktestError {
    let (have_start, have_end) = match (exec.bars().first(), exec.bars().last()) {
        (Some(first), Some(last)) => (first.ts_open, last.ts_close),
        _ => (0, 0),
    };
    BacktestError::Data(DataError::InsufficientCoverage {
        need_start: window_start,
        need_end: window_end,
        have_start,
        have_end,
    })
}
